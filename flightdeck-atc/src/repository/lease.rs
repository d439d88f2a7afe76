//! Lease repository
//!
//! Named, TTL'd exclusive claims. A lease makes singleton periodic tasks and
//! per-build tracking safe when several control-plane nodes run at once:
//! acquisition only succeeds when the name is free or its previous holder's
//! TTL has lapsed, and a crashed holder's lease expires on its own.

use sqlx::PgPool;
use std::time::Duration;

/// Try to acquire the named lease for `ttl`. Returns false when another
/// holder still has it.
pub async fn acquire(pool: &PgPool, name: &str, ttl: Duration) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO leases (name, expires_at)
        VALUES ($1, now() + make_interval(secs => $2))
        ON CONFLICT (name) DO UPDATE
        SET expires_at = now() + make_interval(secs => $2)
        WHERE leases.expires_at < now()
        "#,
    )
    .bind(name)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Extend a held lease. Returns false when it already expired, meaning the
/// caller no longer owns the work.
pub async fn renew(pool: &PgPool, name: &str, ttl: Duration) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE leases
        SET expires_at = now() + make_interval(secs => $2)
        WHERE name = $1 AND expires_at > now()
        "#,
    )
    .bind(name)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Give the lease up early so another node can pick the work up immediately.
pub async fn release(pool: &PgPool, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM leases WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Lease Names
// =============================================================================

pub fn resource_checking(resource_id: uuid::Uuid) -> String {
    format!("resource-checking:{}", resource_id)
}

pub fn resource_scanning(resource_id: uuid::Uuid, nonce: uuid::Uuid) -> String {
    format!("resource-scanning:{}:{}", resource_id, nonce)
}

pub fn build_tracking(build_id: uuid::Uuid) -> String {
    format!("build-tracking:{}", build_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_lease_names_are_distinct_per_entity() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(resource_checking(a), resource_checking(b));
        assert_ne!(build_tracking(a), resource_checking(a));
    }

    #[test]
    fn test_manual_scan_lease_is_unique_per_nonce() {
        let id = Uuid::new_v4();
        assert_ne!(
            resource_scanning(id, Uuid::new_v4()),
            resource_scanning(id, Uuid::new_v4())
        );
    }
}
