//! Job domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved job within a pipeline
///
/// The scheduling knobs (`serial`, `serial_groups`, `max_in_flight`) are
/// copied from the pipeline config on every save so scheduling queries never
/// have to reparse the config blob. The `*_build_id` pointers track the job's
/// build history for the dashboard and the build reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub paused: bool,
    pub serial: bool,
    pub serial_groups: Vec<String>,
    pub max_in_flight: i32,
    pub build_number: i64,
    pub first_logged_build_id: Option<Uuid>,
    pub latest_completed_build_id: Option<Uuid>,
    pub next_build_id: Option<Uuid>,
    pub transition_build_id: Option<Uuid>,
    pub build_log_retention: Option<i32>,
}

impl Job {
    /// The serial groups this job participates in.
    ///
    /// A `serial: true` job with no explicit groups forms a singleton group
    /// named after itself, so the overlap check covers both cases.
    pub fn effective_serial_groups(&self) -> Vec<String> {
        if !self.serial_groups.is_empty() {
            self.serial_groups.clone()
        } else if self.serial {
            vec![self.name.clone()]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(serial: bool, groups: &[&str]) -> Job {
        Job {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            name: "deploy".to_string(),
            paused: false,
            serial,
            serial_groups: groups.iter().map(|s| s.to_string()).collect(),
            max_in_flight: 0,
            build_number: 0,
            first_logged_build_id: None,
            latest_completed_build_id: None,
            next_build_id: None,
            transition_build_id: None,
            build_log_retention: None,
        }
    }

    #[test]
    fn test_serial_job_forms_singleton_group() {
        assert_eq!(job(true, &[]).effective_serial_groups(), vec!["deploy"]);
    }

    #[test]
    fn test_explicit_groups_win() {
        assert_eq!(
            job(true, &["infra"]).effective_serial_groups(),
            vec!["infra"]
        );
    }

    #[test]
    fn test_parallel_job_has_no_groups() {
        assert!(job(false, &[]).effective_serial_groups().is_empty());
    }
}
