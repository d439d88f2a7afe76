//! Volume domain types

use serde::{Deserialize, Serialize};

use crate::domain::version::Version;

/// Why a volume exists; resource caches carry the fingerprint that makes
/// them reusable across builds and jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeIdentifier {
    ResourceCache {
        resource_type: String,
        version: Version,
        source_hash: String,
        params_hash: String,
    },
    CopyOnWrite {
        parent_handle: String,
    },
    Output {
        name: String,
    },
    Import {
        path: String,
    },
}

/// A volume the control plane knows about on some worker.
///
/// `initialized=true` means the content is trustworthy for reuse; a cache
/// only flips to initialized when a `get` into it completes successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub handle: String,
    pub worker_name: String,
    pub identifier: VolumeIdentifier,
    pub ttl_seconds: Option<i64>,
    pub size_in_bytes: Option<i64>,
    pub initialized: bool,
}
