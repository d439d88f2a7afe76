//! Versioned resource domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An opaque resource version: a bundle of string keys, e.g. `{"ref": "abc1"}`.
///
/// A `BTreeMap` keeps the serialized form canonical, which matters both for
/// the unique `(resource_id, version)` constraint and for cache fingerprints.
pub type Version = BTreeMap<String, String>;

/// A single name/value pair of display metadata reported alongside a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// A concrete version of a resource.
///
/// `check_order` is monotonically assigned per resource as versions are
/// discovered; scheduling and "passed" constraints order by it, never by
/// wall time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedResource {
    pub id: i64,
    pub resource_id: Uuid,
    pub version: Version,
    pub metadata: Vec<MetadataField>,
    pub check_order: i32,
}

/// Builds a `Version` from string pairs. Test and fixture helper.
pub fn version(pairs: &[(&str, &str)]) -> Version {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
