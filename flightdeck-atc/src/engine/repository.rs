//! Artifact repository
//!
//! A per-build, in-memory registry mapping step names to their output
//! artifacts (a worker + volume pair). Later steps consume prior outputs by
//! name; dropping the repository releases every hold.

use std::collections::HashMap;
use std::sync::RwLock;

/// Where an artifact lives.
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub worker_name: String,
    pub worker_addr: String,
    pub volumes_addr: Option<String>,
    pub volume_handle: String,
}

pub struct ArtifactRepository {
    sources: RwLock<HashMap<String, ArtifactSource>>,
}

impl ArtifactRepository {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Register a step's output under its name. A later registration under
    /// the same name shadows the earlier one, matching plan order semantics.
    pub fn register(&self, name: impl Into<String>, source: ArtifactSource) {
        self.sources
            .write()
            .expect("artifact repository lock poisoned")
            .insert(name.into(), source);
    }

    pub fn source_for(&self, name: &str) -> Option<ArtifactSource> {
        self.sources
            .read()
            .expect("artifact repository lock poisoned")
            .get(name)
            .cloned()
    }

    /// All artifacts, for steps that mount everything (puts).
    pub fn all(&self) -> Vec<(String, ArtifactSource)> {
        let mut entries: Vec<_> = self
            .sources
            .read()
            .expect("artifact repository lock poisoned")
            .iter()
            .map(|(name, source)| (name.clone(), source.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for ArtifactRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(worker: &str, handle: &str) -> ArtifactSource {
        ArtifactSource {
            worker_name: worker.to_string(),
            worker_addr: format!("http://{}:7777", worker),
            volumes_addr: None,
            volume_handle: handle.to_string(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let repo = ArtifactRepository::new();
        repo.register("repo", source("w1", "vol-1"));

        let found = repo.source_for("repo").unwrap();
        assert_eq!(found.volume_handle, "vol-1");
        assert!(repo.source_for("missing").is_none());
    }

    #[test]
    fn test_later_registration_shadows_earlier() {
        let repo = ArtifactRepository::new();
        repo.register("out", source("w1", "vol-1"));
        repo.register("out", source("w2", "vol-2"));

        assert_eq!(repo.source_for("out").unwrap().volume_handle, "vol-2");
        assert_eq!(repo.all().len(), 1);
    }

    #[test]
    fn test_all_is_sorted_by_name() {
        let repo = ArtifactRepository::new();
        repo.register("b", source("w", "vol-b"));
        repo.register("a", source("w", "vol-a"));

        let names: Vec<_> = repo.all().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
