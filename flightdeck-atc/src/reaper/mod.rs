//! Reapers
//!
//! Cluster-singleton cleanup tasks, each gated by a named lease: the
//! lost-and-found sweep that expires orphaned containers and volumes, and the
//! build reaper that truncates old build logs per job.

pub mod build_reaper;
pub mod lease_runner;
pub mod lost_and_found;
