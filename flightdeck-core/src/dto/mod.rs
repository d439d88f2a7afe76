//! DTOs for the HTTP surface
//!
//! Request/response bodies exchanged between the API, workers registering
//! themselves, and external callers. Domain types stay internal; summaries
//! convert via `From`.

pub mod build;
pub mod pipeline;
pub mod resource;
pub mod worker;
