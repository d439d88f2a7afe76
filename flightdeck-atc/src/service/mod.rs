//! Service module
//!
//! API-facing logic. Services sit between the HTTP handlers and the
//! repositories/components and own the domain errors handlers translate to
//! status codes.

pub mod build;
pub mod pipeline;
pub mod resource;
pub mod worker;
