//! Core types for Flightdeck
//!
//! This crate contains:
//! - Shared domain types (Pipeline, Job, Resource, Build, Worker, etc.)
//! - The build `Plan` step tree and its serialized form
//! - The structural pipeline configuration the scheduler relies on
//! - DTOs for the HTTP surface
//!
//! Note: persistence lives in the control plane, execution on container hosts.

pub mod config;
pub mod domain;
pub mod dto;
pub mod duration;
pub mod plan;
