//! # API shared
//!
//! Types and utilities shared between the OMR core and its API surface:
//!
//! - wire DTOs for every request and response body (`dto`)
//! - health check service
//! - bearer-token parsing
//!
//! The core consumes and produces these DTOs directly; transport-specific
//! concerns (routing, status codes) live in `api-rest`.

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod dto;
pub mod health;

pub use health::{HealthRes, HealthService};
