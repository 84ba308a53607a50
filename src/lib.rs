//! Last-mile shuttle matching gateway
//!
//! Matches shuttle drivers approaching stations with riders waiting
//! there, driven by a stream of driver telemetry.
//!
//! Module structure:
//! - `domain/` - Core business types (routes, intents, matches, messages)
//! - `io/` - External interfaces (HTTP API, subscribe stream, metrics)
//! - `services/` - Business logic (evaluator, coordinator, stores)
//! - `infra/` - Infrastructure (config, metrics)

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
