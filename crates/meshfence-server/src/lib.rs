//! # meshfence-server
//!
//! HTTP server library for the meshfence geofence engine.
//!
//! This library provides the API handlers, state management and the logging
//! mesh transport used by the `meshfence-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
pub mod transport;
