//! # proxtrace-server
//!
//! HTTP server library for the proxtrace contact detection engine.
//!
//! This library provides the API handlers and state management for proxtrace.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
