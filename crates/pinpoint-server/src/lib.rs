//! # pinpoint-server
//!
//! HTTP server library for pinpoint.
//!
//! This library provides the API handlers and state management that let a
//! client supply the target serial number and follow the search.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
