//! Core domain + application logic for the chat overlay.
//!
//! This crate is intentionally transport- and display-agnostic. HTTP, rendering and
//! timers live behind ports (traits) implemented by the host binary or adapter crates.

pub mod buffer;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod protocol;
pub mod scale;
pub mod sync;
pub mod variants;

pub use errors::{Error, Result};
