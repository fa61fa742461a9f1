//! Long-poll chat queue server the overlay polls.
//!
//! Chat lines are pushed into a bounded, expiring [`queue::ChatQueue`]; clients fetch them
//! incrementally through `GET /get-messages?sid=..&mid=..`.

pub mod config;
pub mod http;
pub mod queue;
