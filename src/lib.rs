//! Live poll aggregation and fan-out.
//!
//! Polls are created and voted on through [`service::PollService`]; every
//! accepted vote is pushed to live subscribers of that poll in commit order.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod db;
pub mod error;
pub mod polls;
pub mod service;
pub mod sse;
pub mod startup;
pub mod store;
pub mod votes;

pub use config::Config;
pub use error::{ApiError, ErrorCode, PollError};
pub use service::PollService;
