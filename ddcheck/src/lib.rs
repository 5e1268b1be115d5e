//! ddcheck library crate.
//!
//! Live-stream and tweet notifications for chat groups, plus the VTuber
//! follow-list report. The binary wires these together; everything here is
//! usable on its own for tests and tooling.

pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod report;
pub mod scheduler;
pub mod tweets;

pub use error::{Error, Result, error_chain};
