//! Core systems for Horizon HostInfo.
//!
//! This crate provides the scheduling substrate the resolver is built on:
//!
//! - **Run Loop**: a cooperative, per-thread event loop with named modes
//! - **Sources**: fireable completion sources performed by a run loop
//! - **Schedule Lists**: the (loop, mode) pairs a pending operation is delivered on
//! - **Stream Errors**: `(domain, code)` error values shared by all components
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use horizon_hostinfo_core::{RunLoop, RunLoopMode, ScheduleList, Source};
//!
//! let mut schedules = ScheduleList::new();
//! schedules.add(&RunLoop::current(), &RunLoopMode::DEFAULT);
//!
//! let source = Source::new(|_| println!("done"));
//! schedules.schedule(&source);
//!
//! // Completion arrives from anywhere.
//! source.signal();
//! schedules.wake_waiting(&source);
//!
//! RunLoop::current().run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::from_millis(10)), true);
//! ```

pub mod error;
pub mod logging;
pub mod run_loop;
pub mod schedule;
pub mod source;

pub use error::{ErrorDomain, StreamError};
pub use run_loop::{RunLoop, RunLoopMode, RunResult};
pub use schedule::ScheduleList;
pub use source::{Source, SourceId};
