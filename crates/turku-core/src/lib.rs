//! Turku Core Library
//!
//! Storage-free logic shared by Turku components:
//! - Frequency scheduling (including Jenkins-style hashed cron)
//! - Filter-set resolution for transfer rules
//! - Weighted storage-unit assignment
//! - Configuration resolution and hierarchy
//! - Common error and database types

pub mod assign;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod schedule;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use filters::{FilterSetLookup, resolve_filters};
pub use schedule::{Frequency, ScheduleError, hashed_int, next_run};
