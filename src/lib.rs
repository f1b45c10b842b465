//! Background refresh for a multi-user RSS/Atom aggregator.
//!
//! - [`feed`]: time and document parsing, conditional HTTP fetching
//! - [`storage`]: the outcome repository (SQLite and in-memory)
//! - [`refresh`]: the worker pool and the periodic scheduler
//! - [`config`]: the optional TOML config file

pub mod config;
pub mod feed;
pub mod refresh;
pub mod storage;
pub mod util;
