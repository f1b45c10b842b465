//! Fetching and parsing of RSS and Atom feeds.
//!
//! - [`fetcher`] - conditional GET with separate header and body deadlines
//! - [`parser`] - RSS-then-Atom decoding into a [`ParsedFeed`](crate::storage::ParsedFeed)
//! - [`date`] - lenient publication date parsing
//! - [`xml`] - charset-aware, entity-tolerant XML tree used by the parser
//!
//! # Example
//!
//! ```ignore
//! use pithy::feed::{parse_feed, FetchOutcome, Fetcher, FetcherConfig};
//!
//! let fetcher = Fetcher::new(FetcherConfig::default())?;
//! if let FetchOutcome::Fetched(raw) = fetcher.fetch(&feed.url, feed.etag.as_deref()).await? {
//!     let parsed = parse_feed(&raw.body)?;
//! }
//! ```

pub mod date;
pub mod fetcher;
pub mod parser;
pub mod xml;

pub use date::{parse_time, TimeParseError};
pub use fetcher::{FetchError, FetchOutcome, Fetcher, FetcherConfig, RawFeed};
pub use parser::{parse_feed, ParseError};
