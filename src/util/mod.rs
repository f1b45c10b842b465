//! Input validation shared by the binary and library callers.

mod url_validator;

pub use url_validator::{validate_feed_url, FeedUrlError};
