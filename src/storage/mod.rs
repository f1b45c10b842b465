mod feeds;
mod memory;
mod repository;
mod schema;
mod subscriptions;
mod types;

pub use memory::MemoryRepository;
pub use repository::FeedRepository;
pub use schema::Database;
pub use types::{DatabaseError, Feed, Item, ParsedFeed, ParsedItem};
