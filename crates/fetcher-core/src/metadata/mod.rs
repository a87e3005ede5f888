//! Local JSON persistence for catalog metadata.

mod atomic;
mod cache;

pub use atomic::{read_json, write_json_atomic};
pub use cache::MetadataCache;
