mod cache;

pub use cache::{ApiData, MemCache};
