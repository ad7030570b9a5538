pub mod types;
pub mod error;
pub mod config;
pub mod utils;
pub mod subgraph;
pub mod data;
pub mod collector;
pub mod api;

pub use types::*;
pub use error::{FeedError, Result};
