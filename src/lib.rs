pub mod types;
pub mod error;
pub mod events;
pub mod data;
pub mod config;
pub mod time;
pub mod utils;

pub use types::*;
pub use error::{Result, CacheError};
