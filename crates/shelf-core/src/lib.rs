pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ShelfConfig;
pub use error::{Result, ShelfError};
pub use events::{ChangeBatch, CollectionKind};
pub use types::*;
