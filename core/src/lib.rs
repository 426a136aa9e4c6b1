pub mod backup;
pub mod compare;
pub mod duplicates;
pub mod error;
pub mod hasher;
pub mod progress;
pub mod repository;
pub mod restore;
pub mod snapshot;
pub mod store;
pub mod targets;
pub mod types;
pub mod verify;

pub use error::{Error, Result};
pub use repository::Repository;
pub use types::*;
