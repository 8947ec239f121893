//! Harvest sources and their lifecycle.

mod controller;
mod sqlite_store;
mod store;
mod types;
mod validator;

pub use controller::{ControllerError, RepositoryController};
pub use sqlite_store::SqliteRepositoryStore;
pub use store::{RepositoryError, RepositoryFilter, RepositoryStore};
pub use types::{FailureTally, HarvestState, NewRepository, Repository, Schedule};
pub use validator::{RepositoryValidator, ValidationError};
