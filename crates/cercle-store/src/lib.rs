pub mod database;
pub mod migrations;
pub mod state;

mod error;

pub use database::Store;
pub use error::StoreError;
pub use state::{PersistedGroup, PersistedState};
