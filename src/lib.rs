pub mod cli;
pub mod config;
pub mod error;
pub mod store;
pub mod timetools;

pub use config::Config;
pub use error::StoreError;
pub use store::ShowStore;
