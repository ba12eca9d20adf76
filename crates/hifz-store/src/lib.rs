pub mod config;
pub mod error;
pub mod schema;
pub mod store;

pub use config::{CONFIG_FILE, DB_FILE, default_data_dir, load_config};
pub use error::{Result, StoreError};
pub use store::Store;
