//! Database initialization, migrations and runtime settings

pub mod init;
pub mod migrations;
pub mod settings;

pub use init::*;
pub use migrations::{get_schema_version, run_migrations};
pub use settings::RuntimeSettings;
