pub mod settings;

use tracing::info;

pub use settings::AppSettings;

/// Initialize application configuration
pub fn init_config() -> Result<settings::AppSettings, crate::error::AppError> {
    info!("Initializing gateway configuration from environment");
    settings::AppSettings::from_env()
}
