pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

pub use config::Config;
pub use data::Database;
pub use error::AppError;
pub use models::metadata::{FieldValue, MetadataFamily, MetadataRecord};
pub use models::scan::{ScanOutcome, ScanStatus};
pub use models::search::{SearchMode, SearchPage, SearchRequest, TypeRestriction};
pub use services::asset_service::{AssetCache, AssetOutcome};
pub use services::metadata_service::MetadataCodec;
pub use services::scan_service::ScanOrchestrator;
pub use state::AppState;

pub const DEFAULT_LOG_FILTER: &str = "photo_tag_index=info";

/// Installs a fmt subscriber. `RUST_LOG` overrides `default_filter`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
