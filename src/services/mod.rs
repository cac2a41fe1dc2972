pub mod asset_service;
pub mod discovery_service;
pub mod metadata_service;
pub mod scan_service;
pub mod search_service;
pub mod watch_service;
