pub mod metadata;
pub mod scan;
pub mod search;
