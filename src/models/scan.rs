use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Re-index every discovered file.
    Full,
    /// Index only files that have no image row yet.
    Incremental,
}

impl ScanMode {
    pub fn from_force(force: bool) -> Self {
        if force {
            Self::Full
        } else {
            Self::Incremental
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub running: bool,
    pub folder: Option<String>,
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed {
        indexed: usize,
        failed: usize,
        purged: usize,
    },
    Cancelled {
        processed: usize,
        total: usize,
    },
    Failed {
        reason: String,
    },
}
