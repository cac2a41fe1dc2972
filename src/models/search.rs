use serde::{Deserialize, Serialize};

use crate::models::metadata::MetadataFamily;

/// Which tag types a search term may match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TypeRestriction {
    #[default]
    Any,
    Field(String),
    Family(MetadataFamily),
}

impl TypeRestriction {
    /// Empty means any type, "iptc"/"exif" a whole family, anything else a field.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Any;
        }
        match MetadataFamily::parse(trimmed) {
            Some(family) => Self::Family(family),
            None => Self::Field(trimmed.to_string()),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Concrete tag types, or `None` when unrestricted.
    pub fn tag_types(&self) -> Option<Vec<String>> {
        match self {
            Self::Any => None,
            Self::Field(name) => Some(vec![name.clone()]),
            Self::Family(family) => Some(family.field_names().map(str::to_string).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub folder: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub tag_type: String,
    #[serde(default)]
    pub page: usize,
    /// Zero means the configured default.
    #[serde(default)]
    pub page_size: usize,
}

impl SearchRequest {
    pub fn terms(&self) -> Vec<String> {
        self.query.split_whitespace().map(str::to_string).collect()
    }

    pub fn restriction(&self) -> TypeRestriction {
        TypeRestriction::parse(&self.tag_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Terms,
    Untagged,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub folder: String,
    pub mode: SearchMode,
    pub images: Vec<String>,
    pub page: usize,
    pub page_size: usize,
    pub total_images: usize,
    pub total_pages: usize,
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    if total == 0 || page_size == 0 {
        1
    } else {
        total.div_ceil(page_size)
    }
}
