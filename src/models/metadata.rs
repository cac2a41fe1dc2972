use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFamily {
    Iptc,
    Exif,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub label: &'static str,
    pub multi_valued: bool,
}

const fn field(name: &'static str, label: &'static str, multi_valued: bool) -> FieldDefinition {
    FieldDefinition {
        name,
        label,
        multi_valued,
    }
}

pub const IPTC_FIELDS: &[FieldDefinition] = &[
    field("ObjectName", "Object Name", false),
    field("Keywords", "Keywords", true),
    field("Caption", "Caption", false),
    field("By-line", "By-line", false),
    field("By-lineTitle", "By-line Title", false),
    field("Credit", "Credit", false),
    field("Source", "Source", false),
    field("CopyrightNotice", "Copyright Notice", false),
    field("Headline", "Headline", false),
    field("SpecialInstructions", "Special Instructions", false),
    field("Category", "Category", false),
    field("SupplementalCategories", "Supplemental Categories", true),
    field("Urgency", "Urgency", false),
    field("DateCreated", "Date Created", false),
    field("City", "City", false),
    field("Province-State", "Province/State", false),
    field("Country-PrimaryLocationName", "Country", false),
    field(
        "OriginalTransmissionReference",
        "Original Transmission Reference",
        false,
    ),
];

pub const EXIF_FIELDS: &[FieldDefinition] = &[
    field("Artist", "Artist", false),
    field("Copyright", "Copyright", false),
    field("ImageDescription", "Image Description", false),
    field("UserComment", "User Comment", false),
    field("Software", "Software", false),
    field("Make", "Camera Make", false),
    field("Model", "Camera Model", false),
    field("DateTimeOriginal", "Date/Time Original", false),
    field("GPSLatitude", "GPS Latitude", false),
    field("GPSLongitude", "GPS Longitude", false),
    field("GPSAltitude", "GPS Altitude", false),
];

impl MetadataFamily {
    pub const ALL: [MetadataFamily; 2] = [MetadataFamily::Iptc, MetadataFamily::Exif];

    pub fn fields(self) -> &'static [FieldDefinition] {
        match self {
            Self::Iptc => IPTC_FIELDS,
            Self::Exif => EXIF_FIELDS,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldDefinition> {
        self.fields().iter().find(|def| def.name == name)
    }

    pub fn field_names(self) -> impl Iterator<Item = &'static str> {
        self.fields().iter().map(|def| def.name)
    }

    /// Accepts "iptc" or "exif" in any case.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("iptc") {
            Some(Self::Iptc)
        } else if raw.eq_ignore_ascii_case("exif") {
            Some(Self::Exif)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MetadataFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iptc => write!(f, "iptc"),
            Self::Exif => write!(f, "exif"),
        }
    }
}

/// A field's raw value as returned by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    /// Trimmed, non-blank values with duplicates removed, in codec order.
    pub fn tag_values(&self) -> Vec<String> {
        match self {
            Self::Single(value) => normalize_tag_values(std::slice::from_ref(value)),
            Self::Multi(values) => normalize_tag_values(values),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataRecord {
    pub iptc: BTreeMap<String, FieldValue>,
    pub exif: BTreeMap<String, FieldValue>,
}

impl MetadataRecord {
    pub fn family(&self, family: MetadataFamily) -> &BTreeMap<String, FieldValue> {
        match family {
            MetadataFamily::Iptc => &self.iptc,
            MetadataFamily::Exif => &self.exif,
        }
    }

    /// Values for every known field of both families. Absent fields map to an
    /// empty list so that indexing clears whatever was stored before.
    pub fn indexable_fields(&self) -> BTreeMap<String, Vec<String>> {
        let mut fields = BTreeMap::new();
        for family in MetadataFamily::ALL {
            let values = self.family(family);
            for name in family.field_names() {
                let tags = values
                    .get(name)
                    .map(FieldValue::tag_values)
                    .unwrap_or_default();
                fields.insert(name.to_string(), tags);
            }
        }
        fields
    }
}

pub fn normalize_tag_values<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() || out.iter().any(|seen| seen == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

/// Restricted charset accepted for tag text by the maintenance pass.
pub fn is_valid_tag_text(text: &str) -> bool {
    !text.trim().is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '(' | ')' | ':' | '\'' | '?' | '|' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_tables_do_not_overlap() {
        for name in MetadataFamily::Iptc.field_names() {
            assert!(MetadataFamily::Exif.field(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_keywords_are_multi_valued() {
        let keywords = MetadataFamily::Iptc.field("Keywords").unwrap();
        assert!(keywords.multi_valued);
        assert!(!MetadataFamily::Exif.field("Artist").unwrap().multi_valued);
    }

    #[test]
    fn test_parse_family_ignores_case() {
        assert_eq!(MetadataFamily::parse("IPTC"), Some(MetadataFamily::Iptc));
        assert_eq!(MetadataFamily::parse("exif"), Some(MetadataFamily::Exif));
        assert_eq!(MetadataFamily::parse("Keywords"), None);
    }

    #[test]
    fn test_field_value_deserializes_both_shapes() {
        let record: MetadataRecord = serde_json::from_str(
            r#"{"iptc": {"Keywords": ["red", " cat ", ""]}, "exif": {"Artist": "Ann"}}"#,
        )
        .unwrap();
        assert_eq!(
            record.iptc["Keywords"].tag_values(),
            vec!["red".to_string(), "cat".to_string()]
        );
        assert_eq!(record.exif["Artist"].tag_values(), vec!["Ann".to_string()]);
    }

    #[test]
    fn test_indexable_fields_cover_every_known_field() {
        let mut record = MetadataRecord::default();
        record
            .iptc
            .insert("Keywords".to_string(), FieldValue::Multi(vec!["sky".into()]));
        record
            .iptc
            .insert("NotAField".to_string(), FieldValue::Single("x".into()));

        let fields = record.indexable_fields();
        assert_eq!(fields.len(), IPTC_FIELDS.len() + EXIF_FIELDS.len());
        assert_eq!(fields["Keywords"], vec!["sky".to_string()]);
        assert!(fields["Artist"].is_empty());
        assert!(!fields.contains_key("NotAField"));
    }

    #[test]
    fn test_blank_values_are_dropped() {
        assert!(FieldValue::Single("   ".into()).tag_values().is_empty());
        assert_eq!(
            normalize_tag_values(&["a", "a ", " b"]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_tag_text_validity() {
        assert!(is_valid_tag_text("New-York (2021): what?"));
        assert!(!is_valid_tag_text("   "));
        assert!(!is_valid_tag_text("café"));
        assert!(!is_valid_tag_text("a,b"));
    }
}
