use std::path::Path;

use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::metadata::{normalize_tag_values, FieldDefinition, MetadataFamily, MetadataRecord};

/// Reads and writes the IPTC/EXIF fields embedded in an image file.
///
/// Implementations wrap a native metadata library. `write_field` replaces every
/// value of one field and either succeeds or leaves the file untouched.
pub trait MetadataCodec: Send + Sync {
    fn read(&self, path: &Path) -> Result<MetadataRecord, AppError>;

    fn write_field(
        &self,
        path: &Path,
        family: MetadataFamily,
        field: &str,
        values: &[String],
    ) -> Result<(), AppError>;
}

fn known_field(family: MetadataFamily, field: &str) -> Result<&'static FieldDefinition, AppError> {
    family
        .field(field)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown {family} field: {field}")))
}

/// Reads one file through the codec and replaces all of its indexed tags in a
/// single transaction. Returns the number of links written.
pub fn index_image(
    conn: &Connection,
    codec: &dyn MetadataCodec,
    path: &str,
) -> Result<usize, AppError> {
    let record = codec.read(Path::new(path))?;
    repository::bulk_replace_image_tags(conn, path, &record.indexable_fields())
}

/// Current normalised values of one field, straight from the file.
pub fn read_field(
    codec: &dyn MetadataCodec,
    path: &Path,
    family: MetadataFamily,
    field: &str,
) -> Result<Vec<String>, AppError> {
    known_field(family, field)?;
    let record = codec.read(path)?;
    Ok(record
        .family(family)
        .get(field)
        .map(|value| value.tag_values())
        .unwrap_or_default())
}

/// Writes a field to the file, then mirrors it into the index. The index is
/// only touched once the file write has succeeded.
pub fn update_field(
    conn: &Connection,
    codec: &dyn MetadataCodec,
    path: &str,
    family: MetadataFamily,
    field: &str,
    values: &[String],
) -> Result<Vec<String>, AppError> {
    let definition = known_field(family, field)?;
    let mut values = normalize_tag_values(values);
    if !definition.multi_valued {
        values.truncate(1);
    }

    codec
        .write_field(Path::new(path), family, field, &values)
        .map_err(|e| match e {
            AppError::Codec(_) => e,
            other => AppError::Codec(other.to_string()),
        })?;

    repository::replace_image_tags(conn, path, field, &values)?;
    tracing::debug!(path, field, count = values.len(), "field updated");
    Ok(values)
}
