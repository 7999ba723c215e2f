use serde::{Deserialize, Serialize};

use crate::core::RecordId;

/// Location of a streaming-enabled blob column.
///
/// Names the table, the blob column the native path is derived from, and the
/// unique identifier column rows are looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocator {
    /// Table holding the blob column
    pub table: String,

    /// Column declared with streaming storage
    pub blob_column: String,

    /// Unique row identifier column
    pub id_column: String,
}

impl BlobLocator {
    /// Locator for `table` with the conventional column names.
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            blob_column: "file_content".to_string(),
            id_column: "file_id".to_string(),
        }
    }

    /// Set the blob column name
    pub fn blob_column(mut self, column: &str) -> Self {
        self.blob_column = column.to_string();
        self
    }

    /// Set the identifier column name
    pub fn id_column(mut self, column: &str) -> Self {
        self.id_column = column.to_string();
        self
    }

    /// Validate that every name is a plain SQL identifier.
    ///
    /// Rejecting anything else here keeps quoting and injection concerns out
    /// of the query formatting below.
    pub fn validate(&self) -> Result<(), String> {
        for (what, name) in [
            ("table", &self.table),
            ("blob_column", &self.blob_column),
            ("id_column", &self.id_column),
        ] {
            let mut chars = name.chars();
            let valid = match chars.next() {
                Some(first) => {
                    (first.is_ascii_alphabetic() || first == '_')
                        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                None => false,
            };
            if !valid {
                return Err(format!("{} is not a valid identifier: '{}'", what, name));
            }
        }
        Ok(())
    }

    /// The read query a backend issues to resolve the native path and the
    /// transaction token for one record.
    pub fn context_query(&self, id: RecordId) -> String {
        format!(
            "SELECT {}.PathName(), GET_FILESTREAM_TRANSACTION_CONTEXT() \
             FROM {} WHERE {} = '{}'",
            self.blob_column, self.table, self.id_column, id
        )
    }
}

/// Tunables for the native open call and the whole-content helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Timeout forwarded to the native open call, in milliseconds (0 = none)
    pub open_timeout_ms: u32,

    /// Options word forwarded to the native open call
    pub open_options: u32,

    /// Chunk size used by `store_from` / `read_to_vec`
    pub copy_buffer_size: usize,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self {
            open_timeout_ms: 0,
            open_options: 0,
            copy_buffer_size: 64 * 1024,
        }
    }

    /// Set the native open timeout in milliseconds
    pub fn open_timeout_ms(mut self, timeout: u32) -> Self {
        self.open_timeout_ms = timeout;
        self
    }

    /// Set the native open options word
    pub fn open_options(mut self, options: u32) -> Self {
        self.open_options = options;
        self
    }

    /// Set the copy chunk size
    pub fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.copy_buffer_size == 0 {
            return Err("copy_buffer_size must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_locator_uses_conventional_columns() {
        let locator = BlobLocator::new("documents");
        assert_eq!(locator.table, "documents");
        assert_eq!(locator.blob_column, "file_content");
        assert_eq!(locator.id_column, "file_id");
        assert!(locator.validate().is_ok());
    }

    #[test]
    fn builder_overrides_columns() {
        let locator = BlobLocator::new("docs")
            .blob_column("payload")
            .id_column("doc_id");
        assert_eq!(locator.blob_column, "payload");
        assert_eq!(locator.id_column, "doc_id");
    }

    #[test]
    fn validate_rejects_non_identifiers() {
        assert!(BlobLocator::new("").validate().is_err());
        assert!(BlobLocator::new("docs; DROP TABLE docs").validate().is_err());
        assert!(BlobLocator::new("docs").blob_column("a b").validate().is_err());
        assert!(BlobLocator::new("docs").id_column("1id").validate().is_err());
        assert!(BlobLocator::new("_docs2").validate().is_ok());
    }

    #[test]
    fn context_query_shape() {
        let id = RecordId::new();
        let query = BlobLocator::new("documents").context_query(id);
        assert!(query.starts_with("SELECT file_content.PathName(), GET_FILESTREAM_TRANSACTION_CONTEXT()"));
        assert!(query.contains("FROM documents"));
        assert!(query.ends_with(&format!("WHERE file_id = '{}'", id)));
    }

    #[test]
    fn stream_config_defaults_and_validation() {
        let config = StreamConfig::default();
        assert_eq!(config.open_timeout_ms, 0);
        assert_eq!(config.open_options, 0);
        assert!(config.validate().is_ok());

        let invalid = StreamConfig::new().copy_buffer_size(0);
        assert!(invalid.validate().is_err());
    }
}
