//! On-disk binary collection store.
//!
//! A collection directory holds:
//! - `collection.data`: file header followed by framed document records,
//!   each payload `gzip(JSON(document))` when the header's gzip flag is set
//! - `collection.idx`: a single framed record containing the JSON offset
//!   map `{document id -> byte offset of its record in collection.data}`
//! - `collection.meta.json`: name, schema, index definitions, format
//! - `indexes/`: persisted secondary indexes
//!
//! Rewrites are atomic: content goes to a `.tmp` file which is fsynced and
//! renamed over the live file, then the directory is fsynced.

mod reader;
mod writer;

pub use reader::{CollectionReader, DocumentScan};
pub use writer::{flush_all, CollectionWriter};

/// Name of the binary document file.
pub const DATA_FILE: &str = "collection.data";

/// Name of the offset index file.
pub const OFFSET_INDEX_FILE: &str = "collection.idx";

/// Name of the collection metadata file.
pub const META_FILE: &str = "collection.meta.json";

/// Name of the legacy plain-JSON document file.
pub const LEGACY_DOCS_FILE: &str = "documents.json";

use crate::error::Result;
use std::fs::File;
use std::path::Path;

/// Fsyncs a directory so renames and removals inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

/// On non-Unix platforms directory fsync is unavailable; the file system's
/// metadata journaling covers the rename.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use cachydb_codec::Value;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn doc(id: &str, n: f64) -> Document {
        Document::with_id(id, BTreeMap::from([("n".to_string(), Value::from(n))]))
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let docs = vec![doc("a", 1.0), doc("b", 2.0), doc("c", 3.0)];
        flush_all(dir.path(), &docs).unwrap();

        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        assert_eq!(reader.len(), 3);
        let b = reader.read("b").unwrap();
        assert_eq!(b.get("n"), Some(Value::from(2.0)));
    }

    #[test]
    fn scan_yields_all_documents() {
        let dir = tempdir().unwrap();
        let docs = vec![doc("a", 1.0), doc("b", 2.0)];
        flush_all(dir.path(), &docs).unwrap();

        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        let scanned: Vec<Document> = reader.scan().unwrap().map(|d| d.unwrap()).collect();
        assert_eq!(scanned.len(), 2);
        assert!(scanned.iter().any(|d| d.id() == "a"));
        assert!(scanned.iter().any(|d| d.id() == "b"));
    }

    #[test]
    fn missing_data_file_opens_as_none() {
        let dir = tempdir().unwrap();
        assert!(CollectionReader::open(dir.path()).unwrap().is_none());
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let dir = tempdir().unwrap();
        flush_all(dir.path(), &[doc("a", 1.0), doc("b", 2.0)]).unwrap();
        flush_all(dir.path(), &[doc("c", 3.0)]).unwrap();

        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        assert_eq!(reader.len(), 1);
        assert!(reader.read("a").is_err());
        assert!(reader.read("c").is_ok());
    }

    #[test]
    fn offset_index_is_rebuilt_when_missing() {
        let dir = tempdir().unwrap();
        flush_all(dir.path(), &[doc("a", 1.0), doc("b", 2.0)]).unwrap();
        std::fs::remove_file(dir.path().join(OFFSET_INDEX_FILE)).unwrap();

        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read("a").unwrap().get("n"), Some(Value::from(1.0)));
    }

    #[test]
    fn corrupted_data_file_is_rejected() {
        let dir = tempdir().unwrap();
        flush_all(dir.path(), &[doc("a", 1.0)]).unwrap();

        // Flip a byte inside the framed record, past the file header
        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        assert!(reader.read("a").is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        flush_all(dir.path(), &[doc("a", 1.0)]).unwrap();

        let path = dir.path().join(DATA_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(CollectionReader::open(dir.path()).is_err());
    }

    #[test]
    fn empty_collection_roundtrip() {
        let dir = tempdir().unwrap();
        flush_all(dir.path(), &[]).unwrap();
        let reader = CollectionReader::open(dir.path()).unwrap().unwrap();
        assert_eq!(reader.len(), 0);
        assert_eq!(reader.scan().unwrap().count(), 0);
    }
}
