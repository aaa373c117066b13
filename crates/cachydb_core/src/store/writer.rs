//! Binary collection file writer.

use super::{sync_dir, DATA_FILE, OFFSET_INDEX_FILE};
use crate::document::Document;
use crate::error::{DbError, Result};
use cachydb_codec::{compress, frame, FileHeader};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes a fresh `collection.data` + `collection.idx` pair.
///
/// The writer appends documents to temporary files; nothing becomes visible
/// until [`CollectionWriter::finish`] renames them into place. Document
/// offsets are recorded as records are written and land in the offset index.
pub struct CollectionWriter {
    dir: PathBuf,
    file: BufWriter<File>,
    header: FileHeader,
    offsets: HashMap<String, u64>,
    position: u64,
}

impl CollectionWriter {
    /// Starts a rewrite of the collection in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let header = FileHeader::new();
        let tmp_path = dir.join(format!("{DATA_FILE}.tmp"));
        let mut file = BufWriter::new(File::create(&tmp_path)?);
        header.write_to(&mut file)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            header,
            offsets: HashMap::new(),
            position: cachydb_codec::header::HEADER_SIZE as u64,
        })
    }

    /// Appends one document record and remembers its offset.
    pub fn write(&mut self, doc: &Document) -> Result<()> {
        let json = serde_json::to_vec(doc).map_err(|e| {
            DbError::internal(format!("failed to encode document '{}': {e}", doc.id()))
        })?;
        let payload = if self.header.compressed() {
            compress::compress(&json)?
        } else {
            json
        };

        self.offsets.insert(doc.id().to_string(), self.position);
        frame::write_to(&mut self.file, &payload)?;
        self.position += (frame::PREFIX_SIZE + payload.len()) as u64;
        Ok(())
    }

    /// Number of documents written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no documents have been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Makes the rewrite durable: fsync, rename over the live files, fsync
    /// the directory.
    pub fn finish(self) -> Result<()> {
        let Self {
            dir, file, offsets, ..
        } = self;

        let inner = file
            .into_inner()
            .map_err(|e| DbError::Io(e.into_error()))?;
        inner.sync_all()?;
        drop(inner);
        fs::rename(dir.join(format!("{DATA_FILE}.tmp")), dir.join(DATA_FILE))?;

        // Offset index: one framed record holding the JSON offset map
        let offsets_json = serde_json::to_vec(&offsets)
            .map_err(|e| DbError::internal(format!("failed to encode offset index: {e}")))?;
        let idx_tmp = dir.join(format!("{OFFSET_INDEX_FILE}.tmp"));
        let mut idx_file = File::create(&idx_tmp)?;
        idx_file.write_all(&frame::encode(&offsets_json))?;
        idx_file.sync_all()?;
        drop(idx_file);
        fs::rename(idx_tmp, dir.join(OFFSET_INDEX_FILE))?;

        sync_dir(&dir)
    }
}

/// Rewrites the collection in `dir` from an in-memory snapshot.
pub fn flush_all(dir: &Path, docs: &[Document]) -> Result<()> {
    let mut writer = CollectionWriter::create(dir)?;
    for doc in docs {
        writer.write(doc)?;
    }
    writer.finish()
}
