//! Binary collection file reader.

use super::{DATA_FILE, OFFSET_INDEX_FILE};
use crate::document::Document;
use crate::error::{DbError, Result};
use cachydb_codec::{compress, frame, header::HEADER_SIZE, FileHeader};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads documents from a `collection.data` file.
///
/// Opening validates the file header and loads the offset map from
/// `collection.idx`; if the offset index is missing it is rebuilt by
/// scanning the data file.
pub struct CollectionReader {
    data_path: PathBuf,
    header: FileHeader,
    offsets: HashMap<String, u64>,
}

impl CollectionReader {
    /// Opens the collection store in `dir`.
    ///
    /// Returns `Ok(None)` when no data file exists yet, as for a collection
    /// that was created but never flushed.
    pub fn open(dir: &Path) -> Result<Option<Self>> {
        let data_path = dir.join(DATA_FILE);
        let mut file = match File::open(&data_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let header = FileHeader::read_from(&mut file).map_err(|e| {
            DbError::corrupt_data(format!("{}: {e}", data_path.display()))
        })?;

        let offsets = match Self::load_offset_index(dir)? {
            Some(offsets) => offsets,
            None => Self::rebuild_offsets(&mut file, &header, &data_path)?,
        };

        Ok(Some(Self {
            data_path,
            header,
            offsets,
        }))
    }

    /// The parsed file header.
    #[must_use]
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Number of documents in the offset map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Reads a single document by ID through the offset map.
    pub fn read(&self, id: &str) -> Result<Document> {
        let offset = *self.offsets.get(id).ok_or_else(|| {
            DbError::not_found(format!(
                "document '{id}' in {}",
                self.data_path.display()
            ))
        })?;

        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(offset))?;
        let payload = frame::read_from(&mut file)
            .map_err(|e| DbError::corrupt_data(format!("{}: {e}", self.data_path.display())))?
            .ok_or_else(|| {
                DbError::corrupt_data(format!(
                    "{}: offset {offset} points past end of file",
                    self.data_path.display()
                ))
            })?;
        decode_document(&payload, self.header.compressed(), &self.data_path)
    }

    /// Streams every document in file order.
    pub fn scan(&self) -> Result<DocumentScan> {
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(DocumentScan {
            reader: BufReader::new(file),
            compressed: self.header.compressed(),
            path: self.data_path.clone(),
            done: false,
        })
    }

    fn load_offset_index(dir: &Path) -> Result<Option<HashMap<String, u64>>> {
        let idx_path = dir.join(OFFSET_INDEX_FILE);
        let bytes = match std::fs::read(&idx_path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (payload, _) = frame::decode(&bytes)
            .map_err(|e| DbError::corrupt_data(format!("{}: {e}", idx_path.display())))?;
        let offsets = serde_json::from_slice(&payload)
            .map_err(|e| DbError::corrupt_data(format!("{}: {e}", idx_path.display())))?;
        Ok(Some(offsets))
    }

    /// Walks the data file recording each record's offset.
    fn rebuild_offsets(
        file: &mut File,
        header: &FileHeader,
        path: &Path,
    ) -> Result<HashMap<String, u64>> {
        let mut offsets = HashMap::new();
        let mut position = HEADER_SIZE as u64;
        file.seek(SeekFrom::Start(position))?;
        let mut reader = BufReader::new(file);

        while let Some(payload) = frame::read_from(&mut reader)
            .map_err(|e| DbError::corrupt_data(format!("{}: {e}", path.display())))?
        {
            let doc = decode_document(&payload, header.compressed(), path)?;
            offsets.insert(doc.id().to_string(), position);
            position += (frame::PREFIX_SIZE + payload.len()) as u64;
        }
        Ok(offsets)
    }
}

/// Fallible streaming iterator over a collection data file.
pub struct DocumentScan {
    reader: BufReader<File>,
    compressed: bool,
    path: PathBuf,
    done: bool,
}

impl Iterator for DocumentScan {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match frame::read_from(&mut self.reader) {
            Ok(None) => {
                self.done = true;
                None
            }
            Ok(Some(payload)) => {
                Some(decode_document(&payload, self.compressed, &self.path))
            }
            Err(e) => {
                self.done = true;
                Some(Err(DbError::corrupt_data(format!(
                    "{}: {e}",
                    self.path.display()
                ))))
            }
        }
    }
}

fn decode_document(payload: &[u8], compressed: bool, path: &Path) -> Result<Document> {
    let json = if compressed {
        compress::decompress(payload)
            .map_err(|e| DbError::corrupt_data(format!("{}: {e}", path.display())))?
    } else {
        payload.to_vec()
    };
    serde_json::from_slice(&json)
        .map_err(|e| DbError::corrupt_data(format!("{}: invalid document JSON: {e}", path.display())))
}
