//! On-disk snapshot format for the vector store.
//!
//! The index and the document metadata are written together as one file so
//! that they can never be observed out of step:
//!
//! ```text
//! [magic "DSKI"][u32 version][u32 dimension][u64 vector count]
//! [count * dimension f32 values]
//! [u64 metadata length][metadata JSON]
//! [u32 CRC32 of everything above]
//! ```
//!
//! All integers and floats are little-endian. Writes go to a temp file that
//! is renamed into place.


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::StoreError;
use super::index::FlatIndex;
use super::record::DocumentRecord;

pub const SNAPSHOT_FILE: &str = "index.dsk";
const SNAPSHOT_TMP_FILE: &str = "index.dsk.tmp";
const MAGIC: &[u8; 4] = b"DSKI";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const FOOTER_LEN: usize = 4;

#[derive(Serialize)]
struct MetadataSectionRef<'a> {
    doc_count: u64,
    documents: &'a BTreeMap<u64, DocumentRecord>,
}

#[derive(Deserialize)]
struct MetadataSection {
    doc_count: u64,
    documents: BTreeMap<u64, DocumentRecord>,
}

/// Decoded contents of a snapshot file
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub index: FlatIndex,
    pub documents: BTreeMap<u64, DocumentRecord>,
    pub doc_count: u64,
}

#[inline]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Serialize the index and documents into the snapshot byte format
#[inline]
pub fn encode(
    index: &FlatIndex,
    documents: &BTreeMap<u64, DocumentRecord>,
    doc_count: u64,
) -> Result<Vec<u8>, StoreError> {
    let metadata = serde_json::to_vec(&MetadataSectionRef {
        doc_count,
        documents,
    })?;

    let dimension = u32::try_from(index.dimension())
        .map_err(|_| StoreError::InvalidSnapshot("dimension exceeds u32".to_string()))?;
    let vectors = index.as_flat();

    let mut out =
        Vec::with_capacity(HEADER_LEN + vectors.len() * 4 + 8 + metadata.len() + FOOTER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&dimension.to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for value in vectors {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&(metadata.len() as u64).to_le_bytes());
    out.extend_from_slice(&metadata);

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Parse and verify snapshot bytes for a store of `expected_dimension`
#[inline]
pub fn decode(bytes: &[u8], expected_dimension: usize) -> Result<Snapshot, StoreError> {
    if bytes.len() < HEADER_LEN + 8 + FOOTER_LEN {
        return Err(StoreError::InvalidSnapshot(format!(
            "file is too short ({} bytes)",
            bytes.len()
        )));
    }

    let (body, footer) = bytes.split_at(bytes.len() - FOOTER_LEN);
    let stored = read_u32(footer, 0)?;
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch { stored, computed });
    }

    if body.get(..4) != Some(MAGIC.as_slice()) {
        return Err(StoreError::InvalidSnapshot("bad magic bytes".to_string()));
    }

    let version = read_u32(body, 4)?;
    if version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }

    let dimension = read_u32(body, 8)? as usize;
    if dimension != expected_dimension {
        return Err(StoreError::DimensionMismatch {
            expected: expected_dimension,
            actual: dimension,
        });
    }

    let count = usize::try_from(read_u64(body, 12)?)
        .map_err(|_| StoreError::InvalidSnapshot("vector count overflows".to_string()))?;
    let vector_bytes = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| StoreError::InvalidSnapshot("vector section overflows".to_string()))?;

    let vectors_end = HEADER_LEN + vector_bytes;
    let vector_section = body
        .get(HEADER_LEN..vectors_end)
        .ok_or_else(|| StoreError::InvalidSnapshot("vector section truncated".to_string()))?;
    let vectors: Vec<f32> = vector_section
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let metadata_len = usize::try_from(read_u64(body, vectors_end)?)
        .map_err(|_| StoreError::InvalidSnapshot("metadata length overflows".to_string()))?;
    let metadata_start = vectors_end + 8;
    let metadata_bytes = body
        .get(metadata_start..)
        .filter(|rest| rest.len() == metadata_len)
        .ok_or_else(|| StoreError::InvalidSnapshot("metadata section length mismatch".to_string()))?;
    let metadata: MetadataSection = serde_json::from_slice(metadata_bytes)?;

    let index = FlatIndex::from_flat(dimension, vectors)?;
    let snapshot = Snapshot {
        index,
        documents: metadata.documents,
        doc_count: metadata.doc_count,
    };
    snapshot.verify()?;

    Ok(snapshot)
}

impl Snapshot {
    /// Check that the count, the records and the vectors all agree
    #[inline]
    pub fn verify(&self) -> Result<(), StoreError> {
        let vectors = self.index.len();
        let records = self.documents.len();
        if self.doc_count as usize != records || records != vectors {
            return Err(StoreError::Corrupted {
                doc_count: self.doc_count,
                records,
                vectors,
            });
        }
        if let Some((key, record)) = self
            .documents
            .iter()
            .find(|(key, record)| **key != record.id || **key >= self.doc_count)
        {
            return Err(StoreError::InvalidSnapshot(format!(
                "document key {} does not match record id {}",
                key, record.id
            )));
        }
        Ok(())
    }
}

/// Atomically replace the snapshot in `dir` with `bytes`
#[inline]
pub async fn write(dir: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    fs::create_dir_all(dir).await?;

    let tmp_path = dir.join(SNAPSHOT_TMP_FILE);
    let path = snapshot_path(dir);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, &path).await?;

    info!("Saved vector store snapshot ({} bytes) to {}", bytes.len(), path.display());
    Ok(())
}

/// Read the snapshot bytes from `dir`, if a snapshot exists
#[inline]
pub async fn read(dir: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    let path = snapshot_path(dir);
    match fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} snapshot bytes from {}", bytes.len(), path.display());
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete the snapshot and any leftover temp file
#[inline]
pub async fn remove(dir: &Path) -> Result<(), StoreError> {
    for path in [snapshot_path(dir), dir.join(SNAPSHOT_TMP_FILE)] {
        match fs::remove_file(&path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, StoreError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StoreError::InvalidSnapshot(format!("truncated at offset {offset}")))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, StoreError> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| StoreError::InvalidSnapshot(format!("truncated at offset {offset}")))
}
