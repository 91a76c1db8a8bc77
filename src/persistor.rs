//! On-disk durability: HNSW graph pages, the metadata sidecar, and the
//! applied-offset watermark (spec §4.5).
//!
//! The metadata snapshot is spec §9's "pickled snapshot → explicit framed
//! format": a `u32` version at offset 0 (rejecting unknown versions), then
//! the fields in the stable order spec §4.5 lists, each map length-prefixed.
//! The commit point is the `metadata.snap.tmp` → `metadata.snap` rename.

use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::id_maps::IdMaps;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const METADATA_FORMAT_VERSION: u32 = 1;
const METADATA_FILE: &str = "metadata.snap";
const METADATA_TMP_FILE: &str = "metadata.snap.tmp";

/// The sidecar snapshot content, in the field order spec §4.5 names.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSnapshot {
    pub dim: Option<usize>,
    pub next_label: usize,
    pub max_applied_offset: Option<u64>,
    pub id_to_label: HashMap<String, usize>,
    pub id_to_offset: HashMap<String, u64>,
}

/// Writes HNSW graph files + the metadata sidecar under one directory.
#[derive(Debug)]
pub struct Persistor {
    dir: PathBuf,
}

impl Persistor {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// `persist()` (spec §4.5): flush dirty HNSW pages, then commit the
    /// metadata snapshot via write-temp-then-rename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceFailure`] on any I/O error from either
    /// step.
    pub fn persist(&self, hnsw: &HnswIndex, id_maps: &IdMaps, max_applied_offset: Option<u64>, dim: Option<usize>) -> Result<()> {
        hnsw.persist_dirty()?;

        let snapshot = MetadataSnapshot {
            dim,
            next_label: id_maps.next_label(),
            max_applied_offset,
            id_to_label: id_maps.id_to_label_map().clone(),
            id_to_offset: id_maps.id_to_offset_map().clone(),
        };
        self.write_snapshot(&snapshot)?;
        info!(ids = snapshot.id_to_label.len(), "segment metadata persisted");
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &MetadataSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp_path = self.dir.join(METADATA_TMP_FILE);
        {
            let file = File::create(&tmp_path).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            write_snapshot_bytes(&mut writer, snapshot).map_err(io_err)?;
            writer.flush().map_err(io_err)?;
        }
        std::fs::rename(&tmp_path, self.metadata_path()).map_err(io_err)?;
        Ok(())
    }

    /// Loads the metadata snapshot, or `None` if this segment has never
    /// persisted (spec §4.5 recovery step 1).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSnapshotVersion`] if the file carries an
    /// unknown format version, or [`Error::PersistenceFailure`] on I/O or
    /// truncation errors.
    pub fn load(&self) -> Result<Option<MetadataSnapshot>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(io_err)?;
        let mut reader = BufReader::new(file);
        Ok(Some(read_snapshot_bytes(&mut reader)?))
    }

    /// Removes the segment directory entirely. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceFailure`] on I/O errors other than the
    /// directory already being absent.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::PersistenceFailure(e.to_string())
}

fn write_snapshot_bytes<W: Write>(w: &mut W, snapshot: &MetadataSnapshot) -> std::io::Result<()> {
    w.write_all(&METADATA_FORMAT_VERSION.to_le_bytes())?;
    write_optional_u64(w, snapshot.dim.map(|d| d as u64))?;
    w.write_all(&(snapshot.next_label as u64).to_le_bytes())?;
    write_optional_u64(w, snapshot.max_applied_offset)?;

    let id_to_label: HashMap<String, u64> = snapshot.id_to_label.iter().map(|(k, &v)| (k.clone(), v as u64)).collect();
    write_string_to_u64_map(w, &id_to_label)?;
    write_string_to_u64_map(w, &snapshot.id_to_offset)?;
    Ok(())
}

fn write_optional_u64<W: Write>(w: &mut W, value: Option<u64>) -> std::io::Result<()> {
    match value {
        Some(v) => {
            w.write_all(&[1u8])?;
            w.write_all(&v.to_le_bytes())?;
        }
        None => w.write_all(&[0u8])?,
    }
    Ok(())
}

fn write_string_to_u64_map<W: Write>(w: &mut W, map: &HashMap<String, u64>) -> std::io::Result<()> {
    w.write_all(&(map.len() as u64).to_le_bytes())?;
    for (key, value) in map {
        let key_bytes = key.as_bytes();
        w.write_all(&(key_bytes.len() as u32).to_le_bytes())?;
        w.write_all(key_bytes)?;
        w.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_snapshot_bytes<R: Read>(r: &mut R) -> Result<MetadataSnapshot> {
    let version = read_u32(r)?;
    if version != METADATA_FORMAT_VERSION {
        return Err(Error::UnsupportedSnapshotVersion {
            expected: METADATA_FORMAT_VERSION,
            found: version,
        });
    }
    let dim = read_optional_u64(r)?.map(|v| v as usize);
    let next_label = read_u64(r)? as usize;
    let max_applied_offset = read_optional_u64(r)?;
    let id_to_label = read_string_to_u64_map(r)?.into_iter().map(|(k, v)| (k, v as usize)).collect();
    let id_to_offset = read_string_to_u64_map(r)?;

    Ok(MetadataSnapshot {
        dim,
        next_label,
        max_applied_offset,
        id_to_label,
        id_to_offset,
    })
}

fn read_optional_u64<R: Read>(r: &mut R) -> Result<Option<u64>> {
    let mut flag = [0u8; 1];
    r.read_exact(&mut flag).map_err(io_err)?;
    if flag[0] == 0 {
        Ok(None)
    } else {
        Ok(Some(read_u64(r)?))
    }
}

fn read_string_to_u64_map<R: Read>(r: &mut R) -> Result<HashMap<String, u64>> {
    let count = read_u64(r)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key_len = read_u32(r)? as usize;
        let mut key_bytes = vec![0u8; key_len];
        r.read_exact(&mut key_bytes).map_err(io_err)?;
        let key = String::from_utf8(key_bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        let value = read_u64(r)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
#[path = "persistor_tests.rs"]
mod persistor_tests;
