//! On-disk format for the HNSW graph.
//!
//! Four files, matching spec §6's on-disk layout (names are this
//! implementation's choice; the spec only requires there be exactly four):
//!
//! - `header.bin` — fixed-size struct: format version, dim, M, `ef_construction`,
//!   capacity, layer count, max layer, entry point.
//! - `data_level0.bin` — per label: an occupied flag, a deleted flag, and
//!   (if occupied) `dim` little-endian f32s.
//! - `length.bin` — per layer, per label: a `u32` neighbor count.
//! - `link_lists.bin` — per layer, per label: that many `u64` neighbor labels,
//!   in the same order `length.bin` describes.
//!
//! `header.bin`'s version field is checked on load; an unrecognized version
//! is refused rather than guessed at (spec §9, "pickled snapshot → explicit
//! framed format" — the same framing discipline applies to the graph files).

use super::native::{GraphSnapshot, Label, NativeGraph};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Bumped whenever the on-disk layout changes incompatibly.
const FORMAT_VERSION: u32 = 1;

const HEADER_FILE: &str = "header.bin";
const DATA_FILE: &str = "data_level0.bin";
const LENGTH_FILE: &str = "length.bin";
const LINKS_FILE: &str = "link_lists.bin";

/// The four file names this module owns, for callers sizing fd budgets
/// (spec §5: "file handle count per segment is fixed at 5").
pub const GRAPH_FILE_NAMES: [&str; 4] = [HEADER_FILE, DATA_FILE, LENGTH_FILE, LINKS_FILE];

fn io_err(e: std::io::Error) -> Error {
    Error::PersistenceFailure(e.to_string())
}

/// Writes the graph's four files into `dir`, which must already exist.
pub(crate) fn save(dir: &Path, graph: &NativeGraph) -> Result<()> {
    let snapshot = graph.snapshot();

    write_header(dir, &snapshot)?;
    write_data_level0(dir, &snapshot)?;
    write_length(dir, &snapshot)?;
    write_link_lists(dir, &snapshot)?;
    Ok(())
}

/// Loads a graph from `dir` if all four files are present; returns `None`
/// if the directory has no graph yet (a brand-new segment).
pub(crate) fn load(dir: &Path, metric: DistanceMetric) -> Result<Option<NativeGraph>> {
    if !dir.join(HEADER_FILE).exists() {
        return Ok(None);
    }

    let header = read_header(dir)?;
    let vectors = read_data_level0(dir, header.capacity, header.dim)?;
    let lengths = read_length(dir, header.num_layers, header.capacity)?;
    let layers = read_link_lists(dir, &lengths)?;

    let snapshot = GraphSnapshot {
        dim: header.dim,
        m: header.m,
        ef_construction: header.ef_construction,
        capacity: header.capacity,
        entry_point: header.entry_point,
        max_layer: header.max_layer,
        vectors,
        deleted: header.deleted,
        layers,
    };

    Ok(Some(NativeGraph::from_snapshot(metric, snapshot)))
}

struct Header {
    dim: usize,
    m: usize,
    ef_construction: usize,
    capacity: usize,
    num_layers: usize,
    max_layer: usize,
    entry_point: Option<Label>,
    deleted: rustc_hash::FxHashSet<Label>,
}

fn write_header(dir: &Path, snapshot: &GraphSnapshot) -> Result<()> {
    let mut w = BufWriter::new(File::create(dir.join(HEADER_FILE)).map_err(io_err)?);
    w.write_all(&FORMAT_VERSION.to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.dim as u64).to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.m as u64).to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.ef_construction as u64).to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.capacity as u64).to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.layers.len() as u64).to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.max_layer as u64).to_le_bytes()).map_err(io_err)?;
    let entry_point = snapshot.entry_point.map_or(-1i64, |e| e as i64);
    w.write_all(&entry_point.to_le_bytes()).map_err(io_err)?;
    w.write_all(&(snapshot.deleted.len() as u64).to_le_bytes()).map_err(io_err)?;
    for &label in &snapshot.deleted {
        w.write_all(&(label as u64).to_le_bytes()).map_err(io_err)?;
    }
    w.flush().map_err(io_err)
}

fn read_header(dir: &Path) -> Result<Header> {
    let mut r = BufReader::new(File::open(dir.join(HEADER_FILE)).map_err(io_err)?);

    let version = read_u32(&mut r)?;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedSnapshotVersion {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let dim = read_u64(&mut r)? as usize;
    let m = read_u64(&mut r)? as usize;
    let ef_construction = read_u64(&mut r)? as usize;
    let capacity = read_u64(&mut r)? as usize;
    let num_layers = read_u64(&mut r)? as usize;
    let max_layer = read_u64(&mut r)? as usize;
    let entry_point_raw = read_i64(&mut r)?;
    let entry_point = if entry_point_raw < 0 {
        None
    } else {
        Some(entry_point_raw as usize)
    };
    let deleted_count = read_u64(&mut r)? as usize;
    let mut deleted = rustc_hash::FxHashSet::default();
    deleted.reserve(deleted_count);
    for _ in 0..deleted_count {
        deleted.insert(read_u64(&mut r)? as usize);
    }

    Ok(Header {
        dim,
        m,
        ef_construction,
        capacity,
        num_layers,
        max_layer,
        entry_point,
        deleted,
    })
}

fn write_data_level0(dir: &Path, snapshot: &GraphSnapshot) -> Result<()> {
    let mut w = BufWriter::new(File::create(dir.join(DATA_FILE)).map_err(io_err)?);
    for slot in &snapshot.vectors {
        match slot {
            Some(vector) => {
                w.write_all(&[1u8]).map_err(io_err)?;
                for x in vector {
                    w.write_all(&x.to_le_bytes()).map_err(io_err)?;
                }
            }
            None => w.write_all(&[0u8]).map_err(io_err)?,
        }
    }
    w.flush().map_err(io_err)
}

fn read_data_level0(dir: &Path, capacity: usize, dim: usize) -> Result<Vec<Option<Vec<f32>>>> {
    let mut r = BufReader::new(File::open(dir.join(DATA_FILE)).map_err(io_err)?);
    let mut out = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag).map_err(io_err)?;
        if flag[0] == 0 {
            out.push(None);
            continue;
        }
        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf).map_err(io_err)?;
            vector.push(f32::from_le_bytes(buf));
        }
        out.push(Some(vector));
    }
    Ok(out)
}

fn write_length(dir: &Path, snapshot: &GraphSnapshot) -> Result<()> {
    let mut w = BufWriter::new(File::create(dir.join(LENGTH_FILE)).map_err(io_err)?);
    for layer in &snapshot.layers {
        for neighbors in layer {
            w.write_all(&(neighbors.len() as u32).to_le_bytes()).map_err(io_err)?;
        }
    }
    w.flush().map_err(io_err)
}

fn read_length(dir: &Path, num_layers: usize, capacity: usize) -> Result<Vec<Vec<u32>>> {
    let mut r = BufReader::new(File::open(dir.join(LENGTH_FILE)).map_err(io_err)?);
    let mut out = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let mut layer_lengths = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            layer_lengths.push(read_u32(&mut r)?);
        }
        out.push(layer_lengths);
    }
    Ok(out)
}

fn write_link_lists(dir: &Path, snapshot: &GraphSnapshot) -> Result<()> {
    let mut w = BufWriter::new(File::create(dir.join(LINKS_FILE)).map_err(io_err)?);
    for layer in &snapshot.layers {
        for neighbors in layer {
            for &label in neighbors {
                w.write_all(&(label as u64).to_le_bytes()).map_err(io_err)?;
            }
        }
    }
    w.flush().map_err(io_err)
}

fn read_link_lists(dir: &Path, lengths: &[Vec<u32>]) -> Result<Vec<Vec<Vec<Label>>>> {
    let mut r = BufReader::new(File::open(dir.join(LINKS_FILE)).map_err(io_err)?);
    let mut layers = Vec::with_capacity(lengths.len());
    for layer_lengths in lengths {
        let mut layer = Vec::with_capacity(layer_lengths.len());
        for &count in layer_lengths {
            let mut neighbors = Vec::with_capacity(count as usize);
            for _ in 0..count {
                neighbors.push(read_u64(&mut r)? as usize);
            }
            layer.push(neighbors);
        }
        layers.push(layer);
    }
    Ok(layers)
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(i64::from_le_bytes(buf))
}
