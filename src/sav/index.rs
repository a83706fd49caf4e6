//! Binning index over BGZF virtual offsets.
//!
//! The index maps `(chromosome, bin)` to the virtual-offset chunks covering
//! that bin, using the CSI binning scheme (configurable `min_shift`/`depth`,
//! defaults 14 and 5: a hierarchy from one whole-sequence bin down to 16 kbp
//! leaves). A region query resolves to the candidate bins of every level,
//! collects their chunks, and merges overlaps; the reader then seeks to the
//! first chunk and filters records positionally.
//!
//! On disk the index is a fixed 32-byte header followed by a
//! zstd-compressed payload:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ magic ("SAVINDEX")          │ 8 bytes
//! │ indexed file size           │ 8 bytes
//! │ min_shift, depth            │ 4 + 4 bytes
//! │ reserved                    │ 8 bytes
//! ├─────────────────────────────┤
//! │ reference count             │ u32      ┐
//! │ per reference:              │          │ zstd-compressed
//! │   name, bins, chunks        │          ┘
//! └─────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use noodles::bgzf;
use zstd::{Decoder, Encoder};

use crate::error::{IndexError, Result};
use crate::marker::Marker;

use super::header::SavHeader;

/// Magic number designating an index file ("SAVINDEX").
pub const INDEX_MAGIC: u64 = 0x5845_444e_4956_4153;

/// Size of the fixed index header in bytes.
pub const SIZE_INDEX_HEADER: usize = 32;

/// Default base bin width exponent (2^14 = 16 kbp leaves).
pub const MIN_SHIFT: i32 = 14;

/// Default number of binning levels below the root.
pub const DEPTH: i32 = 5;

const RESERVED_BYTES: [u8; 8] = [42; 8];

/// Companion index path for a SAV file (`<path>.svi`).
#[must_use]
pub fn index_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".svi");
    p.into()
}

/// A half-open range of BGZF virtual offsets covering part of a bin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Virtual offset of the first covered record.
    pub start: u64,
    /// Virtual offset just past the last covered record.
    pub end: u64,
}

impl Chunk {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Index data for one reference sequence.
#[derive(Clone, Debug, Default)]
struct ReferenceIndex {
    name: String,
    bins: HashMap<u32, Vec<Chunk>>,
}

/// Binning index for one SAV file.
#[derive(Clone, Debug)]
pub struct SavIndex {
    /// Size in bytes of the indexed file, used to detect stale indexes.
    data_size: u64,
    min_shift: i32,
    depth: i32,
    refs: Vec<ReferenceIndex>,
}

impl SavIndex {
    /// Creates an empty index for a data file of `data_size` bytes.
    #[must_use]
    pub fn new(data_size: u64) -> Self {
        Self {
            data_size,
            min_shift: MIN_SHIFT,
            depth: DEPTH,
            refs: Vec::new(),
        }
    }

    /// Reference sequence names, in first-seen order.
    #[must_use]
    pub fn chromosomes(&self) -> Vec<String> {
        self.refs.iter().map(|r| r.name.clone()).collect()
    }

    #[must_use]
    pub fn n_refs(&self) -> usize {
        self.refs.len()
    }

    /// Records one marker: the record spans `[chunk.start, chunk.end)` in
    /// the file and sits at 1-based `position` on `chrom`.
    fn add_record(&mut self, chrom: &str, position: u64, chunk: Chunk) {
        let pos0 = position.saturating_sub(1);
        let bin = reg2bin(pos0, pos0, self.min_shift, self.depth);
        let reference = match self.refs.iter_mut().position(|r| r.name == chrom) {
            Some(i) => &mut self.refs[i],
            None => {
                self.refs.push(ReferenceIndex {
                    name: chrom.to_string(),
                    bins: HashMap::new(),
                });
                self.refs.last_mut().expect("just pushed")
            }
        };
        reference.bins.entry(bin).or_default().push(chunk);
    }

    /// Resolves a 1-based half-open region `[begin, end)` on `chrom` to the
    /// merged chunks that may contain matching records.
    ///
    /// An unknown chromosome yields no chunks (an empty result, not an
    /// error), as does an empty interval.
    #[must_use]
    pub fn query(&self, chrom: &str, begin: u64, end: u64) -> Vec<Chunk> {
        let Some(reference) = self.refs.iter().find(|r| r.name == chrom) else {
            return Vec::new();
        };
        if end <= begin.max(1) {
            return Vec::new();
        }
        let beg0 = begin.max(1) - 1;
        let end0 = end - 2; // inclusive 0-based end of [begin, end)

        let mut chunks = Vec::new();
        for bin in reg2bins(beg0, end0, self.min_shift, self.depth) {
            if let Some(bin_chunks) = reference.bins.get(&bin) {
                chunks.extend_from_slice(bin_chunks);
            }
        }
        chunks.sort_by_key(|c| c.start);
        merge_chunks(&chunks)
    }

    /// Builds an index by scanning a finished SAV file.
    pub fn from_sav<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let data_size = file.metadata()?.len();
        let mut reader = bgzf::Reader::new(file);

        let header = SavHeader::read_from(&mut reader)?;
        let mut index = Self::new(data_size);
        loop {
            let start = u64::from(reader.virtual_position());
            let Some(marker) = Marker::read_from(
                &mut reader,
                header.haplotype_count(),
                header.info_fields(),
            )?
            else {
                break;
            };
            let end = u64::from(reader.virtual_position());
            index.add_record(header.chromosome(), marker.position(), Chunk::new(start, end));
        }
        Ok(index)
    }

    /// Saves the index to a file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = File::create(path).map(BufWriter::new)?;
        writer.write_u64::<LittleEndian>(INDEX_MAGIC)?;
        writer.write_u64::<LittleEndian>(self.data_size)?;
        writer.write_i32::<LittleEndian>(self.min_shift)?;
        writer.write_i32::<LittleEndian>(self.depth)?;
        writer.write_all(&RESERVED_BYTES)?;

        let mut writer = Encoder::new(writer, 3)?.auto_finish();
        writer.write_u32::<LittleEndian>(self.refs.len() as u32)?;
        for reference in &self.refs {
            writer.write_u32::<LittleEndian>(reference.name.len() as u32)?;
            writer.write_all(reference.name.as_bytes())?;

            let mut bins: Vec<(&u32, &Vec<Chunk>)> = reference.bins.iter().collect();
            bins.sort_by_key(|(id, _)| **id);
            writer.write_u32::<LittleEndian>(bins.len() as u32)?;
            for (id, chunks) in bins {
                writer.write_u32::<LittleEndian>(*id)?;
                writer.write_u32::<LittleEndian>(chunks.len() as u32)?;
                for chunk in chunks {
                    writer.write_u64::<LittleEndian>(chunk.start)?;
                    writer.write_u64::<LittleEndian>(chunk.end)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads an index file, verifying it still matches its data file.
    ///
    /// The data file path is recovered by stripping the `.svi` suffix; a
    /// size mismatch means the data file was rewritten after indexing.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data_path: PathBuf = match path.to_str().and_then(|p| p.strip_suffix(".svi")) {
            Some(stripped) => PathBuf::from(stripped),
            None => return Err(IndexError::MissingDataFile(path.to_path_buf()).into()),
        };
        if !data_path.exists() {
            return Err(IndexError::MissingDataFile(data_path).into());
        }
        let data_size = data_path.metadata()?.len();

        let mut reader = File::open(path).map(BufReader::new)?;
        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(magic).into());
        }
        let stored_size = reader.read_u64::<LittleEndian>()?;
        if stored_size != data_size {
            return Err(IndexError::ByteSizeMismatch(data_size, stored_size).into());
        }
        let min_shift = reader.read_i32::<LittleEndian>()?;
        let depth = reader.read_i32::<LittleEndian>()?;
        if min_shift <= 0 || depth <= 0 {
            return Err(IndexError::InvalidBinning(min_shift, depth).into());
        }
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;

        let mut reader = Decoder::new(reader)?;
        let n_refs = reader.read_u32::<LittleEndian>()?;
        let mut refs = Vec::with_capacity(n_refs as usize);
        for _ in 0..n_refs {
            let name_len = reader.read_u32::<LittleEndian>()?;
            let mut name = vec![0u8; name_len as usize];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| crate::error::ReadError::InvalidString)?;

            let n_bins = reader.read_u32::<LittleEndian>()?;
            let mut bins = HashMap::with_capacity(n_bins as usize);
            for _ in 0..n_bins {
                let bin_id = reader.read_u32::<LittleEndian>()?;
                let n_chunks = reader.read_u32::<LittleEndian>()?;
                let mut chunks = Vec::with_capacity(n_chunks as usize);
                for _ in 0..n_chunks {
                    let start = reader.read_u64::<LittleEndian>()?;
                    let end = reader.read_u64::<LittleEndian>()?;
                    chunks.push(Chunk::new(start, end));
                }
                bins.insert(bin_id, chunks);
            }
            refs.push(ReferenceIndex { name, bins });
        }

        Ok(Self {
            data_size,
            min_shift,
            depth,
            refs,
        })
    }
}

/// Offset of the first bin at tree level `level` (0 = root).
fn bin_offset(level: i32) -> u32 {
    ((1u32 << (3 * level)) - 1) / 7
}

/// Smallest bin fully containing the 0-based closed interval
/// `[beg, end]`.
fn reg2bin(beg: u64, end: u64, min_shift: i32, depth: i32) -> u32 {
    let mut level = depth;
    while level > 0 {
        let shift = min_shift + 3 * (depth - level);
        if beg >> shift == end >> shift {
            return bin_offset(level) + (beg >> shift) as u32;
        }
        level -= 1;
    }
    0
}

/// All bins that may hold records overlapping the 0-based closed interval
/// `[beg, end]`.
fn reg2bins(beg: u64, end: u64, min_shift: i32, depth: i32) -> Vec<u32> {
    let mut bins = vec![0u32];
    for level in 1..=depth {
        let shift = min_shift + 3 * (depth - level);
        let offset = bin_offset(level);
        for bin in (beg >> shift)..=(end >> shift) {
            bins.push(offset + bin as u32);
        }
    }
    bins
}

/// Merges overlapping or adjacent chunks; input must be sorted by start.
fn merge_chunks(chunks: &[Chunk]) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::new();
    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.start <= last.end => {
                last.end = last.end.max(chunk.end);
            }
            _ => merged.push(*chunk),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_offsets_match_default_scheme() {
        // min_shift 14, depth 5: the classic 0/1/9/73/585/4681 ladder.
        assert_eq!(bin_offset(0), 0);
        assert_eq!(bin_offset(1), 1);
        assert_eq!(bin_offset(2), 9);
        assert_eq!(bin_offset(3), 73);
        assert_eq!(bin_offset(4), 585);
        assert_eq!(bin_offset(5), 4681);
    }

    #[test]
    fn test_reg2bin_leaf_assignment() {
        // Single positions land in leaf bins.
        assert_eq!(reg2bin(0, 0, MIN_SHIFT, DEPTH), 4681);
        assert_eq!(reg2bin(16383, 16383, MIN_SHIFT, DEPTH), 4681);
        assert_eq!(reg2bin(16384, 16384, MIN_SHIFT, DEPTH), 4682);
    }

    #[test]
    fn test_reg2bins_contains_assigned_bin() {
        // Any query interval containing a position must include that
        // position's bin among its candidates.
        for pos in [0u64, 99, 16383, 16384, 1 << 20, (1 << 26) + 5] {
            let bin = reg2bin(pos, pos, MIN_SHIFT, DEPTH);
            let bins = reg2bins(pos.saturating_sub(50), pos + 50, MIN_SHIFT, DEPTH);
            assert!(bins.contains(&bin), "bin {bin} missing for position {pos}");
            assert!(bins.contains(&0));
        }
    }

    #[test]
    fn test_merge_chunks() {
        let chunks = [
            Chunk::new(100, 200),
            Chunk::new(200, 250),
            Chunk::new(240, 260),
            Chunk::new(300, 400),
        ];
        let merged = merge_chunks(&chunks);
        assert_eq!(merged, vec![Chunk::new(100, 260), Chunk::new(300, 400)]);
    }

    #[test]
    fn test_query_unknown_chromosome_is_empty() {
        let mut index = SavIndex::new(0);
        index.add_record("chr20", 100, Chunk::new(0, 10));
        assert!(index.query("chr21", 1, 1000).is_empty());
        assert_eq!(index.chromosomes(), ["chr20"]);
    }

    #[test]
    fn test_query_covers_recorded_positions() {
        let mut index = SavIndex::new(0);
        for (i, pos) in [50u64, 150, 250, 350].iter().enumerate() {
            let at = (i * 10) as u64;
            index.add_record("chr20", *pos, Chunk::new(at, at + 10));
        }
        // All four records share a leaf bin; the query returns one merged
        // chunk covering them all, and the reader filters positionally.
        let chunks = index.query("chr20", 100, 300);
        assert_eq!(chunks, vec![Chunk::new(0, 40)]);
        assert!(index.query("chr20", 100, 100).is_empty());
    }
}
