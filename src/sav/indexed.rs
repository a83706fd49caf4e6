//! Random-access SAV reader backed by the companion index.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use noodles::bgzf::{self, VirtualPosition};

use crate::error::Result;
use crate::marker::Marker;
use crate::site::{Fmt, Region, SiteInfo};
use crate::sparse::CompressedVector;

use super::index::{index_path, Chunk, SavIndex};
use super::reader::SavReader;

/// Region-query reader over an indexed SAV file.
///
/// Requires the companion index produced by `SavWriter::create_index`. The
/// cursor can be moved to a new region at any time with
/// [`IndexedReader::reset_region`]; any buffered record is discarded and the
/// next pull returns the first record of the new region.
pub struct IndexedReader {
    reader: SavReader<bgzf::Reader<File>>,
    index: SavIndex,
    region: Region,
    chunks: Vec<Chunk>,
    done: bool,
}

impl IndexedReader {
    /// Opens `path` and its companion index, positioned at `region`.
    pub fn from_path<P: AsRef<Path>>(path: P, region: Region, fmt: Fmt) -> Result<Self> {
        let index = SavIndex::from_path(index_path(path.as_ref()))?;
        let reader = SavReader::from_path(path, fmt)?;
        let mut indexed = Self {
            reader,
            index,
            region: Region::new("", 0, 0),
            chunks: Vec::new(),
            done: true,
        };
        indexed.reset_region(region)?;
        Ok(indexed)
    }

    /// Moves the cursor to the start of `region` without reopening the
    /// file.
    ///
    /// A chromosome the index does not know yields an empty result: every
    /// subsequent read returns `false`, which is not an error state.
    pub fn reset_region(&mut self, region: Region) -> Result<()> {
        self.chunks = self
            .index
            .query(region.chrom(), region.begin(), region.end());
        self.region = region;
        self.done = self.chunks.is_empty();
        if let Some(first) = self.chunks.first() {
            self.reader
                .get_mut()
                .seek(VirtualPosition::from(first.start))?;
            self.reader.reset_state();
        }
        Ok(())
    }

    /// The active region.
    #[must_use]
    pub fn region(&self) -> &Region {
        &self.region
    }

    #[must_use]
    pub fn chromosomes(&self) -> Vec<String> {
        self.index.chromosomes()
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        self.reader.samples()
    }

    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        self.reader.info_fields()
    }

    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.reader.headers()
    }

    pub fn subset_samples(&mut self, subset: &HashSet<String>) -> Vec<String> {
        self.reader.subset_samples(subset)
    }

    #[must_use]
    pub fn good(&self) -> bool {
        !self.done && self.reader.good()
    }

    #[must_use]
    pub fn bad(&self) -> bool {
        self.reader.bad()
    }

    /// Pulls the next in-region marker, scanning past records below the
    /// region start and stopping at the first record past its end. The scan
    /// relies on records being position-sorted, which the writer's
    /// append-order contract provides.
    fn next_in_region(&mut self) -> Option<Marker> {
        if self.done {
            return None;
        }
        loop {
            let Some(marker) = self.reader.next_marker() else {
                self.done = true;
                return None;
            };
            if marker.position() >= self.region.end() {
                self.done = true;
                return None;
            }
            if marker.position() >= self.region.begin() {
                return Some(marker);
            }
        }
    }

    /// Reads the next record of the region in sparse form.
    pub fn read_marker(&mut self, marker: &mut Marker) -> bool {
        match self.next_in_region() {
            Some(next) => {
                *marker = next;
                true
            }
            None => false,
        }
    }

    /// Reads the next record of the region; same shapes as
    /// `SavReader::read`.
    pub fn read(&mut self, site: &mut SiteInfo, data: &mut Vec<f32>) -> bool {
        match self.next_in_region() {
            Some(marker) => {
                self.reader.fill_site(&marker, site);
                self.reader.fill_dense(&marker, data);
                true
            }
            None => false,
        }
    }

    /// Reads the next record of the region with a sparse genotype vector.
    pub fn read_sparse(&mut self, site: &mut SiteInfo, data: &mut CompressedVector<f32>) -> bool {
        match self.next_in_region() {
            Some(marker) => {
                self.reader.fill_site(&marker, site);
                self.reader.fill_sparse(&marker, data);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Marker;
    use crate::sav::{SavHeader, SavWriter};
    use crate::site::AlleleStatus::{HasAlt, HasRef};
    use anyhow::Result;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Writes a SAV file with records at positions 50/150/250/350 on chr20
    /// and builds its index.
    fn write_indexed_file(dir: &TempDir) -> Result<PathBuf> {
        let path = dir.path().join("test.sav");
        let header = SavHeader::new("chr20", 2, vec!["S1".into(), "S2".into()], Vec::new())?;
        let mut writer = SavWriter::create(&path, header)?;
        for position in [50u64, 150, 250, 350] {
            let marker =
                Marker::from_dense(position, "A", "G", [HasRef, HasAlt, HasRef, HasRef]);
            assert!(writer.append(&marker));
        }
        writer.finish()?;
        SavWriter::create_index(&path)?;
        Ok(path)
    }

    #[test]
    fn test_region_query_and_reset() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_indexed_file(&dir)?;

        let mut reader =
            IndexedReader::from_path(&path, Region::new("chr20", 100, 300), Fmt::Allele)?;
        assert_eq!(reader.chromosomes(), ["chr20"]);

        let mut site = SiteInfo::default();
        let mut data = Vec::new();
        let mut positions = Vec::new();
        while reader.read(&mut site, &mut data) {
            assert_eq!(site.chromosome, "chr20");
            positions.push(site.position);
        }
        assert_eq!(positions, [150, 250]);
        assert!(!reader.bad());

        // Reset to a later region: the next read is the record at 350.
        reader.reset_region(Region::new("chr20", 300, 400))?;
        assert!(reader.read(&mut site, &mut data));
        assert_eq!(site.position, 350);
        assert!(!reader.read(&mut site, &mut data));
        Ok(())
    }

    #[test]
    fn test_reset_matches_fresh_reader() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_indexed_file(&dir)?;
        let region = Region::new("chr20", 1, 1000);

        // Read a narrow region first, then reset wide.
        let mut reader =
            IndexedReader::from_path(&path, Region::new("chr20", 200, 300), Fmt::Allele)?;
        let mut marker = Marker::default();
        assert!(reader.read_marker(&mut marker));
        reader.reset_region(region.clone())?;

        let mut reset_positions = Vec::new();
        while reader.read_marker(&mut marker) {
            reset_positions.push(marker.position());
        }

        let mut fresh = IndexedReader::from_path(&path, region, Fmt::Allele)?;
        let mut fresh_positions = Vec::new();
        while fresh.read_marker(&mut marker) {
            fresh_positions.push(marker.position());
        }

        assert_eq!(reset_positions, fresh_positions);
        assert_eq!(fresh_positions, [50, 150, 250, 350]);
        Ok(())
    }

    #[test]
    fn test_unknown_chromosome_is_empty_not_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_indexed_file(&dir)?;

        let mut reader =
            IndexedReader::from_path(&path, Region::new("chr9", 1, 1000), Fmt::Allele)?;
        let mut site = SiteInfo::default();
        let mut data = Vec::new();
        assert!(!reader.read(&mut site, &mut data));
        assert!(!reader.bad());
        Ok(())
    }

    #[test]
    fn test_stale_index_detected() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_indexed_file(&dir)?;

        // Rewrite the data file with different content after indexing.
        let header = SavHeader::new("chr20", 2, vec!["S1".into(), "S2".into()], Vec::new())?;
        let mut writer = SavWriter::create(&path, header)?;
        let marker = Marker::from_dense(10, "A", "G", [HasAlt, HasRef, HasRef, HasRef]);
        assert!(writer.append(&marker));
        writer.finish()?;

        assert!(IndexedReader::from_path(&path, Region::new("chr20", 1, 100), Fmt::Allele).is_err());
        Ok(())
    }
}
