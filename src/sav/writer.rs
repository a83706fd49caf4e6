//! Streaming SAV writer.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use noodles::bgzf;

use crate::error::{Error, Result, WriteError};
use crate::marker::Marker;
use crate::site::{AlleleStatus, SiteInfo};

use super::header::SavHeader;
use super::index::{index_path, SavIndex};

/// Streaming writer for SAV files.
///
/// The header is serialized once, at construction; every subsequent
/// [`SavWriter::append`] writes one marker record. A marker whose haplotype
/// count disagrees with the header sets the sticky failure flag and is
/// dropped, but later well-formed markers still write; only an I/O failure
/// stops the stream for good.
pub struct SavWriter<W: Write> {
    inner: W,
    header: SavHeader,
    /// Sticky: any dropped record or I/O failure leaves it set.
    failed: bool,
    /// The underlying stream failed; nothing further will be written.
    dead: bool,
}

impl<W: Write> SavWriter<W> {
    /// Creates a writer and serializes the file header.
    pub fn new(mut inner: W, header: SavHeader) -> Result<Self> {
        header.write_to(&mut inner)?;
        Ok(Self {
            inner,
            header,
            failed: false,
            dead: false,
        })
    }

    #[must_use]
    pub fn header(&self) -> &SavHeader {
        &self.header
    }

    /// No record has been dropped and the stream is intact.
    #[must_use]
    pub fn good(&self) -> bool {
        !self.failed
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.failed
    }

    fn try_append(&mut self, marker: &Marker) -> Result<()> {
        if marker.haplotype_count() != self.header.haplotype_count() {
            return Err(WriteError::HaplotypeCountMismatch {
                expected: self.header.haplotype_count(),
                got: marker.haplotype_count(),
            }
            .into());
        }
        marker.write_to(&mut self.inner, self.header.info_fields())
    }

    /// Appends one marker record.
    ///
    /// Returns `false` (and raises the failure flag) when the marker's
    /// haplotype count does not match the header or the stream has failed;
    /// the record is dropped either way.
    pub fn append(&mut self, marker: &Marker) -> bool {
        if self.dead {
            return false;
        }
        match self.try_append(marker) {
            Ok(()) => true,
            Err(Error::Write(_)) => {
                self.failed = true;
                false
            }
            Err(_) => {
                self.failed = true;
                self.dead = true;
                false
            }
        }
    }

    /// Appends a record built from site annotations and a dense allele
    /// vector: one float per haplotype, 0.0 for reference, NaN for missing,
    /// anything else for the alternate allele.
    pub fn write_site(&mut self, site: &SiteInfo, data: &[f32]) -> bool {
        if data.len() as u64 != self.header.haplotype_count() {
            // Same contract as a mismatched marker: flag it, drop it.
            self.failed = true;
            return false;
        }
        let statuses = data.iter().map(|&value| {
            if value.is_nan() {
                AlleleStatus::IsMissing
            } else if value == 0.0 {
                AlleleStatus::HasRef
            } else {
                AlleleStatus::HasAlt
            }
        });
        let mut marker = Marker::from_dense(
            site.position,
            site.ref_allele.clone(),
            site.alt_allele.clone(),
            statuses,
        );
        for (key, value) in site.props() {
            marker.set_prop(key, value);
        }
        self.append(&marker)
    }

    /// Flushes the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Consumes the writer and returns the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Mutable access to the underlying stream.
    pub fn by_ref(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl SavWriter<bgzf::Writer<File>> {
    /// Creates a BGZF-compressed SAV file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, header: SavHeader) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(bgzf::Writer::new(file), header)
    }

    /// Flushes all pending blocks and writes the BGZF end-of-file marker.
    ///
    /// Must be called before the file is reopened for reading or indexed.
    pub fn finish(self) -> Result<()> {
        let Self { inner, .. } = self;
        inner.finish()?;
        Ok(())
    }

    /// Builds the companion index for a finished SAV file and saves it next
    /// to the data file (`<path>.svi`).
    pub fn create_index<P: AsRef<Path>>(path: P) -> Result<SavIndex> {
        let index = SavIndex::from_sav(&path)?;
        index.save_to_path(index_path(path.as_ref()))?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sav::SavReader;
    use crate::site::{AlleleStatus::*, Fmt};
    use anyhow::Result;
    use std::io::Cursor;

    fn header() -> SavHeader {
        SavHeader::new("chr20", 2, vec!["S1".into(), "S2".into()], Vec::new()).unwrap()
    }

    #[test]
    fn test_mismatched_marker_is_dropped_not_fatal() -> Result<()> {
        let mut writer = SavWriter::new(Cursor::new(Vec::new()), header())?;

        let good_one = Marker::from_dense(10, "A", "C", [HasAlt, HasRef, HasRef, HasRef]);
        let wrong_width = Marker::from_dense(20, "A", "C", [HasAlt, HasRef]);
        let good_two = Marker::from_dense(30, "G", "T", [HasRef, HasRef, HasRef, HasAlt]);

        assert!(writer.append(&good_one));
        assert!(!writer.append(&wrong_width));
        assert!(writer.fail());
        // The flag is sticky but valid records still commit.
        assert!(writer.append(&good_two));
        assert!(writer.fail());

        let bytes = writer.into_inner().into_inner();
        let mut reader = SavReader::new(Cursor::new(bytes), Fmt::Allele);
        let positions: Vec<u64> = reader.markers().map(|m| m.position()).collect();
        assert_eq!(positions, [10, 30]);
        Ok(())
    }

    #[test]
    fn test_write_site_roundtrip() -> Result<()> {
        let mut writer = SavWriter::new(Cursor::new(Vec::new()), header())?;

        let mut site = SiteInfo::default();
        site.chromosome = "chr20".into();
        site.position = 77;
        site.ref_allele = "A".into();
        site.alt_allele = "T".into();
        assert!(writer.write_site(&site, &[0.0, 1.0, f32::NAN, 0.0]));
        assert!(writer.good());

        let bytes = writer.into_inner().into_inner();
        let mut reader = SavReader::new(Cursor::new(bytes), Fmt::Allele);
        let marker = reader.markers().next().unwrap();
        assert_eq!(marker.position(), 77);
        assert_eq!(marker.status_at(1), HasAlt);
        assert_eq!(marker.status_at(2), IsMissing);
        assert_eq!(marker.status_at(3), HasRef);
        Ok(())
    }

    #[test]
    fn test_write_site_length_check() -> Result<()> {
        let mut writer = SavWriter::new(Cursor::new(Vec::new()), header())?;
        let site = SiteInfo::default();
        assert!(!writer.write_site(&site, &[0.0, 1.0]));
        assert!(writer.fail());
        Ok(())
    }
}
