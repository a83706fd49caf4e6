//! Streaming SAV reader.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use noodles::bgzf;

use crate::error::Result;
use crate::marker::Marker;
use crate::site::{AlleleStatus, Fmt, SiteInfo};
use crate::sparse::CompressedVector;

use super::header::SavHeader;

/// Reader stream state.
///
/// `Good → {Eof | Bad}`, both terminal. A clean end of stream after a record
/// boundary is `Eof`; a malformed varint, truncated record, out-of-range
/// offset, or I/O failure is `Bad`. Either way every later pull returns
/// `false` without touching the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Good,
    Eof,
    Bad,
}

/// Streaming reader over a SAV byte stream.
///
/// The header is parsed at construction; a header that cannot be parsed
/// leaves the reader in its terminal failed state rather than failing
/// construction, so probing a damaged file is always observable through the
/// `good`/`fail`/`bad` triad.
pub struct SavReader<R> {
    inner: R,
    header: SavHeader,
    fmt: Fmt,
    state: State,
    /// File-order indices of the samples kept by `subset_samples`.
    keep: Option<Vec<usize>>,
}

impl<R: Read> SavReader<R> {
    /// Opens a reader over `inner`, parsing the file header eagerly.
    ///
    /// `fmt` selects the shape of the dense genotype vectors produced by
    /// [`SavReader::read`].
    pub fn new(mut inner: R, fmt: Fmt) -> Self {
        let (header, state) = match SavHeader::read_from(&mut inner) {
            Ok(header) => (header, State::Good),
            Err(_) => (SavHeader::default(), State::Bad),
        };
        Self {
            inner,
            header,
            fmt,
            state,
            keep: None,
        }
    }

    /// Stream is readable and no terminal state has been reached.
    #[must_use]
    pub fn good(&self) -> bool {
        self.state == State::Good
    }

    /// A pull has failed, either at end of stream or on damage.
    #[must_use]
    pub fn fail(&self) -> bool {
        self.state != State::Good
    }

    /// The stream is damaged (format or I/O error), not merely exhausted.
    #[must_use]
    pub fn bad(&self) -> bool {
        self.state == State::Bad
    }

    #[must_use]
    pub fn header(&self) -> &SavHeader {
        &self.header
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        self.header.samples()
    }

    #[must_use]
    pub fn chromosome(&self) -> &str {
        self.header.chromosome()
    }

    #[must_use]
    pub fn ploidy(&self) -> u64 {
        self.header.ploidy()
    }

    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        self.header.info_fields()
    }

    /// Every chromosome this file can contain (SAV files carry one).
    #[must_use]
    pub fn chromosomes(&self) -> Vec<String> {
        if self.header.chromosome().is_empty() {
            Vec::new()
        } else {
            vec![self.header.chromosome().to_string()]
        }
    }

    /// Key/value pairs synthesized from the file header.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        if self.header.chromosome().is_empty() && self.header.samples().is_empty() {
            return Vec::new();
        }
        let mut pairs = vec![
            (
                "contig".to_string(),
                format!("<ID={}>", self.header.chromosome()),
            ),
            ("ploidy".to_string(), self.header.ploidy().to_string()),
        ];
        for field in self.header.info_fields() {
            pairs.push(("INFO".to_string(), format!("<ID={field}>")));
        }
        pairs
    }

    /// Restricts subsequent reads to the named samples.
    ///
    /// Returns the kept sample names in file order.
    pub fn subset_samples(&mut self, subset: &HashSet<String>) -> Vec<String> {
        let mut keep = Vec::new();
        let mut kept_names = Vec::new();
        for (i, name) in self.header.samples().iter().enumerate() {
            if subset.contains(name) {
                keep.push(i);
                kept_names.push(name.clone());
            }
        }
        self.keep = Some(keep);
        kept_names
    }

    /// Pulls the next marker, or `None` at a terminal state.
    pub(crate) fn next_marker(&mut self) -> Option<Marker> {
        if self.state != State::Good {
            return None;
        }
        match Marker::read_from(
            &mut self.inner,
            self.header.haplotype_count(),
            self.header.info_fields(),
        ) {
            Ok(Some(marker)) => Some(marker),
            Ok(None) => {
                self.state = State::Eof;
                None
            }
            Err(_) => {
                self.state = State::Bad;
                None
            }
        }
    }

    /// Reads the next record in full sparse form.
    pub fn read_marker(&mut self, marker: &mut Marker) -> bool {
        match self.next_marker() {
            Some(next) => {
                *marker = next;
                true
            }
            None => false,
        }
    }

    /// Reads the next record: site annotations into `site`, the dense
    /// genotype vector (shaped by the reader's [`Fmt`]) into `data`.
    pub fn read(&mut self, site: &mut SiteInfo, data: &mut Vec<f32>) -> bool {
        match self.next_marker() {
            Some(marker) => {
                self.fill_site(&marker, site);
                self.fill_dense(&marker, data);
                true
            }
            None => false,
        }
    }

    /// Reads the next record with the genotype vector in sparse form
    /// (per-haplotype entries: 1.0 for alt, NaN for missing).
    pub fn read_sparse(&mut self, site: &mut SiteInfo, data: &mut CompressedVector<f32>) -> bool {
        match self.next_marker() {
            Some(marker) => {
                self.fill_site(&marker, site);
                self.fill_sparse(&marker, data);
                true
            }
            None => false,
        }
    }

    /// Iterates the remaining markers until a terminal state.
    pub fn markers(&mut self) -> Markers<'_, R> {
        Markers { reader: self }
    }

    /// Mutable access to the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Clears a terminal state after the caller has repositioned the
    /// underlying stream to a record boundary.
    pub(crate) fn reset_state(&mut self) {
        self.state = State::Good;
    }

    pub(crate) fn fill_site(&self, marker: &Marker, site: &mut SiteInfo) {
        site.clear();
        site.chromosome.push_str(self.header.chromosome());
        site.position = marker.position();
        site.ref_allele.push_str(marker.ref_allele());
        site.alt_allele.push_str(marker.alt_allele());
        for (key, value) in marker.props() {
            site.set_prop(key, value);
        }
    }

    /// Rank of a sample among the kept set, `None` when filtered out.
    fn keep_rank(&self, sample: usize) -> Option<usize> {
        match &self.keep {
            None => Some(sample),
            Some(keep) => keep.binary_search(&sample).ok(),
        }
    }

    fn kept_sample_count(&self) -> usize {
        match &self.keep {
            None => self.header.samples().len(),
            Some(keep) => keep.len(),
        }
    }

    pub(crate) fn fill_dense(&self, marker: &Marker, data: &mut Vec<f32>) {
        let ploidy = self.header.ploidy() as usize;
        data.clear();
        match self.fmt {
            Fmt::Allele => {
                data.resize(self.kept_sample_count() * ploidy, 0.0);
                for entry in marker.non_ref() {
                    let sample = (entry.offset as usize) / ploidy;
                    let slot = (entry.offset as usize) % ploidy;
                    if let Some(rank) = self.keep_rank(sample) {
                        data[rank * ploidy + slot] = match entry.status {
                            AlleleStatus::HasAlt => 1.0,
                            AlleleStatus::IsMissing => f32::NAN,
                            AlleleStatus::HasRef => 0.0,
                        };
                    }
                }
            }
            Fmt::Genotype | Fmt::Dosage => {
                data.resize(self.kept_sample_count(), 0.0);
                for entry in marker.non_ref() {
                    let sample = (entry.offset as usize) / ploidy;
                    if let Some(rank) = self.keep_rank(sample) {
                        match entry.status {
                            AlleleStatus::HasAlt => data[rank] += 1.0,
                            AlleleStatus::IsMissing => data[rank] = f32::NAN,
                            AlleleStatus::HasRef => {}
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn fill_sparse(&self, marker: &Marker, data: &mut CompressedVector<f32>) {
        let ploidy = self.header.ploidy() as usize;
        data.clear();
        for entry in marker.non_ref() {
            let sample = (entry.offset as usize) / ploidy;
            let slot = (entry.offset as usize) % ploidy;
            if let Some(rank) = self.keep_rank(sample) {
                let value = match entry.status {
                    AlleleStatus::HasAlt => 1.0,
                    AlleleStatus::IsMissing => f32::NAN,
                    AlleleStatus::HasRef => 0.0,
                };
                data.set((rank * ploidy + slot) as u64, value);
            }
        }
        data.resize((self.kept_sample_count() * ploidy) as u64);
    }
}

impl SavReader<bgzf::Reader<File>> {
    /// Opens a BGZF-compressed SAV file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P, fmt: Fmt) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(bgzf::Reader::new(file), fmt))
    }
}

/// Iterator over the remaining markers of a [`SavReader`].
pub struct Markers<'a, R> {
    reader: &'a mut SavReader<R>,
}

impl<R: Read> Iterator for Markers<'_, R> {
    type Item = Marker;

    fn next(&mut self) -> Option<Marker> {
        self.reader.next_marker()
    }
}
