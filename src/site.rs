//! Site-level data model shared by every reader backend.

use indexmap::IndexMap;

/// Allele call for a single haplotype.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlleleStatus {
    /// The reference allele.
    #[default]
    HasRef,
    /// The (single) alternate allele.
    HasAlt,
    /// No call.
    IsMissing,
}

/// One stored entry of a sparse genotype vector.
///
/// `status` is never [`AlleleStatus::HasRef`]: reference calls are implied
/// by absence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SparseAllele {
    pub offset: u64,
    pub status: AlleleStatus,
}

impl SparseAllele {
    #[must_use]
    pub fn new(status: AlleleStatus, offset: u64) -> Self {
        Self { offset, status }
    }
}

/// Shape of the genotype vector a reader produces.
///
/// * `Allele` - one float per haplotype (`sample_count * ploidy` entries):
///   0.0 for reference, 1.0 for the alternate allele, NaN when missing.
/// * `Genotype` - one value per sample: the count of alternate alleles
///   across its haplotypes, NaN when any haplotype is missing.
/// * `Dosage` - one float per sample with the same alternate-allele
///   accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fmt {
    #[default]
    Allele,
    Genotype,
    Dosage,
}

/// Positional and annotation data for one variant site.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteInfo {
    pub chromosome: String,
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    props: IndexMap<String, String>,
}

impl SiteInfo {
    /// Looks up a property (`ID`, `QUAL`, `FILTER`, or an INFO field).
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Stores a property value. Empty values are treated as absent, since
    /// the wire format cannot distinguish the two.
    pub fn set_prop(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.props.insert(key.into(), value);
        }
    }

    /// Properties in insertion order.
    pub fn props(&self) -> impl Iterator<Item = (&str, &str)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.chromosome.clear();
        self.position = 0;
        self.ref_allele.clear();
        self.alt_allele.clear();
        self.props.clear();
    }
}

/// A half-open genomic interval: positions `p` with `begin <= p < end` on
/// the named chromosome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    chrom: String,
    begin: u64,
    end: u64,
}

impl Region {
    #[must_use]
    pub fn new(chrom: impl Into<String>, begin: u64, end: u64) -> Self {
        Self {
            chrom: chrom.into(),
            begin,
            end,
        }
    }

    #[must_use]
    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    #[must_use]
    pub fn begin(&self) -> u64 {
        self.begin
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[must_use]
    pub fn contains(&self, chrom: &str, position: u64) -> bool {
        self.chrom == chrom && position >= self.begin && position < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_half_open() {
        let region = Region::new("chr20", 100, 300);
        assert!(!region.contains("chr20", 99));
        assert!(region.contains("chr20", 100));
        assert!(region.contains("chr20", 299));
        assert!(!region.contains("chr20", 300));
        assert!(!region.contains("chr21", 150));
    }

    #[test]
    fn test_empty_props_are_absent() {
        let mut site = SiteInfo::default();
        site.set_prop("ID", "rs123");
        site.set_prop("QUAL", "");
        assert_eq!(site.prop("ID"), Some("rs123"));
        assert_eq!(site.prop("QUAL"), None);
    }
}
