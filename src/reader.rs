//! Polymorphic reader façade.
//!
//! [`Reader`] picks a backend from the file extension at construction time:
//! `.sav` opens the native container, `.vcf`, `.vcf.gz` and `.bcf` go
//! through the compatibility adapter. When the path does not match either
//! family, or the file cannot be opened, the façade stays inert rather than
//! failing: every collection comes back empty and `read` returns `false`.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use noodles::bgzf;

use crate::sav::SavReader;
use crate::site::{Fmt, SiteInfo};
use crate::vcf::VcfReader;

enum Backend {
    Sav(SavReader<bgzf::Reader<File>>),
    Vcf(VcfReader),
}

/// A uniform pull-based reader over SAV and VCF/BCF inputs.
pub struct Reader {
    inner: Option<Backend>,
}

impl Reader {
    /// Opens `path` with the backend its extension selects.
    ///
    /// Never fails; an unrecognized extension or an unopenable file leaves
    /// the façade with no active backend.
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P, fmt: Fmt) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let inner = if name.ends_with(".sav") {
            SavReader::from_path(path, fmt).ok().map(Backend::Sav)
        } else if name.ends_with(".vcf") || name.ends_with(".vcf.gz") || name.ends_with(".bcf") {
            VcfReader::from_path(path, fmt).ok().map(Backend::Vcf)
        } else {
            None
        };
        Self { inner }
    }

    /// A backend is active and has not reached a terminal state.
    #[must_use]
    pub fn good(&self) -> bool {
        match &self.inner {
            Some(Backend::Sav(reader)) => reader.good(),
            Some(Backend::Vcf(reader)) => reader.good(),
            None => false,
        }
    }

    #[must_use]
    pub fn samples(&self) -> Vec<String> {
        match &self.inner {
            Some(Backend::Sav(reader)) => reader.samples().to_vec(),
            Some(Backend::Vcf(reader)) => reader.samples().to_vec(),
            None => Vec::new(),
        }
    }

    /// Header records as key/value pairs.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        match &self.inner {
            Some(Backend::Sav(reader)) => reader.headers(),
            Some(Backend::Vcf(reader)) => reader.headers(),
            None => Vec::new(),
        }
    }

    /// Property names every record of this input can carry, in file order.
    #[must_use]
    pub fn info_fields(&self) -> Vec<String> {
        match &self.inner {
            Some(Backend::Sav(reader)) => reader.info_fields().to_vec(),
            Some(Backend::Vcf(reader)) => reader.info_fields().to_vec(),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn chromosomes(&self) -> Vec<String> {
        match &self.inner {
            Some(Backend::Sav(reader)) => reader.chromosomes(),
            Some(Backend::Vcf(reader)) => reader.chromosomes(),
            None => Vec::new(),
        }
    }

    /// Restricts subsequent reads to the named samples; returns the kept
    /// names in file order.
    pub fn subset_samples(&mut self, subset: &HashSet<String>) -> Vec<String> {
        match &mut self.inner {
            Some(Backend::Sav(reader)) => reader.subset_samples(subset),
            Some(Backend::Vcf(reader)) => reader.subset_samples(subset),
            None => Vec::new(),
        }
    }

    /// Reads the next record from the active backend.
    pub fn read(&mut self, site: &mut SiteInfo, data: &mut Vec<f32>) -> bool {
        match &mut self.inner {
            Some(Backend::Sav(reader)) => reader.read(site, data),
            Some(Backend::Vcf(reader)) => reader.read(site, data),
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
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_dispatch_to_sav() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cohort.sav");
        let header = SavHeader::new("chr20", 2, vec!["S1".into(), "S2".into()], Vec::new())?;
        let mut writer = SavWriter::create(&path, header)?;
        assert!(writer.append(&Marker::from_dense(
            100,
            "A",
            "G",
            [HasRef, HasAlt, HasRef, HasRef],
        )));
        writer.finish()?;

        let mut reader = Reader::from_path(&path, Fmt::Allele);
        assert!(reader.good());
        assert_eq!(reader.samples(), ["S1", "S2"]);
        assert_eq!(reader.chromosomes(), ["chr20"]);

        let mut site = SiteInfo::default();
        let mut data = Vec::new();
        assert!(reader.read(&mut site, &mut data));
        assert_eq!(site.position, 100);
        assert_eq!(data, vec![0.0, 1.0, 0.0, 0.0]);
        assert!(!reader.read(&mut site, &mut data));
        Ok(())
    }

    #[test]
    fn test_dispatch_to_vcf() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cohort.vcf");
        let mut file = std::fs::File::create(&path)?;
        write!(
            file,
            "##fileformat=VCFv4.2\n\
             ##contig=<ID=chr20>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n\
             chr20\t42\t.\tA\tT\t.\tPASS\t.\tGT\t0|1\n"
        )?;
        drop(file);

        let mut reader = Reader::from_path(&path, Fmt::Allele);
        assert!(reader.good());
        assert_eq!(reader.samples(), ["S1"]);

        let mut site = SiteInfo::default();
        let mut data = Vec::new();
        assert!(reader.read(&mut site, &mut data));
        assert_eq!(site.position, 42);
        assert_eq!(data, vec![0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_inert_without_backend() {
        let mut reader = Reader::from_path("/no/such/file.xyz", Fmt::Allele);
        assert!(!reader.good());
        assert!(reader.samples().is_empty());
        assert!(reader.headers().is_empty());
        assert!(reader.info_fields().is_empty());
        assert!(reader.chromosomes().is_empty());
        assert!(reader.subset_samples(&HashSet::new()).is_empty());

        let mut site = SiteInfo::default();
        let mut data = Vec::new();
        assert!(!reader.read(&mut site, &mut data));

        // A recognized extension on a missing file is just as inert.
        let mut reader = Reader::from_path("/no/such/file.sav", Fmt::Allele);
        assert!(!reader.read(&mut site, &mut data));
    }
}
