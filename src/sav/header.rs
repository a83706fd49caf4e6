//! SAV file header.
//!
//! A SAV file starts with eight magic-plus-version bytes, then the header
//! proper: the chromosome name, the ploidy, the sample names, and the
//! declared metadata field names. Everything after the magic is varint- or
//! length-prefix-encoded, so the header has no fixed size.
//!
//! ```text
//! ┌──────────────────────────┐
//! │ magic + version          │ 8 bytes
//! ├──────────────────────────┤
//! │ chromosome               │ varint length + bytes
//! │ ploidy                   │ varint
//! │ sample count             │ varint
//! │ sample names             │ length-prefixed, one per sample
//! │ metadata field count     │ varint
//! │ metadata field names     │ length-prefixed, one per field
//! ├──────────────────────────┤
//! │ marker records to EOF    │
//! └──────────────────────────┘
//! ```

use std::io::{Read, Write};

use crate::error::{HeaderError, Result};
use crate::varint::{self, read_string, write_string};

/// Magic and version bytes written by the current format.
pub const MAGIC: [u8; 8] = *b"sav\x00\x01\x00\x00\x00";

/// Magic and version bytes of the format's earlier name, accepted on read.
pub const LEGACY_MAGIC: [u8; 8] = *b"cvcf\x00\x01\x00\x00";

/// Size of the magic-plus-version preamble.
pub const SIZE_MAGIC: usize = 8;

/// Major format version this implementation reads and writes.
pub const FORMAT_VERSION: u8 = 1;

/// Parsed SAV file header.
///
/// The header is write-once: a writer serializes it at construction and a
/// reader memoizes it when the file is opened. The haplotype count it
/// implies (`sample_count * ploidy`) bounds every record in the file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SavHeader {
    chromosome: String,
    ploidy: u64,
    samples: Vec<String>,
    info_fields: Vec<String>,
}

impl SavHeader {
    /// Creates a header.
    ///
    /// # Errors
    ///
    /// [`HeaderError::InvalidPloidy`] when `ploidy` is zero.
    pub fn new(
        chromosome: impl Into<String>,
        ploidy: u64,
        samples: Vec<String>,
        info_fields: Vec<String>,
    ) -> Result<Self> {
        if ploidy == 0 {
            return Err(HeaderError::InvalidPloidy(ploidy).into());
        }
        Ok(Self {
            chromosome: chromosome.into(),
            ploidy,
            samples,
            info_fields,
        })
    }

    #[must_use]
    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    #[must_use]
    pub fn ploidy(&self) -> u64 {
        self.ploidy
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Declared metadata field names, in file order.
    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        &self.info_fields
    }

    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.samples.len() as u64
    }

    /// `sample_count * ploidy`, fixed for every record in the file.
    #[must_use]
    pub fn haplotype_count(&self) -> u64 {
        self.sample_count() * self.ploidy
    }

    /// Writes the magic bytes and header fields.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        write_string(writer, &self.chromosome)?;
        varint::encode(self.ploidy, writer)?;
        varint::encode(self.sample_count(), writer)?;
        for sample in &self.samples {
            write_string(writer, sample)?;
        }
        varint::encode(self.info_fields.len() as u64, writer)?;
        for field in &self.info_fields {
            write_string(writer, field)?;
        }
        Ok(())
    }

    /// Parses the magic bytes and header fields.
    ///
    /// Both the current and the legacy magic are accepted.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; SIZE_MAGIC];
        reader.read_exact(&mut magic)?;
        // The version byte sits right after the NUL-terminated name; the
        // name decides where that is.
        let version_at = if magic[..4] == MAGIC[..4] {
            4
        } else if magic[..5] == LEGACY_MAGIC[..5] {
            5
        } else {
            return Err(HeaderError::InvalidMagic(magic).into());
        };
        if magic[version_at] != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(magic[version_at]).into());
        }

        let chromosome = read_string(reader)?;
        let ploidy = varint::decode(reader)?.ok_or(HeaderError::InvalidPloidy(0))?;
        if ploidy == 0 {
            return Err(HeaderError::InvalidPloidy(ploidy).into());
        }

        let sample_count = varint::decode(reader)?.ok_or(crate::error::ReadError::TruncatedRecord)?;
        let mut samples = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            samples.push(read_string(reader)?);
        }

        let field_count = varint::decode(reader)?.ok_or(crate::error::ReadError::TruncatedRecord)?;
        let mut info_fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            info_fields.push(read_string(reader)?);
        }

        Ok(Self {
            chromosome,
            ploidy,
            samples,
            info_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use anyhow::Result;
    use std::io::Cursor;

    fn sample_header() -> SavHeader {
        SavHeader::new(
            "chr20",
            2,
            vec!["NA001".to_string(), "NA002".to_string()],
            vec!["ID".to_string(), "QUAL".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_roundtrip() -> Result<()> {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        assert_eq!(&buf[..SIZE_MAGIC], &MAGIC);

        let decoded = SavHeader::read_from(&mut Cursor::new(&buf))?;
        assert_eq!(decoded, header);
        assert_eq!(decoded.haplotype_count(), 4);
        Ok(())
    }

    #[test]
    fn test_legacy_magic_accepted() -> Result<()> {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        buf[..SIZE_MAGIC].copy_from_slice(&LEGACY_MAGIC);

        let decoded = SavHeader::read_from(&mut Cursor::new(&buf))?;
        assert_eq!(decoded.chromosome(), "chr20");
        Ok(())
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = Vec::new();
        sample_header().write_to(&mut buf).unwrap();
        buf[0] = b'x';
        assert!(matches!(
            SavHeader::read_from(&mut Cursor::new(&buf)),
            Err(Error::Header(HeaderError::InvalidMagic(_)))
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut buf = Vec::new();
        sample_header().write_to(&mut buf).unwrap();
        buf[4] = 2;
        assert!(matches!(
            SavHeader::read_from(&mut Cursor::new(&buf)),
            Err(Error::Header(HeaderError::UnsupportedVersion(2)))
        ));
    }

    #[test]
    fn test_zero_ploidy_rejected() {
        assert!(matches!(
            SavHeader::new("chr1", 0, Vec::new(), Vec::new()),
            Err(Error::Header(HeaderError::InvalidPloidy(0)))
        ));
    }
}
