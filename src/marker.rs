//! The marker model: one genomic site plus its per-haplotype allele
//! statuses, stored sparsely.
//!
//! A marker keeps only the non-reference entries, sorted by haplotype
//! offset. On the wire each record is the position, the ref and alt alleles,
//! the values of the file's declared metadata fields, and a delta-encoded
//! sparse stream where every entry is a single 1-bit-prefixed varint: the
//! prefix carries the allele status (0 = alt, 1 = missing) and the payload
//! the distance to the previous stored offset, minus one.

use std::io::{Read, Write};

use indexmap::IndexMap;

use crate::error::{ReadError, Result};
use crate::site::{AlleleStatus, SparseAllele};
use crate::varint::{self, read_string, write_string, OneBitPrefixed};

/// One variant site with sparse per-haplotype allele statuses.
///
/// Markers are value types: cloning is bounded by the non-reference count,
/// not the haplotype count. They are immutable once constructed, apart from
/// the property map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Marker {
    position: u64,
    ref_allele: String,
    alt_allele: String,
    props: IndexMap<String, String>,
    haplotype_count: u64,
    non_ref: Vec<SparseAllele>,
}

impl Marker {
    /// Builds a marker from a dense sequence of allele statuses, recording
    /// an entry for every non-reference status.
    pub fn from_dense<I>(
        position: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        statuses: I,
    ) -> Self
    where
        I: IntoIterator<Item = AlleleStatus>,
    {
        let mut non_ref = Vec::new();
        let mut haplotype_count = 0u64;
        for status in statuses {
            if status != AlleleStatus::HasRef {
                non_ref.push(SparseAllele::new(status, haplotype_count));
            }
            haplotype_count += 1;
        }
        non_ref.shrink_to_fit();
        Self {
            position,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            props: IndexMap::new(),
            haplotype_count,
            non_ref,
        }
    }

    /// Builds a marker from pre-built sparse entries.
    ///
    /// # Errors
    ///
    /// Rejects entries with [`AlleleStatus::HasRef`], offsets that are not
    /// strictly increasing or not below `haplotype_count`, and more entries
    /// than haplotypes.
    pub fn from_sparse(
        position: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        non_ref: Vec<SparseAllele>,
        haplotype_count: u64,
    ) -> Result<Self> {
        if non_ref.len() as u64 > haplotype_count {
            return Err(ReadError::TooManyEntries(non_ref.len() as u64, haplotype_count).into());
        }
        let mut prev = None;
        for entry in &non_ref {
            if entry.status == AlleleStatus::HasRef {
                return Err(ReadError::RefEntry.into());
            }
            if prev.is_some_and(|p| entry.offset <= p) {
                return Err(ReadError::NonMonotoneOffsets.into());
            }
            if entry.offset >= haplotype_count {
                return Err(ReadError::OffsetOutOfRange(entry.offset, haplotype_count).into());
            }
            prev = Some(entry.offset);
        }
        Ok(Self {
            position,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            props: IndexMap::new(),
            haplotype_count,
            non_ref,
        })
    }

    /// 1-based genomic position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    #[must_use]
    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    /// Total haplotypes, stored and implied-reference alike.
    #[must_use]
    pub fn haplotype_count(&self) -> u64 {
        self.haplotype_count
    }

    /// The stored non-reference entries, in offset order.
    #[must_use]
    pub fn non_ref(&self) -> &[SparseAllele] {
        &self.non_ref
    }

    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Stores a property value; empty values are treated as absent.
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

    /// Status at a single haplotype offset.
    #[must_use]
    pub fn status_at(&self, offset: u64) -> AlleleStatus {
        match self.non_ref.binary_search_by_key(&offset, |e| e.offset) {
            Ok(i) => self.non_ref[i].status,
            Err(_) => AlleleStatus::HasRef,
        }
    }

    /// Dense iteration: exactly `haplotype_count` statuses in offset order,
    /// reading the gaps between stored entries as reference calls.
    #[must_use]
    pub fn alleles(&self) -> Alleles<'_> {
        Alleles {
            entries: &self.non_ref,
            cursor: 0,
            offset: 0,
            total: self.haplotype_count,
        }
    }

    /// Alternate-allele frequency: alt count over the non-missing haplotype
    /// count. NaN when every haplotype is missing.
    #[must_use]
    pub fn allele_frequency(&self) -> f64 {
        let mut alt = 0u64;
        let mut missing = 0u64;
        for entry in &self.non_ref {
            match entry.status {
                AlleleStatus::HasAlt => alt += 1,
                AlleleStatus::IsMissing => missing += 1,
                AlleleStatus::HasRef => {}
            }
        }
        let denom = self.haplotype_count - missing;
        if denom == 0 {
            f64::NAN
        } else {
            alt as f64 / denom as f64
        }
    }

    /// Serializes one record.
    ///
    /// `fields` is the file header's declared metadata field list; a
    /// length-prefixed value is written for each, empty when the marker does
    /// not carry it.
    pub fn write_to<W: Write>(&self, writer: &mut W, fields: &[String]) -> Result<()> {
        varint::encode(self.position, writer)?;
        write_string(writer, &self.ref_allele)?;
        write_string(writer, &self.alt_allele)?;
        for field in fields {
            write_string(writer, self.prop(field).unwrap_or(""))?;
        }
        varint::encode(self.non_ref.len() as u64, writer)?;
        let mut next_min = 0u64;
        for entry in &self.non_ref {
            let prefix = match entry.status {
                AlleleStatus::HasAlt => 0,
                AlleleStatus::IsMissing => 1,
                AlleleStatus::HasRef => unreachable!("ref entries are never stored sparsely"),
            };
            OneBitPrefixed::encode(prefix, entry.offset - next_min, writer)?;
            next_min = entry.offset + 1;
        }
        Ok(())
    }

    /// Deserializes one record written by [`Marker::write_to`].
    ///
    /// Returns `None` on a clean end of stream at the record boundary.
    /// `haplotype_count` comes from the file header and bounds every decoded
    /// offset.
    pub fn read_from<R: Read>(
        reader: &mut R,
        haplotype_count: u64,
        fields: &[String],
    ) -> Result<Option<Self>> {
        let Some(position) = varint::decode(reader)? else {
            return Ok(None);
        };
        let ref_allele = read_string(reader)?;
        let alt_allele = read_string(reader)?;
        let mut props = IndexMap::new();
        for field in fields {
            let value = read_string(reader)?;
            if !value.is_empty() {
                props.insert(field.clone(), value);
            }
        }

        let count = varint::decode(reader)?.ok_or(ReadError::TruncatedRecord)?;
        if count > haplotype_count {
            return Err(ReadError::TooManyEntries(count, haplotype_count).into());
        }
        let mut non_ref = Vec::with_capacity(count as usize);
        let mut next_min = 0u64;
        for _ in 0..count {
            let Some((prefix, delta)) = OneBitPrefixed::decode(reader)? else {
                return Err(ReadError::TruncatedRecord.into());
            };
            let offset = next_min
                .checked_add(delta)
                .filter(|&o| o < haplotype_count)
                .ok_or(ReadError::OffsetOutOfRange(
                    next_min.saturating_add(delta),
                    haplotype_count,
                ))?;
            let status = if prefix == 0 {
                AlleleStatus::HasAlt
            } else {
                AlleleStatus::IsMissing
            };
            non_ref.push(SparseAllele::new(status, offset));
            next_min = offset + 1;
        }

        Ok(Some(Self {
            position,
            ref_allele,
            alt_allele,
            props,
            haplotype_count,
            non_ref,
        }))
    }
}

/// Dense status iterator over a marker; see [`Marker::alleles`].
pub struct Alleles<'a> {
    entries: &'a [SparseAllele],
    cursor: usize,
    offset: u64,
    total: u64,
}

impl Iterator for Alleles<'_> {
    type Item = AlleleStatus;

    fn next(&mut self) -> Option<AlleleStatus> {
        if self.offset >= self.total {
            return None;
        }
        let status = match self.entries.get(self.cursor) {
            Some(entry) if entry.offset == self.offset => {
                self.cursor += 1;
                entry.status
            }
            _ => AlleleStatus::HasRef,
        };
        self.offset += 1;
        Some(status)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.offset) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use anyhow::Result;
    use std::io::Cursor;

    use AlleleStatus::{HasAlt, HasRef, IsMissing};

    fn sample_marker() -> Marker {
        // Ploidy 2, 3 samples: [ref, alt, ref, ref, missing, ref]
        Marker::from_dense(
            1200,
            "A",
            "G",
            [HasRef, HasAlt, HasRef, HasRef, IsMissing, HasRef],
        )
    }

    #[test]
    fn test_dense_construction() {
        let marker = sample_marker();
        assert_eq!(marker.haplotype_count(), 6);
        assert_eq!(
            marker.non_ref(),
            &[
                SparseAllele::new(HasAlt, 1),
                SparseAllele::new(IsMissing, 4),
            ]
        );
    }

    #[test]
    fn test_dense_iteration_matches_input() {
        let statuses = [HasRef, HasAlt, HasRef, HasRef, IsMissing, HasRef];
        let marker = Marker::from_dense(5, "C", "T", statuses);
        let roundtrip: Vec<_> = marker.alleles().collect();
        assert_eq!(roundtrip, statuses);
        assert_eq!(marker.status_at(1), HasAlt);
        assert_eq!(marker.status_at(4), IsMissing);
        assert_eq!(marker.status_at(0), HasRef);
    }

    #[test]
    fn test_sparse_construction_validates() {
        let entries = vec![
            SparseAllele::new(HasAlt, 1),
            SparseAllele::new(IsMissing, 4),
        ];
        let marker = Marker::from_sparse(7, "A", "G", entries.clone(), 6).unwrap();
        assert_eq!(marker.non_ref(), entries.as_slice());

        // Ref entries are rejected.
        let bad = vec![SparseAllele::new(HasRef, 0)];
        assert!(matches!(
            Marker::from_sparse(7, "A", "G", bad, 6),
            Err(Error::Read(ReadError::RefEntry))
        ));

        // Offsets must increase.
        let bad = vec![SparseAllele::new(HasAlt, 4), SparseAllele::new(HasAlt, 4)];
        assert!(matches!(
            Marker::from_sparse(7, "A", "G", bad, 6),
            Err(Error::Read(ReadError::NonMonotoneOffsets))
        ));

        // Offsets must fit the haplotype count.
        let bad = vec![SparseAllele::new(HasAlt, 6)];
        assert!(matches!(
            Marker::from_sparse(7, "A", "G", bad, 6),
            Err(Error::Read(ReadError::OffsetOutOfRange(6, 6)))
        ));
    }

    #[test]
    fn test_allele_frequency() {
        let marker = sample_marker();
        // One alt out of (6 - 1 missing) called haplotypes.
        assert!((marker.allele_frequency() - 0.2).abs() < 1e-12);

        let all_missing = Marker::from_dense(1, "A", "G", [IsMissing, IsMissing]);
        assert!(all_missing.allele_frequency().is_nan());
    }

    #[test]
    fn test_serialized_delta_stream() -> Result<()> {
        let marker = sample_marker();
        let mut buf = Vec::new();
        marker.write_to(&mut buf, &[])?;

        // position 1200, then "A", "G" length-prefixed.
        let mut expected = vec![0xb0, 0x09, 0x01, b'A', 0x01, b'G'];
        // Two entries: deltas 1 then 2, statuses alt then missing.
        expected.extend_from_slice(&[0x02, 0x01, 0x42]);
        assert_eq!(buf, expected);
        Ok(())
    }

    #[test]
    fn test_roundtrip_with_fields() -> Result<()> {
        let fields = vec!["ID".to_string(), "QUAL".to_string(), "FILTER".to_string()];
        let mut marker = sample_marker();
        marker.set_prop("ID", "rs42");
        marker.set_prop("FILTER", "PASS");

        let mut buf = Vec::new();
        marker.write_to(&mut buf, &fields)?;

        let mut cursor = Cursor::new(&buf);
        let decoded = Marker::read_from(&mut cursor, 6, &fields)?.unwrap();
        assert_eq!(decoded, marker);
        assert_eq!(decoded.prop("ID"), Some("rs42"));
        assert_eq!(decoded.prop("QUAL"), None);
        assert_eq!(cursor.position() as usize, buf.len());

        // Clean EOF at the record boundary.
        assert!(Marker::read_from(&mut cursor, 6, &fields)?.is_none());
        Ok(())
    }

    #[test]
    fn test_read_rejects_out_of_range_offset() -> Result<()> {
        let marker = sample_marker();
        let mut buf = Vec::new();
        marker.write_to(&mut buf, &[])?;

        // Claim fewer haplotypes than the stream encodes.
        let mut cursor = Cursor::new(&buf);
        assert!(matches!(
            Marker::read_from(&mut cursor, 4, &[]),
            Err(Error::Read(ReadError::OffsetOutOfRange(4, 4)))
        ));
        Ok(())
    }

    #[test]
    fn test_read_truncated_record() -> Result<()> {
        let marker = sample_marker();
        let mut buf = Vec::new();
        marker.write_to(&mut buf, &[])?;
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(&buf);
        assert!(Marker::read_from(&mut cursor, 6, &[]).is_err());
        Ok(())
    }
}
