//! # SAV format
//!
//! SAV is a compact binary container for sparse genotype matrices: one
//! chromosome, a fixed ploidy and sample list declared up front, then a
//! stream of marker records holding only the non-reference haplotypes of
//! each site, delta-encoded through prefixed varints.
//!
//! ## File structure
//!
//! ```text
//! ┌──────────────────────────┐
//! │ magic + version          │ 8 bytes
//! ├──────────────────────────┤
//! │ chromosome, ploidy,      │
//! │ samples, metadata fields │ varint/length-prefixed
//! ├──────────────────────────┤
//! │ marker record            │ variable size
//! ├──────────────────────────┤
//! │ marker record            │ variable size
//! │ ...                      │ to EOF
//! └──────────────────────────┘
//! ```
//!
//! On disk the whole stream is BGZF-compressed, which keeps it seekable:
//! the companion index maps genomic bins to BGZF virtual offsets so an
//! [`IndexedReader`] can jump straight to a region.
//!
//! ## Usage
//!
//! ```no_run
//! use sav::sav::{SavHeader, SavReader, SavWriter};
//! use sav::{AlleleStatus::*, Fmt, Marker, Region, SiteInfo};
//!
//! # fn main() -> sav::Result<()> {
//! // Write a file with two diploid samples.
//! let header = SavHeader::new("chr20", 2, vec!["S1".into(), "S2".into()], vec![])?;
//! let mut writer = SavWriter::create("cohort.sav", header)?;
//! writer.append(&Marker::from_dense(100, "A", "G", [HasRef, HasAlt, HasRef, HasRef]));
//! writer.finish()?;
//!
//! // Build the companion index, then query a region.
//! SavWriter::create_index("cohort.sav")?;
//! let mut reader = sav::sav::IndexedReader::from_path(
//!     "cohort.sav",
//!     Region::new("chr20", 1, 1000),
//!     Fmt::Allele,
//! )?;
//! let mut site = SiteInfo::default();
//! let mut data = Vec::new();
//! while reader.read(&mut site, &mut data) {
//!     println!("{}:{} {:?}", site.chromosome, site.position, data);
//! }
//! # Ok(())
//! # }
//! ```

mod header;
mod index;
mod indexed;
mod reader;
mod writer;

pub use header::{SavHeader, FORMAT_VERSION, LEGACY_MAGIC, MAGIC, SIZE_MAGIC};
pub use index::{index_path, Chunk, SavIndex, DEPTH, INDEX_MAGIC, MIN_SHIFT};
pub use indexed::IndexedReader;
pub use reader::{Markers, SavReader};
pub use writer::SavWriter;
