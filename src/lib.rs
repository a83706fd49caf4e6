//! # sav
//!
//! A library for reading and writing genomic variant data in SAV, a compact
//! binary container for sparse genotype matrices, with compatibility
//! readers for VCF and BCF.
//!
//! The pieces, bottom up:
//!
//! * [`varint`] - prefixed variable-length integer codecs: LEB128 plus a
//!   family that co-packs an N-bit metadata field into the first byte.
//! * [`CompressedVector`] - sparse offset-keyed storage.
//! * [`Marker`] - one variant site with its non-reference haplotypes, and
//!   the delta-encoded record codec built on the 1-bit prefixed varint.
//! * [`sav`] - the container itself: [`sav::SavWriter`] /
//!   [`sav::SavReader`] streaming over BGZF, [`sav::SavIndex`] +
//!   [`sav::IndexedReader`] for region queries.
//! * [`VcfReader`] - the VCF/BCF adapter with the same pull surface.
//! * [`Reader`] - a façade picking a backend from the file extension.
//!
//! ## Example
//!
//! ```no_run
//! use sav::{Fmt, Reader, SiteInfo};
//!
//! let mut reader = Reader::from_path("cohort.sav", Fmt::Allele);
//! let mut site = SiteInfo::default();
//! let mut genotypes = Vec::new();
//! while reader.read(&mut site, &mut genotypes) {
//!     println!("{}:{} {}>{}", site.chromosome, site.position, site.ref_allele, site.alt_allele);
//! }
//! ```

mod error;
mod marker;
mod reader;
pub mod sav;
mod site;
mod sparse;
pub mod varint;
mod vcf;

pub use error::{Error, HeaderError, IndexError, ReadError, Result, VarintError, WriteError};
pub use marker::{Alleles, Marker};
pub use reader::Reader;
pub use site::{AlleleStatus, Fmt, Region, SiteInfo, SparseAllele};
pub use sparse::CompressedVector;
pub use vcf::VcfReader;
