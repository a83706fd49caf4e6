use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic bytes: {0:02x?}")]
    InvalidMagic([u8; 8]),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid ploidy: {0}")]
    InvalidPloidy(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum VarintError {
    #[error("Truncated varint: continuation bit set at end of stream")]
    Truncated,

    #[error("Varint does not fit in 64 bits")]
    Overflow,
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Record truncated mid-field")]
    TruncatedRecord,

    #[error("Haplotype offset {0} out of range for {1} haplotypes")]
    OffsetOutOfRange(u64, u64),

    #[error("Haplotype offsets are not strictly increasing")]
    NonMonotoneOffsets,

    #[error("Sparse entry count {0} exceeds {1} haplotypes")]
    TooManyEntries(u64, u64),

    #[error("Reference alleles are never stored sparsely")]
    RefEntry,

    #[error("Invalid utf-8 in string field")]
    InvalidString,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Malformed record at line {0}: {1}")]
    MalformedRecord(usize, String),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("Marker haplotype count ({got}) does not match the file header ({expected})")]
    HaplotypeCountMismatch { expected: u64, got: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("Invalid index magic number: {0:#018x}")]
    InvalidMagicNumber(u64),

    #[error("No data file found for index {}", .0.display())]
    MissingDataFile(PathBuf),

    #[error("Indexed file is {0} bytes but the index was built over {1} bytes")]
    ByteSizeMismatch(u64, u64),

    #[error("Invalid binning parameters: min_shift {0}, depth {1}")]
    InvalidBinning(i32, i32),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Varint(#[from] VarintError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
