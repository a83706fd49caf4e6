//! VCF/BCF compatibility reader.
//!
//! A thin adapter over the `noodles` ecosystem exposing the same pull-based
//! surface as the native SAV reader. Three inputs are handled: plain-text
//! VCF, gzip/BGZF-compressed VCF, and binary BCF. The backend is chosen by
//! sniffing magic bytes, not the file name.
//!
//! Text records are tab-split by hand and only the header goes through the
//! external parser; BCF records are decoded through `RecordBuf`. Either
//! way, a multi-allelic input record is split into one logical marker per
//! ALT allele: for sub-marker `k`, allele index `k + 1` reads as the
//! alternate, any other called allele reads as reference, and uncalled
//! alleles are missing.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::bufread::MultiGzDecoder;
use noodles::bcf;
use noodles::bgzf;
use noodles::vcf::{self, variant::RecordBuf};
use noodles::vcf::variant::record::samples::keys::key;
use noodles::vcf::variant::record_buf::info::field::value::Array as InfoArray;
use noodles::vcf::variant::record_buf::info::field::Value as InfoValue;
use noodles::vcf::variant::record_buf::samples::sample::value::genotype::Genotype as GenotypeValue;
use noodles::vcf::variant::record_buf::samples::sample::Value;

use crate::error::{ReadError, Result};
use crate::site::{Fmt, Region, SiteInfo};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BCF_MAGIC: [u8; 3] = *b"BCF";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Good,
    Eof,
    Bad,
}

enum Backend {
    Text(Box<dyn BufRead>),
    Bcf {
        reader: bcf::io::Reader<bgzf::Reader<File>>,
        buf: RecordBuf,
    },
}

/// One parsed input record, before ALT splitting.
struct RecordData {
    chrom: String,
    position: u64,
    id: String,
    qual: String,
    filter: String,
    ref_allele: String,
    alts: Vec<String>,
    info: Vec<(String, String)>,
    /// Per sample, per haplotype: the called allele index, `None` when
    /// missing.
    genotypes: Vec<Vec<Option<usize>>>,
}

/// Streaming VCF/BCF reader with the SAV reader's pull surface.
pub struct VcfReader {
    path: PathBuf,
    fmt: Fmt,
    backend: Backend,
    header: vcf::Header,
    raw_header: String,
    samples: Vec<String>,
    info_fields: Vec<String>,
    keep: Option<Vec<usize>>,
    region: Option<Region>,
    current: Option<RecordData>,
    alt_cursor: usize,
    state: State,
    line: String,
    line_no: usize,
}

impl VcfReader {
    /// Opens a VCF/BCF file, sniffing compression and format.
    pub fn from_path<P: AsRef<Path>>(path: P, fmt: Fmt) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (backend, raw_header, header) = open_backend(&path)?;
        Ok(Self::from_parts(path, fmt, backend, raw_header, header))
    }

    /// Opens a plain-text VCF from an arbitrary reader.
    ///
    /// A reader-backed instance has no path to reopen, so
    /// [`VcfReader::reset_region`] is unavailable on it.
    pub fn from_reader(reader: Box<dyn BufRead>, fmt: Fmt) -> Result<Self> {
        let (backend, raw_header, header) = open_text(reader)?;
        Ok(Self::from_parts(PathBuf::new(), fmt, backend, raw_header, header))
    }

    fn from_parts(
        path: PathBuf,
        fmt: Fmt,
        backend: Backend,
        raw_header: String,
        header: vcf::Header,
    ) -> Self {
        let samples: Vec<String> = header.sample_names().iter().cloned().collect();
        let mut info_fields = vec!["ID".to_string(), "QUAL".to_string(), "FILTER".to_string()];
        info_fields.extend(header_ids(&raw_header, "INFO"));
        Self {
            path,
            fmt,
            backend,
            header,
            raw_header,
            samples,
            info_fields,
            keep: None,
            region: None,
            current: None,
            alt_cursor: 0,
            state: State::Good,
            line: String::new(),
            line_no: 0,
        }
    }

    #[must_use]
    pub fn good(&self) -> bool {
        self.state == State::Good
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.state != State::Good
    }

    #[must_use]
    pub fn bad(&self) -> bool {
        self.state == State::Bad
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Property names carried by every record: `ID`, `QUAL`, `FILTER`,
    /// then the header-declared INFO fields in order.
    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        &self.info_fields
    }

    /// Raw header records as key/value pairs (`##key=value` lines).
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.raw_header
            .lines()
            .filter_map(|line| line.strip_prefix("##"))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Contig names declared in the header.
    #[must_use]
    pub fn chromosomes(&self) -> Vec<String> {
        header_ids(&self.raw_header, "contig")
    }

    /// Restricts subsequent reads to the named samples; returns the kept
    /// names in file order.
    pub fn subset_samples(&mut self, subset: &HashSet<String>) -> Vec<String> {
        let mut keep = Vec::new();
        let mut kept_names = Vec::new();
        for (i, name) in self.samples.iter().enumerate() {
            if subset.contains(name) {
                keep.push(i);
                kept_names.push(name.clone());
            }
        }
        self.keep = Some(keep);
        kept_names
    }

    /// Rewinds to the start of `region` by reopening the file; the next
    /// read returns the region's first record.
    pub fn reset_region(&mut self, region: Region) -> Result<()> {
        let (backend, raw_header, header) = open_backend(&self.path)?;
        self.backend = backend;
        self.raw_header = raw_header;
        self.header = header;
        self.region = Some(region);
        self.current = None;
        self.alt_cursor = 0;
        self.state = State::Good;
        self.line.clear();
        self.line_no = 0;
        Ok(())
    }

    /// Reads the next logical marker: site annotations into `site`, the
    /// genotype vector (shaped by [`Fmt`]) into `data`. Unknown genotypes
    /// come out as NaN.
    pub fn read(&mut self, site: &mut SiteInfo, data: &mut Vec<f32>) -> bool {
        if self.state != State::Good {
            return false;
        }
        loop {
            let exhausted = match &self.current {
                None => true,
                Some(rec) => self.alt_cursor >= rec.alts.len(),
            };
            if exhausted {
                match self.next_record() {
                    Ok(Some(rec)) => {
                        self.current = Some(rec);
                        self.alt_cursor = 0;
                        continue;
                    }
                    Ok(None) => {
                        self.state = State::Eof;
                        return false;
                    }
                    Err(_) => {
                        self.state = State::Bad;
                        return false;
                    }
                }
            }

            enum Disposition {
                Emit,
                Skip,
                Stop,
            }
            let disposition = match (&self.region, &self.current) {
                (Some(region), Some(rec)) => {
                    if rec.chrom == region.chrom() && rec.position >= region.end() {
                        Disposition::Stop
                    } else if region.contains(&rec.chrom, rec.position) {
                        Disposition::Emit
                    } else {
                        Disposition::Skip
                    }
                }
                _ => Disposition::Emit,
            };
            match disposition {
                Disposition::Stop => {
                    self.state = State::Eof;
                    return false;
                }
                Disposition::Skip => {
                    self.current = None;
                    continue;
                }
                Disposition::Emit => {}
            }

            let alt_i = self.alt_cursor;
            self.alt_cursor += 1;
            let Some(rec) = self.current.as_ref() else {
                continue;
            };
            fill_site(rec, alt_i, site);
            self.fill_dense(rec, alt_i, data);
            return true;
        }
    }

    fn next_record(&mut self) -> Result<Option<RecordData>> {
        match &mut self.backend {
            Backend::Text(reader) => loop {
                self.line.clear();
                if reader.read_line(&mut self.line)? == 0 {
                    return Ok(None);
                }
                self.line_no += 1;
                let line = self.line.trim_end();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                return parse_text_record(line, self.line_no, self.samples.len()).map(Some);
            },
            Backend::Bcf { reader, buf } => {
                if reader.read_record_buf(&self.header, buf)? == 0 {
                    Ok(None)
                } else {
                    Ok(Some(record_from_buf(buf, self.samples.len())))
                }
            }
        }
    }

    fn kept(&self, n_samples: usize) -> Vec<usize> {
        match &self.keep {
            Some(keep) => keep.clone(),
            None => (0..n_samples).collect(),
        }
    }

    fn fill_dense(&self, rec: &RecordData, alt_i: usize, data: &mut Vec<f32>) {
        let alt_index = alt_i + 1;
        data.clear();
        match self.fmt {
            Fmt::Allele => {
                for sample in self.kept(rec.genotypes.len()) {
                    for allele in &rec.genotypes[sample] {
                        data.push(match allele {
                            None => f32::NAN,
                            Some(a) if *a == alt_index => 1.0,
                            Some(_) => 0.0,
                        });
                    }
                }
            }
            Fmt::Genotype | Fmt::Dosage => {
                for sample in self.kept(rec.genotypes.len()) {
                    let mut value = 0.0f32;
                    for allele in &rec.genotypes[sample] {
                        match allele {
                            None => value = f32::NAN,
                            Some(a) if *a == alt_index => value += 1.0,
                            Some(_) => {}
                        }
                    }
                    data.push(value);
                }
            }
        }
    }
}

/// Sniffs the input and opens the matching backend.
fn open_backend(path: &Path) -> Result<(Backend, String, vcf::Header)> {
    let mut probe = File::open(path).map(BufReader::new)?;
    let head = probe.fill_buf()?;
    let gz = head.get(..2) == Some(&GZIP_MAGIC[..]);
    let is_bcf = if gz {
        let mut decoder = MultiGzDecoder::new(head);
        let mut magic = [0u8; 3];
        decoder
            .read_exact(&mut magic)
            .map(|()| magic == BCF_MAGIC)
            .unwrap_or(false)
    } else {
        head.get(..3) == Some(&BCF_MAGIC[..])
    };
    drop(probe);

    if is_bcf {
        open_bcf(path)
    } else {
        let file = File::open(path).map(BufReader::new)?;
        let reader: Box<dyn BufRead> = if gz {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(file)
        };
        open_text(reader)
    }
}

/// Accumulates `#`-prefixed header lines and parses them.
fn open_text(mut reader: Box<dyn BufRead>) -> Result<(Backend, String, vcf::Header)> {
    let mut raw_header = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if !line.starts_with('#') {
            return Err(ReadError::InvalidHeader("missing #CHROM line".to_string()).into());
        }
        let is_last = line.starts_with("#CHROM");
        raw_header.push_str(&line);
        if is_last {
            break;
        }
    }
    let header: vcf::Header = raw_header
        .parse()
        .map_err(|e: vcf::header::ParseError| ReadError::InvalidHeader(e.to_string()))?;
    Ok((Backend::Text(reader), raw_header, header))
}

fn open_bcf(path: &Path) -> Result<(Backend, String, vcf::Header)> {
    let mut reader = bcf::io::Reader::new(File::open(path)?);
    let header = reader.read_header()?;
    let raw_header = read_bcf_header_text(path).unwrap_or_default();
    Ok((
        Backend::Bcf {
            reader,
            buf: RecordBuf::default(),
        },
        raw_header,
        header,
    ))
}

/// Recovers the raw VCF header text embedded in a BCF file: after the
/// five magic/version bytes comes a little-endian length and the
/// NUL-terminated header text.
fn read_bcf_header_text(path: &Path) -> Result<String> {
    let mut reader = bgzf::Reader::new(File::open(path)?);
    let mut magic = [0u8; 5];
    reader.read_exact(&mut magic)?;
    if magic[..3] != BCF_MAGIC {
        return Err(ReadError::InvalidHeader("missing BCF magic".to_string()).into());
    }
    let l_text = reader.read_u32::<LittleEndian>()?;
    let mut text = vec![0u8; l_text as usize];
    reader.read_exact(&mut text)?;
    while text.last() == Some(&0) {
        text.pop();
    }
    String::from_utf8(text).map_err(|_| ReadError::InvalidString.into())
}

/// IDs of `##<kind>=<ID=...>` header records, in declaration order.
fn header_ids(raw_header: &str, kind: &str) -> Vec<String> {
    let prefix = format!("##{kind}=<");
    raw_header
        .lines()
        .filter_map(|line| line.strip_prefix(&prefix))
        .filter_map(|body| {
            body.split(',')
                .find_map(|field| field.strip_prefix("ID="))
                .map(|id| id.trim_end_matches('>').to_string())
        })
        .collect()
}

fn dot_empty(field: &str) -> String {
    if field == "." {
        String::new()
    } else {
        field.to_string()
    }
}

fn parse_text_record(line: &str, line_no: usize, n_samples: usize) -> Result<RecordData> {
    let fields: Vec<&str> = line.split('\t').collect();
    let required = if n_samples > 0 { 10 } else { 8 };
    if fields.len() < required {
        return Err(ReadError::MalformedRecord(
            line_no,
            format!("expected at least {required} fields, got {}", fields.len()),
        )
        .into());
    }

    let position: u64 = fields[1]
        .parse()
        .map_err(|_| ReadError::MalformedRecord(line_no, "invalid POS field".to_string()))?;

    let alts: Vec<String> = if fields[4] == "." {
        Vec::new()
    } else {
        fields[4].split(',').map(str::to_string).collect()
    };

    let info = if fields[7] == "." {
        Vec::new()
    } else {
        fields[7]
            .split(';')
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect()
    };

    let mut genotypes = Vec::with_capacity(n_samples);
    if n_samples > 0 {
        let gt_idx = fields[8].split(':').position(|f| f == "GT");
        for sample_field in fields[9..].iter().take(n_samples) {
            let alleles = match gt_idx {
                Some(i) => parse_gt(sample_field.split(':').nth(i).unwrap_or(".")),
                None => vec![None, None],
            };
            genotypes.push(alleles);
        }
        // Samples the line does not cover read as missing.
        while genotypes.len() < n_samples {
            genotypes.push(vec![None, None]);
        }
    }

    Ok(RecordData {
        chrom: fields[0].to_string(),
        position,
        id: dot_empty(fields[2]),
        qual: dot_empty(fields[5]),
        filter: dot_empty(fields[6]),
        ref_allele: fields[3].to_string(),
        alts,
        info,
        genotypes,
    })
}

/// Parses a GT call (`0|1`, `0/1`, `.`, `1`) into per-haplotype allele
/// indices. Anything unparseable reads as missing.
fn parse_gt(gt: &str) -> Vec<Option<usize>> {
    gt.split(|c| c == '|' || c == '/')
        .map(|allele| {
            if allele.is_empty() || allele == "." {
                None
            } else {
                allele.parse::<usize>().ok()
            }
        })
        .collect()
}

fn record_from_buf(record: &RecordBuf, n_samples: usize) -> RecordData {
    let position = record
        .variant_start()
        .map(|p| usize::from(p) as u64)
        .unwrap_or_default();

    let id = record
        .ids()
        .as_ref()
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(";");
    let qual = record
        .quality_score()
        .map(|q| q.to_string())
        .unwrap_or_default();
    let filter = record
        .filters()
        .as_ref()
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(";");

    let info = record
        .info()
        .as_ref()
        .iter()
        .map(|(k, v)| {
            let value = v.as_ref().map(info_value_string).unwrap_or_default();
            (k.clone(), value)
        })
        .collect();

    let series = record.samples().select(key::GENOTYPE);
    let mut genotypes = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let alleles = match series.as_ref().and_then(|s| s.get(i)) {
            Some(Some(Value::Genotype(genotype))) => {
                genotype.as_ref().iter().map(|allele| allele.position()).collect()
            }
            Some(Some(Value::String(text))) => GenotypeValue::from_str(text)
                .map(|g| g.as_ref().iter().map(|allele| allele.position()).collect())
                .unwrap_or_else(|_| vec![None, None]),
            _ => vec![None, None],
        };
        genotypes.push(alleles);
    }

    RecordData {
        chrom: record.reference_sequence_name().to_string(),
        position,
        id,
        qual,
        filter,
        ref_allele: record.reference_bases().to_string(),
        alts: record.alternate_bases().as_ref().to_vec(),
        info,
        genotypes,
    }
}

fn info_value_string(value: &InfoValue) -> String {
    match value {
        InfoValue::Integer(n) => n.to_string(),
        InfoValue::Float(n) => n.to_string(),
        InfoValue::Flag => String::new(),
        InfoValue::Character(c) => c.to_string(),
        InfoValue::String(s) => s.clone(),
        InfoValue::Array(array) => info_array_string(array),
    }
}

fn info_array_string(array: &InfoArray) -> String {
    fn join<T: ToString>(values: &[Option<T>]) -> String {
        values
            .iter()
            .map(|v| v.as_ref().map_or_else(|| ".".to_string(), T::to_string))
            .collect::<Vec<_>>()
            .join(",")
    }
    match array {
        InfoArray::Integer(values) => join(values),
        InfoArray::Float(values) => join(values),
        InfoArray::Character(values) => join(values),
        InfoArray::String(values) => join(values),
    }
}

fn fill_site(rec: &RecordData, alt_i: usize, site: &mut SiteInfo) {
    site.clear();
    site.chromosome.push_str(&rec.chrom);
    site.position = rec.position;
    site.ref_allele.push_str(&rec.ref_allele);
    site.alt_allele.push_str(&rec.alts[alt_i]);
    site.set_prop("ID", rec.id.as_str());
    site.set_prop("QUAL", rec.qual.as_str());
    site.set_prop("FILTER", rec.filter.as_str());
    for (key, value) in &rec.info {
        site.set_prop(key.as_str(), value.as_str());
    }
}
