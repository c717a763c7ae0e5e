//! Protein FASTA handling for the in-process steps of the transcript
//! database: fan-in merge with deduplication and stop-codon splitting.
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;

use camino::Utf8Path;

use crate::error::KiraError;
use crate::workdir::write_bytes_atomic;

pub const STOP_CODON: char = '*';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FastaRecord {
    /// Header line without the leading `>`.
    pub header: String,
    pub sequence: String,
}

impl FastaRecord {
    pub fn new(header: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            sequence: sequence.into(),
        }
    }

    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    fn description(&self) -> Option<&str> {
        self.header
            .trim_start()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .filter(|rest| !rest.is_empty())
    }
}

pub fn parse_fasta(text: &str) -> Result<Vec<FastaRecord>, KiraError> {
    let mut records = Vec::new();
    let mut current: Option<FastaRecord> = None;
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(FastaRecord::new(header.trim(), String::new()));
        } else {
            let record = current.as_mut().ok_or_else(|| {
                KiraError::MalformedInput(format!(
                    "fasta line {}: sequence before first header",
                    index + 1
                ))
            })?;
            record.sequence.push_str(line.trim());
        }
    }
    if let Some(done) = current {
        records.push(done);
    }
    Ok(records)
}

pub fn read_fasta(path: &Utf8Path) -> Result<Vec<FastaRecord>, KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    parse_fasta(&content)
}

pub fn format_fasta(records: &[FastaRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(out, ">{}", record.header);
        let _ = writeln!(out, "{}", record.sequence);
    }
    out
}

pub fn write_fasta(path: &Utf8Path, records: &[FastaRecord]) -> Result<(), KiraError> {
    write_bytes_atomic(path, format_fasta(records).as_bytes())
}

/// Concatenates record sets in the given order, keeping the first occurrence
/// of every identical record. Identity is the whole record: the same id with
/// a different sequence is kept.
pub fn merge_dedup<I>(sets: I) -> Vec<FastaRecord>
where
    I: IntoIterator<Item = Vec<FastaRecord>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for record in sets.into_iter().flatten() {
        if seen.insert((record.header.clone(), record.sequence.clone())) {
            merged.push(record);
        }
    }
    merged
}

/// Splits records at internal stop codons. Fragments are renamed
/// `<id>_<n>`; a record with a single remaining fragment keeps its name,
/// and empty fragments are dropped.
pub fn split_stop_codons(records: &[FastaRecord]) -> Vec<FastaRecord> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if !record.sequence.contains(STOP_CODON) {
            out.push(record.clone());
            continue;
        }
        let fragments = record
            .sequence
            .split(STOP_CODON)
            .filter(|fragment| !fragment.is_empty())
            .collect::<Vec<_>>();
        match fragments.as_slice() {
            [] => {}
            [single] => out.push(FastaRecord::new(record.header.clone(), *single)),
            many => {
                for (index, fragment) in many.iter().enumerate() {
                    let id = format!("{}_{}", record.id(), index + 1);
                    let header = match record.description() {
                        Some(description) => format!("{id} {description}"),
                        None => id,
                    };
                    out.push(FastaRecord::new(header, *fragment));
                }
            }
        }
    }
    out
}
