use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{FractionKey, Sample, SampleId, SetId, SpectraRecord};
use crate::error::KiraError;

/// Turns the two raw inputs (transcript model paths and the spectra
/// definition text) into typed records. Does not touch the listed files.
#[derive(Debug, Clone)]
pub struct RecordIngestor {
    spectra_suffix: String,
}

impl RecordIngestor {
    pub fn new(spectra_suffix: impl Into<String>) -> Self {
        Self {
            spectra_suffix: spectra_suffix.into(),
        }
    }

    pub fn samples<I, P>(&self, paths: I) -> Result<Vec<Sample>, KiraError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        for path in paths {
            let path = path.into();
            let id = sample_id_from_path(&path)?;
            if !seen.insert(id.clone()) {
                return Err(KiraError::MalformedInput(format!(
                    "duplicate sample id {id} (from {path})"
                )));
            }
            samples.push(Sample {
                id,
                transcript_model: path,
            });
        }
        Ok(samples)
    }

    /// Columns are `spectraPath setId fractionId`; extra columns are ignored.
    pub fn spectra_records(&self, definition: &str) -> Result<Vec<SpectraRecord>, KiraError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (index, line) in definition.lines().enumerate() {
            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if tokens.is_empty() {
                continue;
            }
            let [spectra, set, fraction, ..] = tokens.as_slice() else {
                return Err(KiraError::MalformedInput(format!(
                    "spectra definition line {}: expected 3 columns, found {}",
                    index + 1,
                    tokens.len()
                )));
            };
            let spectra = Utf8PathBuf::from(*spectra);
            let record = SpectraRecord {
                sample: sample_from_spectra_path(&spectra, &self.spectra_suffix)?,
                set: set.parse()?,
                fraction: fraction.parse()?,
                spectra,
            };
            if !seen.insert((record.set.clone(), record.sample.clone())) {
                return Err(KiraError::MalformedInput(format!(
                    "spectra definition line {}: sample {} declared twice for set {}",
                    index + 1,
                    record.sample,
                    record.set
                )));
            }
            records.push(record);
        }
        if records.is_empty() {
            return Err(KiraError::MalformedInput(
                "spectra definition has no records".to_string(),
            ));
        }
        Ok(records)
    }

    pub fn read_spectra_definition(&self, path: &Utf8Path) -> Result<Vec<SpectraRecord>, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::MalformedInput(format!("read {path}: {err}")))?;
        self.spectra_records(&content)
    }
}

/// Leading dot-delimited segment of the file name.
pub fn sample_id_from_path(path: &Utf8Path) -> Result<SampleId, KiraError> {
    let name = path
        .file_name()
        .ok_or_else(|| KiraError::MalformedInput(format!("no file name in {path}")))?;
    let stem = name.split('.').next().unwrap_or(name);
    stem.parse()
}

/// File name with directories and the spectra suffix removed.
pub fn sample_from_spectra_path(path: &Utf8Path, suffix: &str) -> Result<SampleId, KiraError> {
    let name = path
        .file_name()
        .ok_or_else(|| KiraError::MalformedInput(format!("no file name in {path}")))?;
    name.strip_suffix(suffix).unwrap_or(name).parse()
}

/// Distinct fraction keys in first-appearance order.
pub fn distinct_fractions(records: &[SpectraRecord]) -> Vec<FractionKey> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|record| seen.insert(&record.fraction))
        .map(|record| record.fraction.clone())
        .collect()
}

/// Distinct set ids in first-appearance order.
pub fn distinct_sets(records: &[SpectraRecord]) -> Vec<SetId> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|record| seen.insert(&record.set))
        .map(|record| record.set.clone())
        .collect()
}
