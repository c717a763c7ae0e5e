use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Keys end up inside file names, so they must be non-empty and free of
/// whitespace and path separators.
fn validate_key(kind: &str, value: &str) -> Result<String, KiraError> {
    let trimmed = value.trim();
    let is_valid = !trimmed.is_empty()
        && !trimmed
            .chars()
            .any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\');
    if !is_valid {
        return Err(KiraError::MalformedInput(format!("invalid {kind}: {value:?}")));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_key("sample id", value).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetId(String);

impl SetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SetId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_key("set id", value).map(Self)
    }
}

/// Fraction identity shared by the spectra definition and the fraction
/// databases. Compared by exact string equality, never normalised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FractionKey(String);

impl FractionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FractionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FractionKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_key("fraction key", value).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub id: SampleId,
    pub transcript_model: Utf8PathBuf,
}

/// One line of the spectra definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpectraRecord {
    pub fraction: FractionKey,
    pub set: SetId,
    pub sample: SampleId,
    pub spectra: Utf8PathBuf,
}

/// Candidate peptide database for one fraction, as produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FractionDatabase {
    pub fraction: FractionKey,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDecoyDatabase {
    pub fraction: FractionKey,
    pub path: Utf8PathBuf,
    pub canonical_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchUnit {
    pub fraction: FractionKey,
    pub set: SetId,
    pub sample: SampleId,
    pub spectra: Utf8PathBuf,
    pub database: Utf8PathBuf,
}

impl SearchUnit {
    pub fn key(&self) -> (&FractionKey, &SetId, &SampleId) {
        (&self.fraction, &self.set, &self.sample)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentificationResult {
    pub set: SetId,
    pub fraction: FractionKey,
    pub sample: SampleId,
    pub ident: Utf8PathBuf,
    pub table: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub set: SetId,
    pub validated: Utf8PathBuf,
}

/// Identification results of one analytical set, in the order the samples
/// were declared for that set, joined with the set's validation output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetGroup {
    pub set: SetId,
    pub members: Vec<IdentificationResult>,
    pub validation: ValidationResult,
}

impl SetGroup {
    pub fn samples(&self) -> Vec<&SampleId> {
        self.members.iter().map(|member| &member.sample).collect()
    }
}

/// What the correspondence join does with a spectra record whose fraction
/// has no database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyMiss {
    #[default]
    Reject,
    Drop,
}

impl fmt::Display for KeyMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMiss::Reject => write!(f, "reject"),
            KeyMiss::Drop => write!(f, "drop"),
        }
    }
}
