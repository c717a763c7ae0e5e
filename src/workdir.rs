use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{FractionKey, SampleId, SetId};
use crate::error::KiraError;
use crate::tools::Tool;

pub const FRACTION_DB_PREFIX: &str = "db_";
pub const FRACTION_DB_EXT: &str = "fa";

/// Directory layout and file naming of one pipeline run. Every
/// convention the external tools rely on is spelled out here.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: Utf8PathBuf,
}

impl WorkDir {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<(), KiraError> {
        for dir in [
            self.samples_dir(),
            self.combined_dir(),
            self.fractions_dir(),
            self.target_decoy_dir(),
            self.search_dir(),
            self.validation_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    pub fn samples_dir(&self) -> Utf8PathBuf {
        self.root.join("samples")
    }

    pub fn combined_dir(&self) -> Utf8PathBuf {
        self.root.join("combined")
    }

    pub fn fractions_dir(&self) -> Utf8PathBuf {
        self.root.join("fractions")
    }

    pub fn target_decoy_dir(&self) -> Utf8PathBuf {
        self.root.join("target_decoy")
    }

    pub fn search_dir(&self) -> Utf8PathBuf {
        self.root.join("search")
    }

    pub fn validation_dir(&self) -> Utf8PathBuf {
        self.root.join("validation")
    }

    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.root.join("logs")
    }

    pub fn sample_nucleotides(&self, sample: &SampleId) -> Utf8PathBuf {
        self.samples_dir().join(format!("{sample}.nt.fa"))
    }

    pub fn sample_proteins(&self, sample: &SampleId) -> Utf8PathBuf {
        self.samples_dir().join(format!("{sample}.3frame.fa"))
    }

    pub fn combined_proteins(&self) -> Utf8PathBuf {
        self.combined_dir().join("combined.fa")
    }

    pub fn combined_stop_split(&self) -> Utf8PathBuf {
        self.combined_dir().join("combined.nostop.fa")
    }

    pub fn combined_peptides(&self) -> Utf8PathBuf {
        self.combined_dir().join("peptides.fa")
    }

    pub fn combined_pi(&self) -> Utf8PathBuf {
        self.combined_dir().join("peptides.pi.tsv")
    }

    pub fn fraction_list(&self) -> Utf8PathBuf {
        self.fractions_dir().join("fractions.txt")
    }

    pub fn fraction_db(&self, fraction: &FractionKey) -> Utf8PathBuf {
        self.fractions_dir().join(fraction_db_file_name(fraction))
    }

    pub fn canonical_peptides(&self) -> Utf8PathBuf {
        self.target_decoy_dir().join("canonical.peptides.fa")
    }

    pub fn target_decoy_db(&self, fraction: &FractionKey) -> Utf8PathBuf {
        self.target_decoy_dir()
            .join(format!("{FRACTION_DB_PREFIX}{fraction}.td.{FRACTION_DB_EXT}"))
    }

    pub fn set_search_dir(&self, set: &SetId) -> Utf8PathBuf {
        self.search_dir().join(format!("Set{set}"))
    }

    pub fn ident_path(&self, set: &SetId, sample: &SampleId) -> Utf8PathBuf {
        self.set_search_dir(set).join(format!("{sample}.mzid"))
    }

    pub fn table_path(&self, set: &SetId, sample: &SampleId) -> Utf8PathBuf {
        self.set_search_dir(set).join(format!("{sample}.tsv"))
    }

    pub fn validation_inputs(&self, set: &SetId) -> Utf8PathBuf {
        self.validation_dir().join(format!("Set{set}.inputs.txt"))
    }

    pub fn validation_output(&self, set: &SetId) -> Utf8PathBuf {
        self.validation_dir().join(format!("Set{set}.perco.xml"))
    }

    pub fn log_path(&self, tool: Tool, label: &str) -> Utf8PathBuf {
        self.logs_dir().join(format!("{}-{label}.log", tool.name()))
    }

    /// Logs of set-scoped invocations live in `logs/Set<set>/`. Keys never
    /// contain a path separator, so distinct (set, label) pairs never share
    /// a file.
    pub fn set_log_path(&self, tool: Tool, set: &SetId, label: &str) -> Utf8PathBuf {
        self.logs_dir()
            .join(format!("Set{set}"))
            .join(format!("{}-{label}.log", tool.name()))
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join("run.json")
    }

    pub fn write_manifest<T: Serialize>(&self, manifest: &T) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.manifest_path(), &content)
    }
}

pub fn fraction_db_file_name(fraction: &FractionKey) -> String {
    format!("{FRACTION_DB_PREFIX}{fraction}.{FRACTION_DB_EXT}")
}

/// Inverse of [`fraction_db_file_name`]. Returns the raw key text; callers
/// match it against the requested keys by exact string comparison.
pub fn fraction_key_from_file_name(name: &str) -> Option<&str> {
    name.strip_prefix(FRACTION_DB_PREFIX)?
        .strip_suffix(FRACTION_DB_EXT)?
        .strip_suffix('.')
        .filter(|key| !key.is_empty())
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-pg")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn is_empty_file(path: &Utf8Path) -> Result<bool, KiraError> {
    let meta = fs::metadata(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("stat {path}: {err}")))?;
    Ok(meta.len() == 0)
}
