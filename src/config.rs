use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::KeyMiss;
use crate::error::KiraError;
use crate::tasks::host_threads;
use crate::tools::{Tool, ToolTable};

pub const CONFIG_FILE_NAME: &str = "kira-pg.json";
pub const DEFAULT_MISSED_CLEAVAGES: u32 = 2;
pub const DEFAULT_ENZYME: &str = "Trypsin/P";
pub const DEFAULT_SPECTRA_SUFFIX: &str = ".mzML";
pub const DEFAULT_SEARCH_THREADS: usize = 4;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub missed_cleavages: Option<u32>,
    #[serde(default)]
    pub enzyme: Option<String>,
    #[serde(default)]
    pub modifications: Option<String>,
    #[serde(default)]
    pub binning: Option<BinningEntry>,
    #[serde(default)]
    pub spectra_suffix: Option<String>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub search_threads: Option<usize>,
    #[serde(default)]
    pub unmatched_fractions: Option<KeyMiss>,
    #[serde(default)]
    pub pi_server: Option<bool>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BinningEntry {
    #[serde(default)]
    pub intercept: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub amount: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ToolEntry {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Linear pI-to-fraction model handed to the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Binning {
    pub intercept: f64,
    pub width: f64,
    pub tolerance: f64,
    pub amount: u32,
}

impl Default for Binning {
    fn default() -> Self {
        Self {
            intercept: 3.5,
            width: 0.07,
            tolerance: 0.11,
            amount: 72,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestParams {
    pub enzyme: String,
    pub missed_cleavages: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub digest: DigestParams,
    pub modifications: Option<Utf8PathBuf>,
    pub binning: Binning,
    pub spectra_suffix: String,
    pub max_parallel: usize,
    pub search_threads: usize,
    pub unmatched_fractions: KeyMiss,
    pub pi_server: bool,
    pub tools: ToolTable,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            digest: DigestParams {
                enzyme: DEFAULT_ENZYME.to_string(),
                missed_cleavages: DEFAULT_MISSED_CLEAVAGES,
            },
            modifications: None,
            binning: Binning::default(),
            spectra_suffix: DEFAULT_SPECTRA_SUFFIX.to_string(),
            max_parallel: host_threads(),
            search_threads: DEFAULT_SEARCH_THREADS,
            unmatched_fractions: KeyMiss::Reject,
            pi_server: false,
            tools: ToolTable::default(),
        }
    }
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub missed_cleavages: Option<u32>,
    pub enzyme: Option<String>,
    pub modifications: Option<String>,
    pub intercept: Option<f64>,
    pub width: Option<f64>,
    pub tolerance: Option<f64>,
    pub amount: Option<u32>,
    pub max_parallel: Option<usize>,
    pub search_threads: Option<usize>,
    pub unmatched_fractions: Option<KeyMiss>,
}

impl ResolvedConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, KiraError> {
        if let Some(value) = overrides.missed_cleavages {
            self.digest.missed_cleavages = value;
        }
        if let Some(value) = overrides.enzyme {
            self.digest.enzyme = value;
        }
        if let Some(value) = overrides.modifications {
            self.modifications = Some(Utf8PathBuf::from(value));
        }
        if let Some(value) = overrides.intercept {
            self.binning.intercept = value;
        }
        if let Some(value) = overrides.width {
            self.binning.width = value;
        }
        if let Some(value) = overrides.tolerance {
            self.binning.tolerance = value;
        }
        if let Some(value) = overrides.amount {
            self.binning.amount = value;
        }
        if let Some(value) = overrides.max_parallel {
            self.max_parallel = value;
        }
        if let Some(value) = overrides.search_threads {
            self.search_threads = value;
        }
        if let Some(value) = overrides.unmatched_fractions {
            self.unmatched_fractions = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        let binning = &self.binning;
        if !(binning.width.is_finite() && binning.width > 0.0) {
            return Err(KiraError::InvalidConfig(format!(
                "binning width must be positive, got {}",
                binning.width
            )));
        }
        if !(binning.tolerance.is_finite() && binning.tolerance >= 0.0) {
            return Err(KiraError::InvalidConfig(format!(
                "binning tolerance must be non-negative, got {}",
                binning.tolerance
            )));
        }
        if !binning.intercept.is_finite() {
            return Err(KiraError::InvalidConfig("binning intercept is not finite".to_string()));
        }
        if binning.amount == 0 {
            return Err(KiraError::InvalidConfig("binning amount must be positive".to_string()));
        }
        if self.digest.enzyme.trim().is_empty() {
            return Err(KiraError::InvalidConfig("enzyme must not be empty".to_string()));
        }
        if self.max_parallel == 0 || self.search_threads == 0 {
            return Err(KiraError::InvalidConfig(
                "max_parallel and search_threads must be at least 1".to_string(),
            ));
        }
        self.tools.validate()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit paths must exist. Without one, `kira-pg.json` in the current
    /// directory and then in the user config directory are tried, and
    /// built-in defaults are used when neither exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let Some(config_path) = config_path else {
            debug!("no config file found, using defaults");
            let resolved = ResolvedConfig::default();
            resolved.validate()?;
            return Ok(resolved);
        };

        debug!("loading config from {}", config_path.display());
        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        Self::resolve_str(&content)
    }

    pub fn resolve_str(content: &str) -> Result<ResolvedConfig, KiraError> {
        let config: Config =
            serde_json::from_str(content).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();
        let binning = config.binning.unwrap_or_default();

        let mut tools = ToolTable::default();
        for (name, entry) in config.tools {
            let tool: Tool = name.parse()?;
            if let Some(program) = entry.program {
                tools.override_program(tool, program);
            }
            if let Some(args) = entry.args {
                tools.override_args(tool, args);
            }
        }

        let resolved = ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            digest: DigestParams {
                enzyme: config.enzyme.unwrap_or(defaults.digest.enzyme),
                missed_cleavages: config
                    .missed_cleavages
                    .unwrap_or(defaults.digest.missed_cleavages),
            },
            modifications: config.modifications.map(Utf8PathBuf::from),
            binning: Binning {
                intercept: binning.intercept.unwrap_or(defaults.binning.intercept),
                width: binning.width.unwrap_or(defaults.binning.width),
                tolerance: binning.tolerance.unwrap_or(defaults.binning.tolerance),
                amount: binning.amount.unwrap_or(defaults.binning.amount),
            },
            spectra_suffix: config.spectra_suffix.unwrap_or(defaults.spectra_suffix),
            max_parallel: config.max_parallel.unwrap_or(defaults.max_parallel),
            search_threads: config.search_threads.unwrap_or(defaults.search_threads),
            unmatched_fractions: config
                .unmatched_fractions
                .unwrap_or(defaults.unmatched_fractions),
            pi_server: config.pi_server.unwrap_or(defaults.pi_server),
            tools,
        };
        resolved.validate()?;
        Ok(resolved)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "kira-pg")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.digest.missed_cleavages, 2);
        assert_eq!(resolved.digest.enzyme, "Trypsin/P");
        assert_eq!(resolved.binning, Binning::default());
        assert_eq!(resolved.unmatched_fractions, KeyMiss::Reject);
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let resolved = ResolvedConfig::default()
            .apply(ConfigOverrides {
                amount: Some(10),
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(resolved.binning.amount, 10);

        let err = ResolvedConfig::default()
            .apply(ConfigOverrides {
                width: Some(0.0),
                ..ConfigOverrides::default()
            })
            .unwrap_err();
        assert_matches!(err, KiraError::InvalidConfig(_));
    }
}
