use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::config::Binning;
use crate::domain::{FractionDatabase, FractionKey};
use crate::error::KiraError;
use crate::tasks::CancelToken;
use crate::tools::{Tool, ToolInvocation, ToolRunner};
use crate::workdir::{FRACTION_DB_PREFIX, WorkDir, fraction_key_from_file_name, write_bytes_atomic};

pub struct FractionSplitter<'a, R: ToolRunner> {
    runner: &'a R,
    workdir: &'a WorkDir,
    binning: Binning,
}

impl<'a, R: ToolRunner> FractionSplitter<'a, R> {
    pub fn new(runner: &'a R, workdir: &'a WorkDir, binning: Binning) -> Self {
        Self {
            runner,
            workdir,
            binning,
        }
    }

    /// Produces exactly one candidate database per requested fraction, in
    /// request order. Fractions the splitter left out get an empty file.
    pub fn split(
        &self,
        annotated: &Utf8Path,
        reference: &Utf8Path,
        fractions: &[FractionKey],
        cancel: &CancelToken,
    ) -> Result<Vec<FractionDatabase>, KiraError> {
        let outdir = self.workdir.fractions_dir();
        self.clear_previous(&outdir)?;
        let fraction_list = self.workdir.fraction_list();
        let listing = fractions
            .iter()
            .map(|fraction| format!("{fraction}\n"))
            .collect::<String>();
        write_bytes_atomic(&fraction_list, listing.as_bytes())?;

        let invocation = ToolInvocation::new(
            Tool::SplitFractions,
            "combined",
            self.workdir.log_path(Tool::SplitFractions, "combined"),
        )
        .bind("input", annotated)
        .bind("reference", reference)
        .bind("fractions_list", &fraction_list)
        .bind("intercept", self.binning.intercept)
        .bind("width", self.binning.width)
        .bind("tolerance", self.binning.tolerance)
        .bind("amount", self.binning.amount)
        .bind("prefix", FRACTION_DB_PREFIX)
        .bind("outdir", &outdir);
        self.runner.run(&invocation, cancel)?;

        self.collect(fractions)
    }

    /// Candidate databases left by an earlier run in the same work directory
    /// would otherwise be read back as this run's splitter output.
    fn clear_previous(&self, outdir: &Utf8Path) -> Result<(), KiraError> {
        fs::create_dir_all(outdir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {outdir}: {err}")))?;
        let entries = fs::read_dir(outdir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {outdir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if fraction_key_from_file_name(name).is_some() {
                debug!("removing stale candidate database {name}");
                fs::remove_file(entry.path())
                    .map_err(|err| KiraError::Filesystem(format!("remove {name}: {err}")))?;
            }
        }
        Ok(())
    }

    /// Recovers fraction keys from the splitter's output names. This is the
    /// only place a key is decoded from a file name.
    pub fn collect(&self, fractions: &[FractionKey]) -> Result<Vec<FractionDatabase>, KiraError> {
        let outdir = self.workdir.fractions_dir();
        let requested = fractions.iter().map(FractionKey::as_str).collect::<HashSet<_>>();

        let entries = fs::read_dir(outdir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {outdir}: {err}")))?;
        let mut produced = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(key) = fraction_key_from_file_name(name) else {
                debug!("ignoring splitter output {name}");
                continue;
            };
            if !requested.contains(key) {
                return Err(KiraError::Correspondence(format!(
                    "splitter produced {name} for fraction {key:?} which no spectra file references"
                )));
            }
            produced.insert(key.to_string());
        }

        let mut databases = Vec::with_capacity(fractions.len());
        for fraction in fractions {
            let path = self.workdir.fraction_db(fraction);
            if !produced.contains(fraction.as_str()) {
                info!(fraction = %fraction, "no candidate peptides, writing empty database");
                write_bytes_atomic(&path, b"")?;
            }
            databases.push(FractionDatabase {
                fraction: fraction.clone(),
                path,
            });
        }
        Ok(databases)
    }
}
