use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::config::DigestParams;
use crate::domain::{FractionDatabase, TargetDecoyDatabase};
use crate::error::KiraError;
use crate::tasks::{CancelToken, TaskGroup};
use crate::tools::{Tool, ToolInvocation, ToolRunner};
use crate::transcript::digest;
use crate::workdir::{WorkDir, is_empty_file};

/// Merges the canonical proteome into every fraction database and adds
/// decoys, giving one target-decoy database per fraction.
pub struct CanonicalMerger<'a, R: ToolRunner> {
    runner: &'a R,
    workdir: &'a WorkDir,
    digest: &'a DigestParams,
}

impl<'a, R: ToolRunner> CanonicalMerger<'a, R> {
    pub fn new(runner: &'a R, workdir: &'a WorkDir, digest: &'a DigestParams) -> Self {
        Self {
            runner,
            workdir,
            digest,
        }
    }

    /// Digested once per run and shared read-only by every fraction.
    pub fn digest_canonical(
        &self,
        proteome: &Utf8Path,
        cancel: &CancelToken,
    ) -> Result<Utf8PathBuf, KiraError> {
        let output = self.workdir.canonical_peptides();
        digest(
            self.runner,
            self.workdir,
            self.digest,
            proteome,
            &output,
            "canonical",
            cancel,
        )?;
        Ok(output)
    }

    pub fn build_all(
        &self,
        group: &TaskGroup,
        canonical: &Utf8Path,
        fractions: Vec<FractionDatabase>,
    ) -> Result<Vec<TargetDecoyDatabase>, KiraError> {
        group.run(fractions, |fraction, cancel| {
            self.build(canonical, &fraction, cancel)
        })
    }

    /// An empty fraction database is a valid state: decoys are then built
    /// from the canonical peptides alone.
    pub fn build(
        &self,
        canonical: &Utf8Path,
        fraction: &FractionDatabase,
        cancel: &CancelToken,
    ) -> Result<TargetDecoyDatabase, KiraError> {
        let output = self.workdir.target_decoy_db(&fraction.fraction);
        let label = fraction.fraction.as_str();
        let canonical_only = is_empty_file(&fraction.path)?;

        let base = if canonical_only {
            ToolInvocation::new(
                Tool::DecoyOnly,
                label,
                self.workdir.log_path(Tool::DecoyOnly, label),
            )
            .bind("canonical", canonical)
        } else {
            ToolInvocation::new(
                Tool::TargetDecoy,
                label,
                self.workdir.log_path(Tool::TargetDecoy, label),
            )
            .bind("target", &fraction.path)
            .bind("canonical", canonical)
        };
        let invocation = base.bind("output", &output).expect_output(&output);
        self.runner.run(&invocation, cancel)?;

        info!(fraction = %fraction.fraction, canonical_only, "target-decoy database ready");
        Ok(TargetDecoyDatabase {
            fraction: fraction.fraction.clone(),
            path: output,
            canonical_only,
        })
    }
}
