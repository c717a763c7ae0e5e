use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::config::DigestParams;
use crate::domain::{Sample, SampleId};
use crate::error::KiraError;
use crate::fasta::{merge_dedup, read_fasta, split_stop_codons, write_fasta};
use crate::tasks::{CancelToken, TaskGroup};
use crate::tools::{Tool, ToolInvocation, ToolRunner};
use crate::workdir::WorkDir;

/// Three-frame protein set of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleProteins {
    pub sample: SampleId,
    pub proteins: Utf8PathBuf,
}

/// Artifacts of the combined transcript database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedDatabase {
    pub proteins: Utf8PathBuf,
    pub stop_split: Utf8PathBuf,
    pub peptides: Utf8PathBuf,
    pub annotated: Utf8PathBuf,
    pub records: usize,
}

pub struct TranscriptDatabaseBuilder<'a, R: ToolRunner> {
    runner: &'a R,
    workdir: &'a WorkDir,
    genome: &'a Utf8Path,
    digest: &'a DigestParams,
    pi_server: bool,
}

impl<'a, R: ToolRunner> TranscriptDatabaseBuilder<'a, R> {
    pub fn new(
        runner: &'a R,
        workdir: &'a WorkDir,
        genome: &'a Utf8Path,
        digest: &'a DigestParams,
        pi_server: bool,
    ) -> Self {
        Self {
            runner,
            workdir,
            genome,
            digest,
            pi_server,
        }
    }

    /// Per-sample branches, then the fan-in barrier, then the shared tail.
    pub fn build(&self, group: &TaskGroup, samples: &[Sample]) -> Result<CombinedDatabase, KiraError> {
        let per_sample = group.run(samples.to_vec(), |sample, cancel| {
            self.translate_sample(&sample, cancel)
        })?;
        let cancel = group.cancel_token();

        let (proteins, records) = self.merge(&per_sample)?;
        let stop_split = self.split_stops(&proteins)?;
        let peptides = self.workdir.combined_peptides();
        digest(
            self.runner,
            self.workdir,
            self.digest,
            &stop_split,
            &peptides,
            "combined",
            cancel,
        )?;
        let annotated = self.annotate_pi(&peptides, cancel)?;

        Ok(CombinedDatabase {
            proteins,
            stop_split,
            peptides,
            annotated,
            records,
        })
    }

    pub fn translate_sample(
        &self,
        sample: &Sample,
        cancel: &CancelToken,
    ) -> Result<SampleProteins, KiraError> {
        let nucleotides = self.workdir.sample_nucleotides(&sample.id);
        let proteins = self.workdir.sample_proteins(&sample.id);

        let extract = ToolInvocation::new(
            Tool::ExtractNucleotides,
            sample.id.as_str(),
            self.workdir.log_path(Tool::ExtractNucleotides, sample.id.as_str()),
        )
        .bind("input", &sample.transcript_model)
        .bind("genome", self.genome)
        .bind("output", &nucleotides)
        .expect_output(&nucleotides);
        self.runner.run(&extract, cancel)?;

        let translate = ToolInvocation::new(
            Tool::Translate,
            sample.id.as_str(),
            self.workdir.log_path(Tool::Translate, sample.id.as_str()),
        )
        .bind("input", &nucleotides)
        .bind("output", &proteins)
        .expect_output(&proteins);
        self.runner.run(&translate, cancel)?;

        info!(sample = %sample.id, "translated");
        Ok(SampleProteins {
            sample: sample.id.clone(),
            proteins,
        })
    }

    /// Fan-in: concatenates every sample's proteins in declaration order and
    /// drops repeated records.
    pub fn merge(&self, per_sample: &[SampleProteins]) -> Result<(Utf8PathBuf, usize), KiraError> {
        let sets = per_sample
            .iter()
            .map(|entry| read_fasta(&entry.proteins))
            .collect::<Result<Vec<_>, _>>()?;
        let total = sets.iter().map(Vec::len).sum::<usize>();
        let merged = merge_dedup(sets);
        info!(
            samples = per_sample.len(),
            records = merged.len(),
            duplicates = total - merged.len(),
            "merged sample proteins"
        );
        let path = self.workdir.combined_proteins();
        write_fasta(&path, &merged)?;
        Ok((path, merged.len()))
    }

    fn split_stops(&self, proteins: &Utf8Path) -> Result<Utf8PathBuf, KiraError> {
        let records = read_fasta(proteins)?;
        let split = split_stop_codons(&records);
        let path = self.workdir.combined_stop_split();
        write_fasta(&path, &split)?;
        Ok(path)
    }

    fn annotate_pi(&self, peptides: &Utf8Path, cancel: &CancelToken) -> Result<Utf8PathBuf, KiraError> {
        let annotated = self.workdir.combined_pi();
        // held until annotation returns, success or not
        let _server = if self.pi_server {
            let server = ToolInvocation::new(
                Tool::PiServer,
                "combined",
                self.workdir.log_path(Tool::PiServer, "combined"),
            );
            Some(self.runner.spawn(&server)?)
        } else {
            None
        };
        let invocation = ToolInvocation::new(
            Tool::PredictPi,
            "combined",
            self.workdir.log_path(Tool::PredictPi, "combined"),
        )
        .bind("input", peptides)
        .bind("output", &annotated)
        .expect_output(&annotated);
        self.runner.run(&invocation, cancel)?;
        Ok(annotated)
    }
}

pub(crate) fn digest<R: ToolRunner>(
    runner: &R,
    workdir: &WorkDir,
    params: &DigestParams,
    input: &Utf8Path,
    output: &Utf8Path,
    label: &str,
    cancel: &CancelToken,
) -> Result<(), KiraError> {
    let invocation = ToolInvocation::new(Tool::Digest, label, workdir.log_path(Tool::Digest, label))
        .bind("input", input)
        .bind("output", output)
        .bind("enzyme", &params.enzyme)
        .bind("missed_cleavages", params.missed_cleavages)
        .expect_output(output);
    runner.run(&invocation, cancel)
}
