use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::aggregate::SetAggregator;
use crate::canonical::CanonicalMerger;
use crate::config::ResolvedConfig;
use crate::correspondence::CorrespondenceJoiner;
use crate::domain::{
    FractionKey, IdentificationResult, Sample, SearchUnit, SetGroup, SetId, SpectraRecord,
    TargetDecoyDatabase,
};
use crate::error::KiraError;
use crate::fractions::FractionSplitter;
use crate::ingest::{RecordIngestor, distinct_fractions, distinct_sets};
use crate::search::SearchDispatcher;
use crate::tasks::{CancelToken, TaskGroup, bounded_parallelism, host_threads};
use crate::tools::ToolRunner;
use crate::transcript::{CombinedDatabase, TranscriptDatabaseBuilder};
use crate::workdir::WorkDir;

/// Files a run starts from.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub transcripts: Vec<Utf8PathBuf>,
    pub spectra_definition: Utf8PathBuf,
    pub canonical_proteome: Utf8PathBuf,
    pub genome: Utf8PathBuf,
    pub pi_reference: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub samples: Vec<Sample>,
    pub records: Vec<SpectraRecord>,
    pub fractions: Vec<FractionKey>,
    pub sets: Vec<SetId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub started_at: String,
    pub finished_at: String,
    pub workdir: String,
    pub samples: Vec<Sample>,
    pub combined: CombinedDatabase,
    pub databases: Vec<TargetDecoyDatabase>,
    pub search_units: Vec<SearchUnit>,
    pub identifications: Vec<IdentificationResult>,
    pub set_groups: Vec<SetGroup>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Pipeline<R: ToolRunner> {
    runner: R,
    workdir: WorkDir,
    config: ResolvedConfig,
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(runner: R, workdir: WorkDir, config: ResolvedConfig) -> Self {
        Self {
            runner,
            workdir,
            config,
        }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Ingests and checks the inputs without invoking any tool.
    pub fn plan(&self, inputs: &PipelineInputs) -> Result<RunPlan, KiraError> {
        let ingestor = RecordIngestor::new(self.config.spectra_suffix.clone());
        let samples = ingestor.samples(inputs.transcripts.iter().cloned())?;
        if samples.is_empty() {
            return Err(KiraError::MalformedInput("no transcript models given".to_string()));
        }
        let records = ingestor.read_spectra_definition(&inputs.spectra_definition)?;
        let fractions = distinct_fractions(&records);
        let sets = distinct_sets(&records);
        Ok(RunPlan {
            samples,
            records,
            fractions,
            sets,
        })
    }

    pub fn run(
        &self,
        inputs: &PipelineInputs,
        sink: &dyn ProgressSink,
        cancel: CancelToken,
    ) -> Result<RunSummary, KiraError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        phase(sink, &start, "Ingest", "reading inputs");
        let plan = self.plan(inputs)?;
        let modifications = self.config.modifications.as_deref().ok_or_else(|| {
            KiraError::InvalidConfig("no modification table configured".to_string())
        })?;
        self.workdir.ensure()?;

        let branches = TaskGroup::new(self.config.max_parallel, cancel.clone())?;
        let searches = TaskGroup::new(
            bounded_parallelism(
                self.config.max_parallel,
                self.config.search_threads,
                host_threads(),
            ),
            cancel.clone(),
        )?;
        info!(
            samples = plan.samples.len(),
            records = plan.records.len(),
            fractions = plan.fractions.len(),
            sets = plan.sets.len(),
            branches = branches.threads(),
            searches = searches.threads(),
            "plan ready"
        );

        phase(sink, &start, "Transcripts", "building sample databases");
        let combined = TranscriptDatabaseBuilder::new(
            &self.runner,
            &self.workdir,
            &inputs.genome,
            &self.config.digest,
            self.config.pi_server,
        )
        .build(&branches, &plan.samples)?;

        phase(sink, &start, "Fractions", "splitting by pI");
        let fraction_dbs = FractionSplitter::new(&self.runner, &self.workdir, self.config.binning)
            .split(
                &combined.annotated,
                &inputs.pi_reference,
                &plan.fractions,
                &cancel,
            )?;

        phase(sink, &start, "Canonical", "merging canonical proteome and decoys");
        let merger = CanonicalMerger::new(&self.runner, &self.workdir, &self.config.digest);
        let canonical = merger.digest_canonical(&inputs.canonical_proteome, &cancel)?;
        let databases = merger.build_all(&branches, &canonical, fraction_dbs)?;

        phase(sink, &start, "Join", "matching spectra to fraction databases");
        let search_units =
            CorrespondenceJoiner::new(self.config.unmatched_fractions).join(&databases, &plan.records)?;

        phase(sink, &start, "Search", &format!("{} search units", search_units.len()));
        let identifications = SearchDispatcher::new(
            &self.runner,
            &self.workdir,
            modifications,
            self.config.search_threads,
        )
        .dispatch_all(&searches, search_units.clone())?;

        phase(sink, &start, "Validate", "validating per set");
        let set_groups = SetAggregator::new(&self.runner, &self.workdir).aggregate(
            &branches,
            &plan.records,
            identifications.clone(),
        )?;

        let summary = RunSummary {
            tool: format!("kira-pg/{}", env!("CARGO_PKG_VERSION")),
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            workdir: self.workdir.root().to_string(),
            samples: plan.samples,
            combined,
            databases,
            search_units,
            identifications,
            set_groups,
        };
        self.workdir.write_manifest(&summary)?;
        phase(sink, &start, "Done", &format!("manifest at {}", self.workdir.manifest_path()));
        Ok(summary)
    }
}

fn phase(sink: &dyn ProgressSink, start: &Instant, name: &str, message: &str) {
    sink.event(ProgressEvent {
        message: format!("phase={name}; {message}"),
        elapsed: Some(start.elapsed()),
    });
}
