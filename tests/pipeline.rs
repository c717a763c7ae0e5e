use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use kira_proteogenomics::config::ResolvedConfig;
use kira_proteogenomics::correspondence::CorrespondenceJoiner;
use kira_proteogenomics::domain::{FractionKey, KeyMiss, TargetDecoyDatabase};
use kira_proteogenomics::error::KiraError;
use kira_proteogenomics::fasta::read_fasta;
use kira_proteogenomics::ingest::RecordIngestor;
use kira_proteogenomics::pipeline::{Pipeline, PipelineInputs, ProgressEvent, ProgressSink};
use kira_proteogenomics::tasks::CancelToken;
use kira_proteogenomics::tools::{Tool, ToolInvocation, ToolRunner, check_outputs};
use kira_proteogenomics::workdir::WorkDir;

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Stands in for every external tool by writing the conventional outputs.
#[derive(Default)]
struct MockRunner {
    calls: Mutex<Vec<(Tool, String)>>,
    validation_inputs: Mutex<BTreeMap<String, Vec<String>>>,
    empty_fractions: HashSet<String>,
    extra_fraction: Option<String>,
    fail_on: Option<Tool>,
}

impl MockRunner {
    fn calls(&self) -> Vec<(Tool, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, tool: Tool) -> usize {
        self.calls().iter().filter(|(called, _)| *called == tool).count()
    }
}

fn write(path: &str, content: &str) {
    let path = Utf8Path::new(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path()).unwrap();
    }
    fs::write(path.as_std_path(), content).unwrap();
}

impl ToolRunner for MockRunner {
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), KiraError> {
        cancel.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((invocation.tool, invocation.label.clone()));
        if self.fail_on == Some(invocation.tool) {
            return Err(KiraError::ExternalTool {
                tool: invocation.tool.to_string(),
                status: "1".to_string(),
                log: invocation.log.to_string(),
            });
        }

        let bound = |name: &str| invocation.binding(name).unwrap().to_string();
        match invocation.tool {
            Tool::ExtractNucleotides => write(&bound("output"), ">tx1\nATGAAA\n"),
            Tool::Translate => write(
                &bound("output"),
                &format!(
                    ">shared frame=1\nMPEPTIDEK\n>{0}_only frame=2\nAAK*RRK\n",
                    invocation.label
                ),
            ),
            Tool::Digest => write(&bound("output"), ">pep1\nPEPTIDEK\n"),
            Tool::PredictPi => write(&bound("output"), "PEPTIDEK\t4.05\n"),
            Tool::SearchTable => write(&bound("output"), "SpecID\tPeptide\n"),
            Tool::SplitFractions => {
                let listing = fs::read_to_string(bound("fractions_list")).unwrap();
                let outdir = bound("outdir");
                let prefix = bound("prefix");
                let mut keys = listing.lines().map(str::to_string).collect::<Vec<_>>();
                keys.extend(self.extra_fraction.clone());
                for key in keys {
                    if !self.empty_fractions.contains(&key) {
                        write(&format!("{outdir}/{prefix}{key}.fa"), ">pep\nPEPK\n");
                    }
                }
            }
            Tool::TargetDecoy => write(&bound("output"), "target+canonical+decoy\n"),
            Tool::DecoyOnly => write(&bound("output"), "canonical+decoy\n"),
            Tool::Search => write(&bound("output"), "<MzIdentML/>\n"),
            Tool::Validate => {
                let listing = fs::read_to_string(bound("inputs_list")).unwrap();
                self.validation_inputs
                    .lock()
                    .unwrap()
                    .insert(bound("set"), listing.lines().map(str::to_string).collect());
                write(&bound("output"), "<percolator_output/>\n");
            }
            Tool::PiServer => {}
        }
        check_outputs(invocation)
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    inputs: PipelineInputs,
}

fn fixture(samples: &[&str], definition: &str) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let spectra_definition = root.join("spectra.txt");
    fs::write(spectra_definition.as_std_path(), definition).unwrap();
    let inputs = PipelineInputs {
        transcripts: samples
            .iter()
            .map(|sample| root.join(format!("models/{sample}.gtf")))
            .collect(),
        spectra_definition,
        canonical_proteome: root.join("canonical.fa"),
        genome: root.join("genome.fa"),
        pi_reference: root.join("reference_peptides.tsv"),
    };
    Fixture {
        _temp: temp,
        root,
        inputs,
    }
}

fn config() -> ResolvedConfig {
    ResolvedConfig {
        modifications: Some(Utf8PathBuf::from("mods.txt")),
        max_parallel: 2,
        search_threads: 1,
        ..ResolvedConfig::default()
    }
}

fn pipeline(runner: MockRunner, fixture: &Fixture, config: ResolvedConfig) -> Pipeline<MockRunner> {
    Pipeline::new(runner, WorkDir::new(fixture.root.join("work")), config)
}

#[test]
fn two_samples_one_fraction_one_set() {
    let fixture = fixture(&["tumourA", "tumourB"], "/raw/s1.mzML\t1\t01\n");
    let runner = MockRunner::default();
    let pipeline = pipeline(runner, &fixture, config());

    let summary = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    assert_eq!(summary.samples.len(), 2);
    assert_eq!(summary.search_units.len(), 1);
    assert_eq!(summary.identifications.len(), 1);
    assert_eq!(summary.set_groups.len(), 1);
    let group = &summary.set_groups[0];
    assert_eq!(group.set.as_str(), "1");
    assert_eq!(group.members.len(), 1);
    assert!(group.validation.validated.ends_with("Set1.perco.xml"));
    assert!(group.members[0].ident.ends_with("s1.mzid"));
    assert!(group.members[0].table.ends_with("s1.tsv"));
    assert!(pipeline.workdir().manifest_path().exists());

    // the shared protein appears once, each sample's own record is split
    let merged = read_fasta(&summary.combined.proteins).unwrap();
    let ids = merged.iter().map(|record| record.id()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["shared", "tumourA_only", "tumourB_only"]);
    let split = read_fasta(&summary.combined.stop_split).unwrap();
    assert_eq!(split.len(), 5);
}

#[test]
fn every_fraction_gets_exactly_one_database() {
    let definition = "a1.mzML A 01\na2.mzML A 02\nb1.mzML B 01\nb3.mzML B 03\n";
    let fixture = fixture(&["s"], definition);
    let pipeline = pipeline(MockRunner::default(), &fixture, config());

    let summary = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    let fractions = summary
        .databases
        .iter()
        .map(|database| database.fraction.as_str())
        .collect::<Vec<_>>();
    assert_eq!(fractions, vec!["01", "02", "03"]);

    let triples = summary
        .search_units
        .iter()
        .map(|unit| (unit.fraction.as_str(), unit.set.as_str(), unit.sample.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        triples,
        vec![("01", "A", "a1"), ("02", "A", "a2"), ("01", "B", "b1"), ("03", "B", "b3")]
    );
    for unit in &summary.search_units {
        let expected = format!("db_{}.td.fa", unit.fraction);
        assert!(unit.database.ends_with(&expected));
    }
}

#[test]
fn empty_fraction_is_searched_against_canonical_only_database() {
    let runner = MockRunner {
        empty_fractions: HashSet::from(["02".to_string()]),
        ..MockRunner::default()
    };
    let fixture = fixture(&["s"], "x1.mzML A 01\nx2.mzML A 02\n");
    let pipeline = pipeline(runner, &fixture, config());

    let summary = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();
    assert_eq!(pipeline.runner().count(Tool::DecoyOnly), 1);
    assert_eq!(pipeline.runner().count(Tool::TargetDecoy), 1);

    let empty = summary
        .databases
        .iter()
        .find(|database| database.fraction.as_str() == "02")
        .unwrap();
    assert!(empty.canonical_only);
    let empty_candidate = pipeline.workdir().fraction_db(&empty.fraction);
    assert_eq!(fs::metadata(empty_candidate.as_std_path()).unwrap().len(), 0);

    let unit = summary
        .search_units
        .iter()
        .find(|unit| unit.fraction.as_str() == "02")
        .unwrap();
    assert_eq!(unit.database, empty.path);
}

#[test]
fn set_members_follow_declaration_order() {
    let definition = "s1.mzML A 01\nother.mzML B 01\ns2.mzML A 02\ns3.mzML A 03\n";
    let fixture = fixture(&["t"], definition);
    let runner = MockRunner::default();
    let pipeline = pipeline(runner, &fixture, ResolvedConfig {
        max_parallel: 4,
        ..config()
    });

    let summary = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    let set_a = summary
        .set_groups
        .iter()
        .find(|group| group.set.as_str() == "A")
        .unwrap();
    let samples = set_a
        .samples()
        .into_iter()
        .map(|sample| sample.as_str())
        .collect::<Vec<_>>();
    assert_eq!(samples, vec!["s1", "s2", "s3"]);

    let recorded = pipeline.runner().validation_inputs.lock().unwrap();
    let listed = &recorded["A"];
    assert_eq!(listed.len(), 3);
    assert!(listed[1].ends_with("s2.mzid"));
    assert!(listed[0].ends_with("s1.mzid"));
    assert!(listed[2].ends_with("s3.mzid"));
}

#[test]
fn search_failure_aborts_before_validation() {
    let runner = MockRunner {
        fail_on: Some(Tool::Search),
        ..MockRunner::default()
    };
    let fixture = fixture(&["s"], "x1.mzML A 01\nx2.mzML A 02\n");
    let pipeline = pipeline(runner, &fixture, config());

    let err = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap_err();
    assert_matches!(err, KiraError::ExternalTool { tool, .. } if tool == "search");
    assert!(!pipeline.workdir().manifest_path().exists());
    assert_eq!(pipeline.runner().count(Tool::Validate), 0);
}

#[test]
fn splitter_output_for_unknown_fraction_is_rejected() {
    let runner = MockRunner {
        extra_fraction: Some("99".to_string()),
        ..MockRunner::default()
    };
    let fixture = fixture(&["s"], "x1.mzML A 01\n");
    let pipeline = pipeline(runner, &fixture, config());

    let err = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap_err();
    assert_matches!(err, KiraError::Correspondence(msg) if msg.contains("99"));
}

#[test]
fn malformed_definition_fails_before_any_tool() {
    let fixture = fixture(&["s"], "x1.mzML A 01\nbroken.mzML A\n");
    let runner = MockRunner::default();
    let pipeline = pipeline(runner, &fixture, config());

    let err = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap_err();
    assert_matches!(err, KiraError::MalformedInput(_));
    assert!(pipeline.runner().calls().is_empty());
}

#[test]
fn duplicate_transcript_sample_is_malformed() {
    let fixture = fixture(&["s"], "x1.mzML A 01\n");
    let mut inputs = fixture.inputs.clone();
    inputs.transcripts = vec![
        Utf8PathBuf::from("/a/tumour.gtf"),
        Utf8PathBuf::from("/b/tumour.v2.gtf"),
    ];
    let pipeline = pipeline(MockRunner::default(), &fixture, config());

    let err = pipeline.plan(&inputs).unwrap_err();
    assert_matches!(err, KiraError::MalformedInput(msg) if msg.contains("tumour"));
}

#[test]
fn missing_modifications_is_invalid_config() {
    let fixture = fixture(&["s"], "x1.mzML A 01\n");
    let pipeline = pipeline(MockRunner::default(), &fixture, ResolvedConfig {
        modifications: None,
        ..config()
    });
    let err = pipeline
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn cancelled_run_invokes_nothing() {
    let fixture = fixture(&["s"], "x1.mzML A 01\n");
    let cancel = CancelToken::new();
    cancel.cancel();
    let pipeline = pipeline(MockRunner::default(), &fixture, config());
    let err = pipeline.run(&fixture.inputs, &NoopSink, cancel).unwrap_err();
    assert_matches!(err, KiraError::Cancelled);
    assert!(pipeline.runner().calls().is_empty());
}

#[test]
fn unmatched_policy_decides_records_without_database() {
    let databases = vec![TargetDecoyDatabase {
        fraction: "01".parse().unwrap(),
        path: Utf8PathBuf::from("target_decoy/db_01.td.fa"),
        canonical_only: false,
    }];
    let records = RecordIngestor::new(".mzML")
        .spectra_records("a1.mzML A 01\na9.mzML A 09\nb1.mzML B 01\n")
        .unwrap();

    let err = CorrespondenceJoiner::new(KeyMiss::Reject)
        .join(&databases, &records)
        .unwrap_err();
    assert_matches!(err, KiraError::Correspondence(msg) if msg.contains("09"));

    let units = CorrespondenceJoiner::new(KeyMiss::Drop)
        .join(&databases, &records)
        .unwrap();
    let samples = units
        .iter()
        .map(|unit| unit.sample.as_str())
        .collect::<Vec<_>>();
    assert_eq!(samples, vec!["a1", "b1"]);
}

#[test]
fn rerun_in_same_workdir_ignores_previous_candidates() {
    let fixture = fixture(&["s"], "x1.mzML A 01\nx2.mzML A 02\n");
    let first = pipeline(MockRunner::default(), &fixture, config());
    let summary = first
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();
    assert!(summary.databases.iter().all(|database| !database.canonical_only));

    let runner = MockRunner {
        empty_fractions: HashSet::from(["02".to_string()]),
        ..MockRunner::default()
    };
    let second = pipeline(runner, &fixture, config());
    let summary = second
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    let rebuilt = summary
        .databases
        .iter()
        .find(|database| database.fraction.as_str() == "02")
        .unwrap();
    assert!(rebuilt.canonical_only);
    assert_eq!(second.runner().count(Tool::DecoyOnly), 1);
    let candidate = second.workdir().fraction_db(&rebuilt.fraction);
    assert_eq!(fs::metadata(candidate.as_std_path()).unwrap().len(), 0);
}

#[test]
fn rerun_with_fewer_fractions_succeeds() {
    let fixture = fixture(&["s"], "x1.mzML A 01\nx2.mzML A 02\n");
    pipeline(MockRunner::default(), &fixture, config())
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    fs::write(fixture.inputs.spectra_definition.as_std_path(), "x1.mzML A 01\n").unwrap();
    let second = pipeline(MockRunner::default(), &fixture, config());
    let summary = second
        .run(&fixture.inputs, &NoopSink, CancelToken::new())
        .unwrap();

    assert_eq!(summary.databases.len(), 1);
    assert_eq!(summary.search_units.len(), 1);
    let dropped: FractionKey = "02".parse().unwrap();
    assert!(!second.workdir().fraction_db(&dropped).exists());
}
