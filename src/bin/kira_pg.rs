use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_proteogenomics::config::{ConfigLoader, ConfigOverrides};
use kira_proteogenomics::domain::KeyMiss;
use kira_proteogenomics::error::KiraError;
use kira_proteogenomics::output::{JsonOutput, OutputMode, TracingSink};
use kira_proteogenomics::pipeline::{Pipeline, PipelineInputs, RunPlan, RunSummary};
use kira_proteogenomics::tasks::CancelToken;
use kira_proteogenomics::tools::SystemToolRunner;
use kira_proteogenomics::workdir::WorkDir;

#[derive(Parser)]
#[command(name = "kira-pg")]
#[command(about = "Proteogenomics search orchestrator (sample databases, pI fractions, per-set validation)")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full pipeline")]
    Run(RunArgs),
    #[command(about = "Show configured external tools and where they resolve")]
    Tools(ToolsArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, num_args = 1.., required = true)]
    transcripts: Vec<String>,

    #[arg(long)]
    spectra_def: String,

    #[arg(long)]
    canonical: String,

    #[arg(long)]
    genome: String,

    #[arg(long)]
    pi_reference: String,

    #[arg(long)]
    mods: Option<String>,

    #[arg(long, default_value = "kira-pg-work")]
    workdir: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    missed_cleavages: Option<u32>,

    #[arg(long)]
    enzyme: Option<String>,

    #[arg(long)]
    intercept: Option<f64>,

    #[arg(long)]
    width: Option<f64>,

    #[arg(long)]
    tolerance: Option<f64>,

    #[arg(long)]
    amount: Option<u32>,

    #[arg(long)]
    max_parallel: Option<usize>,

    #[arg(long)]
    search_threads: Option<usize>,

    #[arg(long)]
    unmatched_fractions: Option<KeyMiss>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ToolsArgs {
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MalformedInput(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_) => 2,
        KiraError::ExternalTool { .. }
        | KiraError::MissingOutput { .. }
        | KiraError::MissingTool(_) => 3,
        KiraError::Correspondence(_) | KiraError::MissingGroup(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Tools(args) => run_tools(args, output_mode),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        missed_cleavages: args.missed_cleavages,
        enzyme: args.enzyme,
        modifications: args.mods,
        intercept: args.intercept,
        width: args.width,
        tolerance: args.tolerance,
        amount: args.amount,
        max_parallel: args.max_parallel,
        search_threads: args.search_threads,
        unmatched_fractions: args.unmatched_fractions,
    };
    let config = ConfigLoader::resolve(args.config.as_deref())
        .and_then(|config| config.apply(overrides))?;

    let inputs = PipelineInputs {
        transcripts: args.transcripts.into_iter().map(Utf8PathBuf::from).collect(),
        spectra_definition: Utf8PathBuf::from(args.spectra_def),
        canonical_proteome: Utf8PathBuf::from(args.canonical),
        genome: Utf8PathBuf::from(args.genome),
        pi_reference: Utf8PathBuf::from(args.pi_reference),
    };
    let runner = SystemToolRunner::new(config.tools.clone());
    let pipeline = Pipeline::new(runner, WorkDir::new(Utf8PathBuf::from(args.workdir)), config);

    if args.dry_run {
        let plan = pipeline.plan(&inputs)?;
        return match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_plan(&plan).into_diagnostic(),
            OutputMode::Interactive => {
                print_plan(&plan);
                Ok(())
            }
        };
    }

    match output_mode {
        OutputMode::NonInteractive => {
            let summary = pipeline
                .run(&inputs, &TracingSink, CancelToken::new())?;
            JsonOutput::print_summary(&summary).into_diagnostic()
        }
        OutputMode::Interactive => {
            let summary = pipeline
                .run(&inputs, &TracingSink, CancelToken::new())?;
            print_run_summary(&summary);
            Ok(())
        }
    }
}

fn run_tools(args: ToolsArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let report = SystemToolRunner::new(config.tools).tool_report();
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_tools(&report).into_diagnostic(),
        OutputMode::Interactive => {
            let green = "\x1b[32m";
            let red = "\x1b[31m";
            let reset = "\x1b[0m";
            for status in &report {
                match &status.resolved {
                    Some(path) => println!("{green}ok      {:<16} {path}{reset}", status.tool),
                    None => println!("{red}missing {:<16} {}{reset}", status.tool, status.program),
                }
            }
            Ok(())
        }
    }
}

fn print_plan(plan: &RunPlan) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    println!("{cyan}KIRA-PG plan{reset}");
    println!("samples:   {}", plan.samples.len());
    for sample in &plan.samples {
        println!("  {} ({})", sample.id, sample.transcript_model);
    }
    let fractions = plan
        .fractions
        .iter()
        .map(|fraction| fraction.as_str())
        .collect::<Vec<_>>();
    println!("fractions: {}", fractions.join(", "));
    for set in &plan.sets {
        let members = plan
            .records
            .iter()
            .filter(|record| &record.set == set)
            .map(|record| format!("{}@{}", record.sample, record.fraction))
            .collect::<Vec<_>>();
        println!("set {set}: {}", members.join(" "));
    }
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}KIRA-PG summary{reset}");
    println!("{green}samples merged: {}{reset}", summary.samples.len());
    for database in &summary.databases {
        let color = if database.canonical_only { yellow } else { green };
        let note = if database.canonical_only {
            " (canonical only)"
        } else {
            ""
        };
        println!("{color}  fraction {}: {}{note}{reset}", database.fraction, database.path);
    }
    println!("{green}searches: {}{reset}", summary.identifications.len());
    for group in &summary.set_groups {
        println!(
            "{green}  set {}: {} samples -> {}{reset}",
            group.set,
            group.members.len(),
            group.validation.validated
        );
    }
    println!("{cyan}workdir: {}{reset}", summary.workdir);
}
