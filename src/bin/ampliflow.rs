use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ampliflow::config::ConfigLoader;
use ampliflow::error::AmpliflowError;
use ampliflow::output::{CheckResult, JsonOutput, OutputMode, print_run_summary};
use ampliflow::pipeline::Pipeline;
use ampliflow::sample_set::{DiscoveryRule, SampleSet};
use ampliflow::workspace::Workspace;

#[derive(Parser)]
#[command(name = "ampliflow")]
#[command(about = "Staged amplicon-processing pipeline with read tracking and checkpoints")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline over a directory of FASTQ files")]
    Run(RunArgs),
    #[command(about = "Validate the configuration and preview sample discovery")]
    Check(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(long)]
    input_dir: String,

    #[arg(long, default_value = "ampliflow-out")]
    out_dir: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "_R1.fastq.gz")]
    forward_suffix: String,

    /// Omit for single-end data.
    #[arg(long)]
    reverse_suffix: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<AmpliflowError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AmpliflowError) -> u8 {
    match error {
        AmpliflowError::NoInputsFound(_)
        | AmpliflowError::AsymmetricPairing(_)
        | AmpliflowError::MissingConfig
        | AmpliflowError::ConfigRead(_)
        | AmpliflowError::ConfigParse(_) => 2,
        AmpliflowError::InvalidParameter(_) => 2,
        AmpliflowError::SystemicFailure { .. } => 3,
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
        Commands::Check(args) => run_check(args, output_mode),
    }
}

fn rule_from(args: &RunArgs) -> DiscoveryRule {
    match &args.reverse_suffix {
        Some(reverse) => DiscoveryRule::paired(&args.forward_suffix, reverse),
        None => DiscoveryRule::single(&args.forward_suffix),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    let rule = rule_from(&args);
    let workspace = Workspace::new(Utf8PathBuf::from(&args.out_dir));

    let pipeline =
        Pipeline::new(config, workspace, rule.is_paired()).into_diagnostic()?;
    let samples =
        SampleSet::discover(&Utf8PathBuf::from(&args.input_dir), &rule).into_diagnostic()?;

    let report = pipeline.run(&samples).into_diagnostic()?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic(),
        OutputMode::Interactive => {
            print_run_summary(&report);
            Ok(())
        }
    }
}

fn run_check(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    let rule = rule_from(&args);
    let workspace = Workspace::new(Utf8PathBuf::from(&args.out_dir));

    let pipeline =
        Pipeline::new(config, workspace, rule.is_paired()).into_diagnostic()?;
    let samples =
        SampleSet::discover(&Utf8PathBuf::from(&args.input_dir), &rule).into_diagnostic()?;

    let check = CheckResult::new(
        &samples,
        pipeline
            .stage_names()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_check(&check).into_diagnostic(),
        OutputMode::Interactive => {
            println!(
                "ampliflow: {} samples discovered, stages: {}",
                check.samples.len(),
                check.stages.join(" -> ")
            );
            for sample in &check.samples {
                println!("  {} ({} files)", sample.sample, sample.inputs.len());
            }
            Ok(())
        }
    }
}
