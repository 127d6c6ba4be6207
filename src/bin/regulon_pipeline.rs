use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use regulon_pipeline::cluster::QuantileClusterBackend;
use regulon_pipeline::config::ConfigLoader;
use regulon_pipeline::domain::{AnalysisContext, CellTypeTag, PruningMode};
use regulon_pipeline::error::PipelineError;
use regulon_pipeline::invoker::SystemToolInvoker;
use regulon_pipeline::logging;
use regulon_pipeline::paths::AnalysisPaths;
use regulon_pipeline::pipeline::Orchestrator;

const LOG_FILE: &str = "analysis.log";

#[derive(Parser)]
#[command(name = "regulon-pipeline")]
#[command(about = "Single-cell GRN inference pipeline driver")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the full pipeline from the raw matrix")]
    Run(RunArgs),
    #[command(about = "Re-enter at export using the persisted clustered matrix")]
    Grn(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    base_folder: String,
    dataset_id: String,
    sample_id: String,

    #[arg(long, help = "Cell-type subset: Tumor, Non-Tumor, or None")]
    cell_type: Option<String>,

    #[arg(long, help = "Regulon pruning: true, false, or None (tool default)")]
    prune: Option<String>,

    #[arg(long, help = "Optional JSON run configuration")]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PipelineError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::InvalidContext(_)
        | PipelineError::InvalidArgument(_)
        | PipelineError::ConfigRead(_)
        | PipelineError::ConfigParse(_) => 2,
        PipelineError::ExternalTool { .. } | PipelineError::MissingOutput { .. } => 3,
        PipelineError::UnmetDependency { .. } => 4,
        _ => 1,
    }
}

// `PipelineError` is itself a `Diagnostic`; `?` must convert it via `From`
// so `main` can still downcast the report for exit-code mapping.
fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(Utf8PathBuf::from(LOG_FILE).as_path())?;

    let (args, from_export) = match cli.command {
        Command::Run(args) => (args, false),
        Command::Grn(args) => (args, true),
    };

    // All argument validation happens before any stage runs.
    let cell_type = CellTypeTag::parse_optional(args.cell_type.as_deref())?;
    let pruning = PruningMode::parse_optional(args.prune.as_deref())?;
    let context = AnalysisContext::new(
        args.base_folder.as_str(),
        &args.dataset_id,
        &args.sample_id,
        cell_type,
        pruning,
    )?;
    let config = ConfigLoader::resolve(args.config.as_deref())?;

    let paths = AnalysisPaths::resolve(&context, &config)?;
    let invoker = SystemToolInvoker;
    let backend = QuantileClusterBackend;
    let mut orchestrator = Orchestrator::new(&context, &config, &paths, &invoker, &backend);

    let run = if from_export {
        orchestrator.run_from_export()
    } else {
        orchestrator.run_full()
    };
    run.into_result()?;
    Ok(())
}
