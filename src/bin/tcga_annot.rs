use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use tcga_annotation_manager::app::{App, ProgressSink, RunOptions};
use tcga_annotation_manager::config::{
    ConfigLoader, ProjectRequest, default_filetypes, read_env_token,
};
use tcga_annotation_manager::domain::{AnnotationCategory, Filetype, ProjectId};
use tcga_annotation_manager::error::TcgaError;
use tcga_annotation_manager::fetch::GdcDataClient;
use tcga_annotation_manager::gdc::GdcMetadataClient;
use tcga_annotation_manager::output::{JsonOutput, StderrSink};
use tcga_annotation_manager::store::OutputStore;

#[derive(Parser)]
#[command(name = "tcga-annot")]
#[command(about = "Analysis-ready annotation tables and patient grouping for TCGA/GDC datasets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download dataset files and build annotation tables")]
    Download(DownloadArgs),
    #[command(about = "List projects available at the GDC for a program")]
    Projects(ProjectsArgs),
}

#[derive(Args, Clone)]
struct DownloadArgs {
    #[arg(long = "dataset", num_args = 1..)]
    datasets: Vec<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long = "filetypes", num_args = 1..)]
    filetypes: Vec<String>,

    #[arg(long = "annotations", num_args = 0..)]
    annotations: Vec<String>,

    #[arg(long, default_value = ".")]
    out: String,

    #[arg(long)]
    raw: bool,

    #[arg(long)]
    tar: bool,

    #[arg(long)]
    statistics: bool,

    #[arg(long)]
    no_manifest: bool,

    #[arg(long)]
    no_related_files: bool,
}

#[derive(Args)]
struct ProjectsArgs {
    #[arg(long, default_value = "TCGA")]
    program: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(tcga) = report.downcast_ref::<TcgaError>() {
            return ExitCode::from(map_exit_code(tcga));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TcgaError) -> u8 {
    match error {
        TcgaError::MissingConfig
        | TcgaError::ConfigRead(_)
        | TcgaError::ConfigParse(_)
        | TcgaError::InvalidProjectId(_)
        | TcgaError::InvalidCategory(_)
        | TcgaError::InvalidFiletype(_) => 2,
        TcgaError::GdcHttp(_)
        | TcgaError::GdcStatus { .. }
        | TcgaError::SourceUnavailable { .. }
        | TcgaError::FetchFailure { .. } => 3,
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
    let sink: Box<dyn ProgressSink> = if cli.verbose {
        Box::new(StderrSink)
    } else {
        Box::new(JsonOutput)
    };

    match cli.command {
        Commands::Download(args) => run_download(args, sink.as_ref()),
        Commands::Projects(args) => run_projects(args),
    }
}

fn run_download(args: DownloadArgs, sink: &dyn ProgressSink) -> miette::Result<()> {
    let requests = resolve_requests(&args)?;
    let options = RunOptions {
        raw: args.raw,
        tar_archives: args.tar,
        related_files: !args.no_related_files,
        manifest: !args.no_manifest,
        statistics: args.statistics,
    };

    let token = read_env_token();
    let source = GdcMetadataClient::new(token.as_deref()).into_diagnostic()?;
    let fetcher = GdcDataClient::new(token.as_deref()).into_diagnostic()?;
    let store = OutputStore::new(args.out.as_str());
    let app = App::new(store, source, fetcher);

    let summary = app.run(&requests, &options, sink).into_diagnostic()?;
    JsonOutput::print_run(&summary).into_diagnostic()?;
    Ok(())
}

fn run_projects(args: ProjectsArgs) -> miette::Result<()> {
    let token = read_env_token();
    let source = GdcMetadataClient::new(token.as_deref()).into_diagnostic()?;
    let fetcher = GdcDataClient::new(token.as_deref()).into_diagnostic()?;
    let app = App::new(OutputStore::new("."), source, fetcher);

    let listing = app.list_projects(&args.program).into_diagnostic()?;
    JsonOutput::print_projects(&listing).into_diagnostic()?;
    Ok(())
}

/// Datasets come either from the command line or from tcga-annot.json; the
/// command line wins when both are present.
fn resolve_requests(args: &DownloadArgs) -> miette::Result<Vec<ProjectRequest>> {
    if args.datasets.is_empty() {
        let resolved = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
        return Ok(resolved.projects);
    }

    let filetypes = if args.filetypes.is_empty() {
        default_filetypes()
    } else {
        args.filetypes
            .iter()
            .map(|value| value.parse::<Filetype>())
            .collect::<Result<Vec<_>, _>>()
            .into_diagnostic()?
    };
    let annotations =
        AnnotationCategory::parse_selection(&args.annotations).into_diagnostic()?;

    args.datasets
        .iter()
        .map(|value| {
            Ok(ProjectRequest {
                project: value.parse::<ProjectId>().into_diagnostic()?,
                filetypes: filetypes.clone(),
                annotations: annotations.clone(),
            })
        })
        .collect()
}
