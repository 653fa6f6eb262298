//! Imagekeeper CLI
//!
//! Commands: write-artifacts, generate-config
//! Artifacts land in the output directory; the CI config goes to stdout.
//! Returns non-zero on any configuration or network error.

use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use imagekeeper_core::{
    artifacts::ArtifactWriter,
    emit,
    error::Result,
    plan::{self, PlanCompiler},
    propagate::{self, ManualOverride, Triggers},
    remote::HttpClient,
    spec::KeeperSpec,
};

#[derive(Parser)]
#[command(name = "imagekeeper-cli", version)]
#[command(about = "Imagekeeper - declarative build-matrix keeper")]
struct Cli {
    /// Path to the image specification
    #[arg(short, long, default_value = "images.yml")]
    spec: PathBuf,

    /// Directory receiving the generated artifacts
    #[arg(short, long, default_value = "generated")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the build plan and write all artifacts
    WriteArtifacts {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Manual propagation override, TARGET=MODE[:KEYWORDS]; repeatable.
        /// Any override switches the run into manual-only propagation.
        #[arg(long = "propagate", value_name = "TARGET=MODE[:KEYWORDS]")]
        overrides: Vec<String>,
    },

    /// Print the GitLab CI YAML for the chosen build items
    GenerateConfig {
        /// In-repository directory holding the deploy shell helpers
        #[arg(long, default_value = "imagekeeper")]
        keeper_subtree: String,
    },
}

#[derive(Args)]
#[group(multiple = false)]
struct SelectionArgs {
    /// Rebuild only images with unpublished tags (default)
    #[arg(long)]
    minimal: bool,

    /// Same as --minimal, plus nightly-build images
    #[arg(long)]
    nightly: bool,

    /// Rebuild all images
    #[arg(long)]
    rebuild_all: bool,

    /// Rebuild images whose Dockerfile is listed in FILE
    #[arg(long, value_name = "FILE")]
    rebuild_files: Option<PathBuf>,

    /// Rebuild images with a tag listed in FILE
    #[arg(long, value_name = "FILE")]
    rebuild_tags: Option<PathBuf>,

    /// Rebuild images with a keyword listed in FILE
    #[arg(long, value_name = "FILE")]
    rebuild_keywords: Option<PathBuf>,

    /// Rebuild images carrying the given keyword
    #[arg(long, value_name = "KEYWORD")]
    rebuild_keyword: Option<String>,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn write_artifacts(cli: &Cli, selection: &SelectionArgs, raw_overrides: &[String]) -> Result<()> {
    let spec = KeeperSpec::load(&cli.spec)?;
    let strategies = spec.propagate.compile()?;

    let http = HttpClient::new()?;
    let compiler = PlanCompiler::new(&http, plan::utc_build_date());
    let build_data_all = compiler.compile(&spec)?;
    let all_tags = plan::check_tags(&build_data_all)?;
    tracing::info!("no duplicate tag found");

    let remote_tags = http.remote_tags(&spec.docker_repo)?;
    let build_data_min = plan::minimal_rebuild(&build_data_all, &remote_tags);
    let remote_tags_to_rm = plan::tags_to_remove(&all_tags, &remote_tags);

    let mut triggers = Triggers::default();
    let chosen = if selection.nightly {
        triggers.nightly = true;
        plan::merge_items(&build_data_min, &plan::nightly_only(&build_data_all))
    } else if selection.rebuild_all {
        triggers.rebuild_all = true;
        build_data_all.clone()
    } else if let Some(file) = &selection.rebuild_files {
        plan::merge_items(&build_data_min, &plan::by_files(&build_data_all, &read_lines(file)?))
    } else if let Some(file) = &selection.rebuild_tags {
        plan::merge_items(&build_data_min, &plan::by_tags(&build_data_all, &read_lines(file)?))
    } else if let Some(file) = &selection.rebuild_keywords {
        plan::merge_items(
            &build_data_min,
            &plan::by_keywords(&build_data_all, &read_lines(file)?),
        )
    } else if let Some(keyword) = &selection.rebuild_keyword {
        plan::merge_items(&build_data_min, &plan::by_keyword(&build_data_all, keyword))
    } else {
        build_data_min.clone()
    };

    let mut overrides: BTreeMap<String, ManualOverride> = BTreeMap::new();
    for raw in raw_overrides {
        let (target, value) = ManualOverride::parse_arg(raw)?;
        overrides.insert(target, value);
    }
    let resolved = propagate::resolve(&strategies, &build_data_all, triggers, &overrides)?;

    let writer = ArtifactWriter::new(&cli.output_dir);
    writer.write_build_data_chosen(&chosen)?;
    writer.write_build_data_all(&build_data_all)?;
    writer.write_build_data_min(&build_data_min)?;
    writer.write_remote_tags(&remote_tags)?;
    writer.write_remote_tags_to_rm(&remote_tags_to_rm)?;
    writer.write_dockerfiles(&build_data_all)?;
    writer.write_readme(&spec.base_url, &build_data_all)?;
    writer.write_docker_repo(&spec.docker_repo)?;
    writer.write_propagate(&resolved)?;
    Ok(())
}

fn generate_config(cli: &Cli, keeper_subtree: &str) -> Result<()> {
    let spec = KeeperSpec::load(&cli.spec)?;
    let writer = ArtifactWriter::new(&cli.output_dir);
    let chosen = writer.read_build_data_chosen()?;
    print!("{}", emit::generate_config(&spec.docker_repo, &chosen, keeper_subtree));
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::WriteArtifacts {
            selection,
            overrides,
        } => write_artifacts(cli, selection, overrides),
        Commands::GenerateConfig { keeper_subtree } => generate_config(cli, keeper_subtree),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
