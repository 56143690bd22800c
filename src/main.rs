//! Trellis CLI - composable pipeline builder

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use trellis::{
    build_from_request, check_node_dependencies, parse_request, save_workflow, BuildOptions,
    DependencyReport, FixSuggestion, SnakemakeRunner, SourceFetcher, TrellisError,
};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Trellis - wires workflow modules into a single Snakemake workflow")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a workflow from a JSON request file
    Build {
        /// Path to the build request (JSON list of {name, type, config})
        request: PathBuf,

        /// Print the generated artifacts instead of writing a build tree
        #[arg(long)]
        singlefile: bool,

        /// Build directory
        #[arg(long, default_value = "build")]
        build_path: PathBuf,

        /// Keep the graph nested (skip module expansion)
        #[arg(long)]
        no_expand: bool,

        /// Drop connectors whose nodes are missing instead of failing
        #[arg(long)]
        partial: bool,

        /// Copy module sources into the build tree
        #[arg(long)]
        package: bool,

        /// YAML file with notification settings
        #[arg(long)]
        alerts: Option<PathBuf>,
    },

    /// Validate a build request (parse and schema-check only)
    Validate {
        /// Path to the build request
        request: PathBuf,
    },

    /// Check a node's declared inputs against the composed graph
    Check {
        /// Path to the build request; the first entry is the target node
        request: PathBuf,

        /// Dry-run executable
        #[arg(long, default_value = "snakemake")]
        runner: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            request,
            singlefile,
            build_path,
            no_expand,
            partial,
            package,
            alerts,
        } => {
            build(
                &request, singlefile, build_path, no_expand, partial, package, alerts,
            )
            .await
        }
        Commands::Validate { request } => validate(&request).await,
        Commands::Check { request, runner } => check(&request, &runner).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn build(
    request: &PathBuf,
    singlefile: bool,
    build_path: PathBuf,
    no_expand: bool,
    partial: bool,
    package: bool,
    alerts: Option<PathBuf>,
) -> Result<(), TrellisError> {
    let entries = parse_request(&tokio::fs::read_to_string(request).await?)?;

    let alerts = match alerts {
        Some(path) => Some(serde_yaml::from_str(
            &tokio::fs::read_to_string(path).await?,
        )?),
        None => None,
    };
    let options = BuildOptions {
        expand: !no_expand,
        partial_build: partial,
        build_path,
        package_modules: package,
        alerts,
        ..BuildOptions::default()
    };

    let fetcher = Arc::new(SourceFetcher::new());
    let mut built = build_from_request(&entries, fetcher, &options).await?;

    if singlefile {
        println!("{}", "# config/config.yaml".cyan());
        println!("{}", built.config_text);
        println!("{}", "# workflow/Snakefile".cyan());
        println!("{}", built.snakefile_text);
    } else {
        let path = save_workflow(&mut built, &options).await?;
        println!(
            "{} Workflow written to {} ({} nodes)",
            "✓".green(),
            path.display(),
            built.model.nodes.len()
        );
    }
    Ok(())
}

async fn validate(request: &PathBuf) -> Result<(), TrellisError> {
    let entries = parse_request(&tokio::fs::read_to_string(request).await?)?;
    let modules = entries
        .iter()
        .filter(|e| !e.entry_type.eq_ignore_ascii_case("connector"))
        .count();
    println!(
        "{} Request '{}' is valid",
        "✓".green(),
        request.display()
    );
    println!("  Modules: {}", modules);
    println!("  Connectors: {}", entries.len() - modules);
    Ok(())
}

async fn check(request: &PathBuf, runner: &str) -> Result<(), TrellisError> {
    let entries = parse_request(&tokio::fs::read_to_string(request).await?)?;
    let fetcher = Arc::new(SourceFetcher::new());
    let dry_runner = SnakemakeRunner::new().with_executable(runner);
    let report = check_node_dependencies(&entries, fetcher, &dry_runner).await?;
    match &report {
        DependencyReport::Ok => println!("{} All node dependencies resolved", "✓".green()),
        DependencyReport::Missing { unresolved } => {
            println!(
                "{} Unresolved namespaces: {}",
                "✗".red(),
                unresolved.join(", ")
            );
        }
    }
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
