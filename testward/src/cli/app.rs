use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "testward",
    version,
    about = "Testward - keep a Go project's test suite healthy",
    long_about = "Testward analyzes Go sources to generate tests, tracks test performance across runs, detects regressions, and maintains the suite on a schedule."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file (defaults to testward.toml in the project)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the Go project
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    #[command(about = "Write a testward.toml with default settings")]
    Init(InitArgs),

    /// Analyze Go sources
    #[command(about = "Report functions, complexity and execution paths of Go sources")]
    Analyze(AnalyzeArgs),

    /// Generate tests
    #[command(about = "Generate Go tests for a file or directory")]
    Generate(GenerateArgs),

    /// Run one maintenance cycle
    #[command(about = "Run the suite once, maintain it, and print the report")]
    Maintain(MaintainArgs),

    /// Show infrastructure status
    #[command(about = "Run a health check and show the current status")]
    Status(StatusArgs),

    /// Run the background loops until interrupted
    #[command(about = "Start the self-maintaining infrastructure in the foreground")]
    Run,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Path to file or directory to analyze
    #[arg(help = "Path to file or directory to analyze", default_value = ".")]
    pub path: PathBuf,

    /// Print the analysis as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Path to file or directory to generate tests for
    #[arg(help = "Path to file or directory to generate tests for", default_value = ".")]
    pub path: PathBuf,

    /// Print generated files instead of writing them
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite test files that already exist
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct MaintainArgs {
    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}
