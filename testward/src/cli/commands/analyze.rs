//! Analyze command - report what the analyzer sees in Go sources

use crate::cli::app::AnalyzeArgs;
use anyhow::Result;
use testward_core::InfrastructureConfig;
use testward_core::analysis::{FileAnalysis, SourceAnalyzer};
use testward_core::test_gen::generator::go_sources;

pub async fn execute(config: &InfrastructureConfig, args: AnalyzeArgs) -> Result<()> {
    let path = if args.path.is_relative() && !args.path.exists() {
        config.project_root.join(&args.path)
    } else {
        args.path
    };
    let analyzer = SourceAnalyzer::new();

    let files = if path.is_file() { vec![path] } else { go_sources(&path) };
    if files.is_empty() {
        println!("No Go sources found under {}", config.project_root.display());
        return Ok(());
    }

    let mut analyses = Vec::new();
    for (file, result) in analyzer.analyze_files(&files).await {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => eprintln!("{}: {}", file.display(), e),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analyses)?);
    } else {
        analyses.iter().for_each(print_file);
    }
    Ok(())
}

fn print_file(analysis: &FileAnalysis) {
    println!("{} (package {})", analysis.path.display(), analysis.package);
    for function in &analysis.functions {
        let name = match &function.receiver {
            Some(receiver) => format!("({}) {}", receiver, function.name),
            None => function.name.clone(),
        };
        println!(
            "  {:<40} complexity {:>2}  paths {} happy / {} error / {} edge",
            name,
            function.complexity,
            function.happy_paths.len(),
            function.error_paths.len(),
            function.edge_cases.len()
        );
    }
}
