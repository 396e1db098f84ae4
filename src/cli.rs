//! Command-line surface: the `list` and `set` subcommands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use realias::discovery::{self, ImportHit};
use realias::edit;
use realias::lsp::LspClient;

#[derive(Parser)]
#[command(name = "realias")]
#[command(version)]
#[command(about = "Standardize Go import aliases across your codebase using gopls")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List import aliases for a package
    List(ListArgs),
    /// Set import alias for a package
    Set(SetArgs),
    /// Print version information
    Version,
}

#[derive(Args)]
struct ListArgs {
    /// Full import path to manage
    #[arg(short, long)]
    package: String,

    /// Go package patterns to scan (defaults to ./...)
    patterns: Vec<String>,
}

#[derive(Args)]
struct SetArgs {
    /// Full import path to manage
    #[arg(short, long)]
    package: String,

    /// Desired alias identifier
    #[arg(short, long)]
    alias: String,

    /// Show diff instead of writing changes
    #[arg(short = 'n', long)]
    preview: bool,

    /// Go package patterns to scan (defaults to ./...)
    patterns: Vec<String>,
}

pub async fn run() -> Result<()> {
    match Cli::parse().command {
        Commands::List(args) => run_list(args),
        Commands::Set(args) => run_set(args).await,
        Commands::Version => {
            println!("realias {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_list(args: ListArgs) -> Result<()> {
    let patterns = discovery::default_patterns(&args.patterns);
    let results = discovery::find_imports(&patterns, &args.package)?;

    if results.is_empty() {
        println!("No imports found for package: {}", args.package);
        return Ok(());
    }

    let width = results
        .iter()
        .map(|r| r.location().len())
        .max()
        .unwrap_or(0)
        .max("LOCATION".len());

    println!("{:<width$}  ALIAS", "LOCATION", width = width);
    println!("{:<width$}  -----", "--------", width = width);
    for result in &results {
        println!("{:<width$}  {}", result.location(), result.alias, width = width);
    }

    Ok(())
}

async fn run_set(args: SetArgs) -> Result<()> {
    let patterns = discovery::default_patterns(&args.patterns);
    let results = discovery::find_imports(&patterns, &args.package)?;

    // Files already at the desired alias need no rename.
    let to_process: Vec<ImportHit> = results
        .into_iter()
        .filter(|r| r.alias != args.alias)
        .collect();

    if to_process.is_empty() {
        println!("No files need updating");
        return Ok(());
    }

    let cwd = std::env::current_dir().context("failed to get current working directory")?;
    let client = LspClient::spawn(&cwd).context("failed to create LSP client")?;

    let outcome = process_hits(&client, &to_process, &args).await;

    // The subprocess must be reaped even when a rename fails mid-run.
    if let Err(e) = client.close().await {
        tracing::warn!("Error closing LSP client: {}", e);
    }

    outcome
}

async fn process_hits(client: &LspClient, hits: &[ImportHit], args: &SetArgs) -> Result<()> {
    client
        .initialize()
        .await
        .context("failed to initialize LSP client")?;

    println!("Processing {} files...", hits.len());

    let mut stdout = std::io::stdout();
    for (i, hit) in hits.iter().enumerate() {
        println!("Processing file {}/{}: {}", i + 1, hits.len(), hit.file);

        // Discovery positions are 1-based; the LSP speaks zero-based.
        let workspace_edit = client
            .rename(Path::new(&hit.file), hit.line - 1, hit.column - 1, &args.alias)
            .await
            .with_context(|| format!("rename operation failed for {}", hit.file))?;

        edit::apply_workspace_edit(&workspace_edit, args.preview, &mut stdout)
            .with_context(|| format!("failed to apply workspace edit for {}", hit.file))?;
        stdout.flush().ok();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_subcommand() {
        let cli = Cli::try_parse_from(["realias", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_parse_set_subcommand() {
        let cli = Cli::try_parse_from([
            "realias", "set", "-p", "github.com/user/repo", "-a", "repo", "-n", "./cmd/...",
        ])
        .unwrap();
        match cli.command {
            Commands::Set(args) => {
                assert_eq!(args.package, "github.com/user/repo");
                assert_eq!(args.alias, "repo");
                assert!(args.preview);
                assert_eq!(args.patterns, vec!["./cmd/..."]);
            }
            _ => panic!("expected set subcommand"),
        }
    }
}
