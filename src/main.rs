use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fixloop::apply::{GitApplier, PatchTool, apply_guarded};
use fixloop::assistant::AnyAssistant;
use fixloop::cli::{Cli, CliCommand};
use fixloop::config::Config;
use fixloop::diff;
use fixloop::error::{Error, Result};
use fixloop::locate;
use fixloop::safety;
use fixloop::task::ShellTaskRunner;
use fixloop::verify::{Outcome, VerificationLoop};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(repo = %config.repo_root.display(), "fixloop starting");

    let code = match cli.command {
        CliCommand::Run(_) => run_loop(config).await,
        CliCommand::Apply { ref diff, yes, .. } => apply_file(&config, diff, yes).await,
        CliCommand::Errors { ref file, .. } => {
            print_errors(file.as_deref(), config.max_errors).await
        }
    };
    match code {
        Ok(code) => std::process::exit(code),
        Err(Error::Interrupted) => std::process::exit(130),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_loop(config: Config) -> Result<i32> {
    let Some(spec) = config.task.clone() else {
        return Err(Error::Config(
            "missing --task <lint|test|build> or --cmd \"<command>\"".to_string(),
        ));
    };
    let root = config.repo_root.clone();
    let runner = ShellTaskRunner::new(spec, &root);
    let assistant = AnyAssistant::from_config(&config.assistant, &root)?;
    let patcher = GitApplier::new(&root);

    let outcome = VerificationLoop::new(config, runner, assistant, patcher)
        .run()
        .await?;
    match &outcome {
        Outcome::Success { fixes } => {
            eprintln!("[fixloop] Success: no errors remain ({fixes} fix(es) kept)");
        }
        Outcome::Partial { remaining, fixes } => {
            eprintln!("[fixloop] Stopped with {remaining} error(s) remaining ({fixes} fix(es) kept)");
        }
        Outcome::Aborted { reason, remaining } => {
            match remaining {
                Some(n) => eprintln!("[fixloop] Aborted with {n} error(s) remaining: {reason}"),
                None => eprintln!("[fixloop] Aborted: {reason}"),
            }
        }
    }
    Ok(outcome.exit_code())
}

async fn apply_file(config: &Config, diff_path: &Path, yes: bool) -> Result<i32> {
    let text = tokio::fs::read_to_string(diff_path).await?;
    let fact = diff::inspect(&text);
    if fact.files.is_empty() {
        return Err(Error::PatchFormatInvalid(format!(
            "{} names no files",
            diff_path.display()
        )));
    }
    safety::check_paths(&config.repo_root, &fact.files)?;
    safety::check_volume(&fact, config.max_lines)?;

    println!("Review:");
    for file in &fact.files {
        println!("  {file}");
    }
    println!("  +{} -{}", fact.added_lines, fact.removed_lines);

    if !yes && !confirm("Apply this patch? [y/N] ").await? {
        println!("Cancelled.");
        return Ok(0);
    }

    let git = GitApplier::new(&config.repo_root);
    git.ensure_available().await?;
    let applied = apply_guarded(
        &git,
        &config.repo_root,
        &config.backup_dir,
        &text,
        config.max_lines,
    )
    .await?;
    let backup = applied.snapshot.keep();
    println!("Applied. Backup: {}", backup.display());
    Ok(0)
}

async fn confirm(question: &str) -> Result<bool> {
    eprint!("{question}");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn print_errors(file: Option<&Path>, max: usize) -> Result<i32> {
    let output = match file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let refs = locate::locate_errors(&output, max);
    if refs.is_empty() {
        eprintln!("No error locations found.");
        return Ok(1);
    }
    for r in &refs {
        println!("- {r}");
    }
    Ok(0)
}
