//! pp - streaming prompt-file parser
//!
//! CLI entry point for parsing prompt files and walking their references.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use promptparse::cache::ParserCache;
use promptparse::cli::{Cli, Command, get_log_path};
use promptparse::config::Config;
use promptparse::errors::{ChainRender, ResolutionError};
use promptparse::identity::ContentId;
use promptparse::parser::{ParserUpdate, PromptParser};
use promptparse::resolver::{ReferenceResolver, ResolvedPrompt};
use promptparse::storage::FsStorage;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log level from config file first, before the full load
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Parse {
            path,
            json,
            allow_non_eligible,
        } => {
            debug!(path = %path.display(), json, allow_non_eligible, "main: matched Parse command");
            cmd_parse(&config, &path, json, allow_non_eligible).await
        }
        Command::Refs { path, json, max_depth } => {
            debug!(path = %path.display(), json, ?max_depth, "main: matched Refs command");
            cmd_refs(&config, &path, json, max_depth).await
        }
        Command::Watch { path } => {
            debug!(path = %path.display(), "main: matched Watch command");
            cmd_watch(&config, &path).await
        }
    }
}

/// Absolute identity for a path given on the command line
fn identity_for(path: &Path) -> Result<ContentId> {
    if path.is_absolute() {
        return Ok(ContentId::from_path(path));
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(ContentId::from_path(cwd.join(path)))
}

async fn cmd_parse(config: &Config, path: &Path, json: bool, allow_non_eligible: bool) -> Result<()> {
    let identity = identity_for(path)?;
    let mut options = config.parse_options();
    options.track_changes = false;
    options.allow_non_eligible |= allow_non_eligible;

    let storage = Arc::new(FsStorage::new(config.watch.poll_interval()));
    let parser = PromptParser::for_file(identity.clone(), storage, options);
    let cancel = CancellationToken::new();
    parser.start(&cancel);
    parser.settled().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&parse_report(&parser))?);
    } else {
        print_parse(&parser);
    }

    match parser.error_condition() {
        Some(failure) => {
            error!(%identity, kind = %failure.kind(), "Parse failed");
            Err(eyre!("{}", failure.message()))
        }
        None => Ok(()),
    }
}

fn parse_report(parser: &PromptParser) -> serde_json::Value {
    let header = parser.header();
    json!({
        "identity": parser.identity(),
        "kind": parser.kind(),
        "languageId": parser.language_id(),
        "header": header.as_ref().map(|h| h.metadata()),
        "headerValid": header.as_ref().map(|h| h.is_valid()),
        "diagnostics": header.as_ref().map(|h| h.diagnostics().to_vec()).unwrap_or_default(),
        "references": parser.references(),
        "error": parser.error_condition(),
        "body": parser.get_body(),
    })
}

fn print_parse(parser: &PromptParser) {
    println!("{} {}", "Prompt:".bold(), parser.identity());
    match parser.kind() {
        Some(kind) => println!("{} {}", "Kind:".bold(), kind),
        None => println!("{} {}", "Kind:".bold(), "plain markdown".dimmed()),
    }

    if let Some(header) = parser.header() {
        let meta = header.metadata();
        let status = if header.is_valid() {
            "valid".green()
        } else {
            "invalid".red()
        };
        println!("{} {}", "Header:".bold(), status);
        if let Some(description) = &meta.description {
            println!("  description: {}", description);
        }
        if let Some(mode) = &meta.mode {
            println!("  mode: {}", mode);
        }
        if let Some(model) = &meta.model {
            println!("  model: {}", model);
        }
        if let Some(tools) = &meta.tools {
            println!("  tools: {}", tools.join(", "));
        }
        if let Some(apply_to) = &meta.apply_to {
            println!("  applyTo: {}", apply_to);
        }
        for diagnostic in header.diagnostics() {
            match &diagnostic.key {
                Some(key) => println!("  {} {}: {}", "!".yellow(), key, diagnostic.message),
                None => println!("  {} {}", "!".yellow(), diagnostic.message),
            }
        }
    }

    let references = parser.references();
    println!("{} {}", "References:".bold(), references.len());
    for reference in &references {
        let range = reference.range();
        println!(
            "  {} {} {}",
            format!("{}:{}", range.start_line, range.start_column).dimmed(),
            reference.path,
            format!("({})", reference.identity).dimmed()
        );
    }

    if let Some(error) = parser.error_condition() {
        print_error(&error);
        return;
    }

    println!("{}", "Body:".bold());
    print!("{}", parser.get_body());
}

fn print_error(error: &ResolutionError) {
    let message = match error.as_recursive() {
        Some(recursive) => format!(
            "{}: {}",
            error.kind(),
            recursive.recursive_path_string(ChainRender::ShortName)
        ),
        None => format!("{}: {}", error.kind(), error.message()),
    };
    println!("{} {}", "Error:".red().bold(), message);
}

async fn cmd_refs(config: &Config, path: &Path, json: bool, max_depth: Option<usize>) -> Result<()> {
    let identity = identity_for(path)?;
    let mut options = config.parse_options();
    options.track_changes = false;

    let storage = Arc::new(FsStorage::new(config.watch.poll_interval()));
    let cache = Arc::new(ParserCache::new(storage, options.clone()));
    let resolver =
        ReferenceResolver::new(cache.clone(), options).with_max_depth(max_depth.unwrap_or(config.resolver.max_depth));

    let tree = resolver.resolve(&identity).await;
    cache.dispose_all();

    if json {
        let report = json!({
            "tree": &tree,
            "references": tree.all_references(),
            "errors": tree.errors(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_tree(&tree, 0);
        let errors = tree.errors();
        if !errors.is_empty() {
            println!();
            println!("{} {}", "Errors:".bold(), errors.len());
            for error in &errors {
                print_error(error);
            }
        }
    }

    match tree.error {
        Some(failure) => {
            error!(%identity, kind = %failure.kind(), "Resolution failed");
            Err(eyre!("{}", failure.message()))
        }
        None => Ok(()),
    }
}

fn print_tree(node: &ResolvedPrompt, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = match &node.reference {
        Some(reference) => reference.path.clone(),
        None => node.identity.to_string(),
    };
    let status = match &node.error {
        Some(error) => format!("[{}]", error.kind()).red(),
        None if node.truncated => "[truncated]".yellow(),
        None => "".normal(),
    };
    println!("{}{} {}", indent, label, status);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

async fn cmd_watch(config: &Config, path: &Path) -> Result<()> {
    let identity = identity_for(path)?;
    let mut options = config.parse_options();
    options.track_changes = true;

    let storage = Arc::new(FsStorage::new(config.watch.poll_interval()));
    let parser = PromptParser::for_file(identity.clone(), storage, options);
    let mut updates = parser.subscribe();
    let cancel = CancellationToken::new();
    parser.start(&cancel);

    info!(%identity, "Watching prompt file");
    println!("{} {} (Ctrl-C to stop)", "Watching".bold(), identity);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Watch interrupted");
                break;
            }
            update = updates.recv() => {
                match update {
                    Ok(ParserUpdate::Settled { round, ok }) => {
                        debug!(round, ok, "cmd_watch: settled");
                        println!();
                        println!("{}", format!("--- round {} ---", round).dimmed());
                        print_parse(&parser);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "cmd_watch: update receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    cancel.cancel();
    Ok(())
}
