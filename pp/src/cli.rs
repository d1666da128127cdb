//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// pp - streaming prompt-file parser
#[derive(Parser)]
#[command(
    name = "pp",
    about = "Parse prompt files and resolve their references",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse one prompt file and print its header, references and body
    Parse {
        /// Prompt file to parse
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Parse files without a prompt suffix
        #[arg(short = 'a', long)]
        allow_non_eligible: bool,
    },

    /// Resolve references recursively and print the tree
    Refs {
        /// Root prompt file
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Maximum nesting depth (overrides config)
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },

    /// Re-parse a prompt file whenever it changes
    Watch {
        /// Prompt file to watch
        path: PathBuf,
    },
}

/// Log file location
pub fn get_log_path() -> PathBuf {
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("promptparse")
        .join("logs")
        .join("promptparse.log");
    debug!(path = %path.display(), "get_log_path: called");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from(["pp", "-l", "debug", "parse", "a.prompt.md", "--json"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Parse { path, json, .. } => {
                assert_eq!(path, PathBuf::from("a.prompt.md"));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["pp", "refs", "a.prompt.md", "--config", "x.yml", "-d", "2"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
        assert!(matches!(cli.command, Command::Refs { max_depth: Some(2), .. }));
    }

    #[test]
    fn test_log_path_under_promptparse() {
        let path = get_log_path();
        assert!(path.ends_with("promptparse/logs/promptparse.log"));
    }
}
