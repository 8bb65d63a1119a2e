//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Discover, download, and analyze document collections.
///
/// The run is described by a single `key = value` configuration file
/// selecting the discovery strategy, the downloader, the analyzer,
/// and the log output path.
#[derive(Parser, Debug)]
#[command(name = "docharvest")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the run configuration file
    pub config_file: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_config_file() {
        let result = Args::try_parse_from(["docharvest"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_config_file() {
        let args = Args::try_parse_from(["docharvest", "run.conf"]).unwrap();
        assert_eq!(args.config_file, PathBuf::from("run.conf"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["docharvest", "run.conf", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["docharvest", "run.conf", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["docharvest", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
