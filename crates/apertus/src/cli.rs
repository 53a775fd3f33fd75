//! Command-line interface handling for the Apertus runtime.
//!
//! Parses the options that override values from the configuration file.

use clap::{value_parser, Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the shutdown polling interval in milliseconds
    pub poll_interval_ms: Option<u64>,
}

impl CliArgs {
    fn command() -> Command {
        Command::new("Apertus")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Process-local plugin host with an event bus and replicated state")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("poll-interval")
                    .long("poll-interval")
                    .value_name("MS")
                    .help("Polling interval of worker loops, bounds shutdown latency")
                    .value_parser(value_parser!(u64)),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            poll_interval_ms: matches.get_one::<u64>("poll-interval").copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags() {
        let args = CliArgs::try_parse_from(["apertus"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.poll_interval_ms.is_none());
    }

    #[test]
    fn all_overrides() {
        let args = CliArgs::try_parse_from([
            "apertus",
            "-c",
            "custom.toml",
            "--log-level",
            "debug",
            "--json-logs",
            "--poll-interval",
            "25",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.poll_interval_ms, Some(25));
    }

    #[test]
    fn rejects_non_numeric_interval() {
        assert!(CliArgs::try_parse_from(["apertus", "--poll-interval", "soon"]).is_err());
    }
}
