//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "Field-bus to Zenoh gateway bridge", version)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Shorthand for `--log-level debug`.
    #[arg(short, long)]
    pub debug: bool,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        let matches = Self::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    /// Log level requested on the command line, if any.
    pub fn log_level_override(&self) -> Option<String> {
        match (&self.log_level, self.debug) {
            (Some(level), _) => Some(level.clone()),
            (None, true) => Some("debug".to_string()),
            (None, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_flags() {
        let args = BridgeArgs::try_parse_from(["plgate", "-c", "gateway.json5", "-d"]).unwrap();
        assert_eq!(args.config, PathBuf::from("gateway.json5"));
        assert!(args.debug);
        assert_eq!(args.log_level_override(), Some("debug".to_string()));
    }

    #[test]
    fn test_explicit_level_wins_over_debug() {
        let args = BridgeArgs::try_parse_from([
            "plgate",
            "--config",
            "gateway.json5",
            "--log-level",
            "trace",
            "--debug",
        ])
        .unwrap();
        assert_eq!(args.log_level_override(), Some("trace".to_string()));
    }

    #[test]
    fn test_no_override() {
        let args = BridgeArgs::try_parse_from(["plgate", "-c", "gateway.json5"]).unwrap();
        assert_eq!(args.log_level_override(), None);
    }
}
