//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Control-plane request dispatcher
#[derive(Parser, Debug)]
#[command(name = "dispatch-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DISPATCH_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DISPATCH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DISPATCH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DISPATCH_GATEWAY_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DISPATCH_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// List every route pattern, in match order
    Routes {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show the intent and execution plan a request resolves to
    Classify {
        /// HTTP method
        method: String,

        /// Request path
        path: String,
    },
}

/// Output format for listing commands
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned table
    Text,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classify() {
        let cli = Cli::parse_from(["dispatch-gateway", "classify", "POST", "/api/generateNewsletter"]);
        match cli.command {
            Some(Command::Classify { method, path }) => {
                assert_eq!(method, "POST");
                assert_eq!(path, "/api/generateNewsletter");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn routes_format_defaults_to_text() {
        let cli = Cli::parse_from(["dispatch-gateway", "routes"]);
        assert!(matches!(cli.command, Some(Command::Routes { format: OutputFormat::Text })));

        let cli = Cli::parse_from(["dispatch-gateway", "--log-level", "debug", "routes", "-f", "yaml"]);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Some(Command::Routes { format: OutputFormat::Yaml })));
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["dispatch-gateway", "--port", "8080"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(8080));
    }
}
