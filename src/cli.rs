//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP Auth Guard - credential safeguards for MCP tool servers
#[derive(Parser, Debug)]
#[command(name = "mcp-authguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHGUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTHGUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHGUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Print the log-safe hash of a bearer token
    HashToken {
        /// Token to hash (read from stdin when omitted)
        token: Option<String>,
    },

    /// Secret backend commands
    #[command(subcommand)]
    Secret(SecretCommand),

    /// Client registry commands
    #[command(subcommand)]
    Registry(RegistryCommand),
}

/// Secret subcommands
#[derive(Subcommand, Debug)]
pub enum SecretCommand {
    /// Fetch a secret and report whether it resolved (the value is never printed)
    Check {
        /// Secret name
        #[arg(required = true)]
        name: String,

        /// Secret version
        #[arg(long, default_value = "latest")]
        version: String,
    },
}

/// Registry subcommands
#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// Create the registry table or directory
    Init,

    /// List stored keys
    List {
        /// Only keys starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Delete a stored key
    Delete {
        /// Key to delete
        #[arg(required = true)]
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_registry_list() {
        let cli = Cli::parse_from([
            "mcp-authguard",
            "--config",
            "authguard.yaml",
            "registry",
            "list",
            "--prefix",
            "oauth_client:",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("authguard.yaml")));
        match cli.command {
            Command::Registry(RegistryCommand::List { prefix, format }) => {
                assert_eq!(prefix, "oauth_client:");
                assert_eq!(format, "table");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn secret_check_defaults_to_latest() {
        let cli = Cli::parse_from(["mcp-authguard", "secret", "check", "jwt-key"]);
        match cli.command {
            Command::Secret(SecretCommand::Check { name, version }) => {
                assert_eq!(name, "jwt-key");
                assert_eq!(version, "latest");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
