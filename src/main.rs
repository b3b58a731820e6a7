//! MCP Auth Guard - operator commands

use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use mcp_authguard::{
    cli::{Cli, Command, RegistryCommand, SecretCommand},
    clock::SystemClock,
    config::Config,
    guard::TokenHash,
    identity, registry,
    secrets::SecretCache,
    setup_tracing,
    verifier::VerifierConfig,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Command::HashToken { token } => run_hash_token(token),
        Command::CheckConfig => load_config(config_path).and_then(|c| run_check_config(&c)),
        Command::Secret(cmd) => match load_config(config_path) {
            Ok(config) => run_secret_command(&config, cmd).await,
            Err(e) => Err(e),
        },
        Command::Registry(cmd) => match load_config(config_path) {
            Ok(config) => run_registry_command(&config, cmd).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

fn run_hash_token(token: Option<String>) -> anyhow::Result<()> {
    let token = match token {
        Some(token) => token,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read token from stdin")?;
            line.trim().to_string()
        }
    };
    anyhow::ensure!(!token.is_empty(), "No token given");

    println!("{}", TokenHash::of(&token));
    Ok(())
}

fn run_check_config(config: &Config) -> anyhow::Result<()> {
    println!("✅ Configuration is valid\n");
    println!("Mode:        {:?}", config.mode);
    println!(
        "Rate limit:  {} (max {} attempts / {}s)",
        if config.rate_limit.enabled { "enabled" } else { "disabled" },
        config.rate_limit.max_attempts,
        config.rate_limit.window_seconds
    );
    println!(
        "Secrets:     {:?} (ttl {}s)",
        config.secrets.backend, config.secrets.cache_ttl_seconds
    );
    println!(
        "Registry:    {:?} (table {})",
        config.registry.backend, config.registry.table
    );

    match config.verifier {
        Some(ref settings) => {
            let verifier = VerifierConfig::from_settings(settings, config.mode)?;
            match verifier {
                VerifierConfig::Jwt(jwt) => println!(
                    "Verifier:    jwt ({:?}, skew {}s)",
                    jwt.algorithm(),
                    jwt.clock_skew_seconds()
                ),
                VerifierConfig::Introspection(intro) => {
                    println!("Verifier:    introspection ({})", intro.introspection_uri());
                }
            }
        }
        None => println!("Verifier:    not configured"),
    }

    Ok(())
}

async fn run_secret_command(config: &Config, cmd: SecretCommand) -> anyhow::Result<()> {
    match cmd {
        SecretCommand::Check { name, version } => {
            let identity = identity::from_config(&config.identity)?;
            let cache = SecretCache::from_config(
                &config.secrets,
                config.mode,
                identity,
                SystemClock::shared(),
            )?;

            let value = cache
                .get_version(&name, &version)
                .await
                .with_context(|| format!("Secret '{name}' did not resolve"))?;

            info!(secret = %name, backend = cache.backend_name(), "Secret check passed");
            println!(
                "✅ {name}@{version} resolved via {} ({} bytes)",
                cache.backend_name(),
                value.len()
            );
            Ok(())
        }
    }
}

async fn run_registry_command(config: &Config, cmd: RegistryCommand) -> anyhow::Result<()> {
    let identity = identity::from_config(&config.identity)?;
    let registry = registry::from_config(&config.registry, identity, SystemClock::shared())?;

    match cmd {
        RegistryCommand::Init => {
            registry.initialize().await?;
            println!("✅ {} registry ready", registry.backend_name());
        }
        RegistryCommand::List { prefix, format } => {
            let keys = registry.list_keys(&prefix).await?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else if keys.is_empty() {
                println!("No entries found.");
            } else {
                println!("{} entr{}:\n", keys.len(), if keys.len() == 1 { "y" } else { "ies" });
                for key in &keys {
                    println!("  {key}");
                }
            }
        }
        RegistryCommand::Delete { key } => {
            let existed = registry.exists(&key).await?;
            registry.delete(&key).await?;
            if existed {
                println!("✅ Deleted {key}");
            } else {
                println!("{key} was not registered");
            }
        }
    }

    Ok(())
}
