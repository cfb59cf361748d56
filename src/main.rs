use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use veilo::config::Config;
use veilo::protocol::ProfileUpdate;
use veilo::session::{ConsoleNotifier, HttpAuthApi, SessionContext, SessionState, TokenStore};

/// Identity and session service for Veilo.
#[derive(Parser)]
#[command(name = "veilo", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/veilo/config.toml)
    #[arg(long, global = true, env = "VEILO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage the local session against a running gateway
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VEILO_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VEILO_PASSWORD", hide_env_values = true)]
        password: String,
        /// Real name (private)
        #[arg(long)]
        name: String,
        /// Preferred public alias; one is generated when omitted
        #[arg(long)]
        alias: Option<String>,
    },
    /// Show who is signed in
    Status,
    /// Exchange the stored refresh token for a new access token
    Refresh,
    /// Update alias, avatar or name
    Profile {
        #[arg(long)]
        alias: Option<String>,
        #[arg(long)]
        avatar: Option<u8>,
        #[arg(long)]
        avatar_url: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out and forget stored tokens
    Logout,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("VEILO_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            veilo::gateway::run_gateway(config).await
        }
        Commands::Auth { command } => run_auth(command, &config).await,
    }
}

/// Why `auth refresh` has nothing to do, if it doesn't.
fn refresh_skip_reason(tokens: &TokenStore) -> Option<&'static str> {
    if tokens.get_refresh_token().is_some() {
        None
    } else if tokens.get_token().is_some() {
        Some("No refresh token stored")
    } else {
        Some("Not signed in")
    }
}

async fn run_auth(command: AuthCommands, config: &Config) -> Result<()> {
    let api = HttpAuthApi::new(
        &config.client.server_url,
        Duration::from_secs(config.client.request_timeout_secs.max(1)),
    )?;
    let tokens = TokenStore::file(config.client.resolved_token_dir()?);
    let session = SessionContext::new(Arc::new(api), tokens, Arc::new(ConsoleNotifier));

    let ok = match command {
        AuthCommands::Login { email, password } => session.login(&email, &password).await,
        AuthCommands::Register {
            email,
            password,
            name,
            alias,
        } => {
            session
                .register(&email, &password, &name, alias.as_deref())
                .await
        }
        AuthCommands::Status => {
            session.init().await;
            match session.state() {
                SessionState::Authenticated(user) => {
                    println!("Signed in as {} ({})", user.alias, user.email);
                    println!("  role: {}  avatar: {}", user.role.as_str(), user.avatar_index);
                }
                _ if session.tokens().get_token().is_some() => {
                    println!("Not signed in (server unreachable, token kept)");
                }
                _ => println!("Not signed in"),
            }
            true
        }
        AuthCommands::Refresh => match refresh_skip_reason(session.tokens()) {
            Some(reason) => {
                println!("{reason}");
                false
            }
            None => {
                let refreshed = session.refresh_token().await;
                if refreshed {
                    println!("Access token refreshed");
                }
                refreshed
            }
        },
        AuthCommands::Profile {
            alias,
            avatar,
            avatar_url,
            name,
        } => {
            let update = ProfileUpdate {
                alias,
                avatar_index: avatar,
                avatar_url,
                real_name: name,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update: pass --alias, --avatar, --avatar-url or --name");
            }
            session.init().await;
            if !session.is_authenticated() {
                anyhow::bail!("Not signed in");
            }
            session.update_profile(update).await
        }
        AuthCommands::Logout => {
            session.logout().await;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn refresh_explains_missing_tokens() {
        let tokens = TokenStore::in_memory();
        assert_eq!(refresh_skip_reason(&tokens), Some("Not signed in"));

        tokens.set_token("access-1").unwrap();
        assert_eq!(refresh_skip_reason(&tokens), Some("No refresh token stored"));

        tokens.set_refresh_token("refresh-1").unwrap();
        assert_eq!(refresh_skip_reason(&tokens), None);
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_host_and_port() {
        let cli = Cli::try_parse_from(["veilo", "serve", "--host", "0.0.0.0", "--port", "8000"])
            .unwrap();
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(8000));
            }
            Commands::Auth { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn register_alias_is_optional() {
        let cli = Cli::try_parse_from([
            "veilo",
            "auth",
            "register",
            "--email",
            "a@x.com",
            "--password",
            "longenough",
            "--name",
            "Ann",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Auth {
                command: AuthCommands::Register { alias: None, .. }
            }
        ));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["veilo", "auth", "status", "--config", "/tmp/veilo.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/veilo.toml")));
    }
}
