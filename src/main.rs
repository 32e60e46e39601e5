use std::fs;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use warden::auth::TokenService;
use warden::config::{AuthConfig, ServerConfig};
use warden::server::{AppState, create_router};
use warden::store::{SqliteStore, Store};
use warden::types::{Principal, Role};

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

fn generate_signing_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "An authentication and access-control server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,

        /// Data directory for the database and signing secret
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Trusted reverse-proxy header carrying the caller's email.
        /// When set, a header/principal mismatch invalidates the session.
        #[arg(long)]
        trusted_email_header: Option<String>,

        /// Reject API keys entirely
        #[arg(long)]
        disable_api_keys: bool,

        /// Comma-separated endpoint path prefixes API keys may call.
        /// Unset means unrestricted.
        #[arg(long)]
        api_key_allowed_endpoints: Option<String>,

        /// Let admins bypass explicit-grant checks on shared resources.
        /// Every use is audit-logged.
        #[arg(long)]
        legacy_admin_override: bool,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database, signing secret and admin)
    Init {
        /// Data directory for the database and signing secret
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

fn run_init(data_dir: String, non_interactive: bool) -> anyhow::Result<()> {
    let data_path: std::path::PathBuf = data_dir.into();
    fs::create_dir_all(&data_path)?;

    let config = ServerConfig {
        data_dir: data_path.clone(),
        ..ServerConfig::default()
    };

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    if store.has_admin()? || config.secret_path().exists() {
        bail!(
            "Server already initialized. Signing secret exists at: {}",
            config.secret_path().display()
        );
    }

    let secret = generate_signing_secret();
    fs::write(config.secret_path(), &secret)?;

    #[cfg(unix)]
    set_restrictive_permissions(&config.secret_path());

    let (name, email) = if non_interactive {
        ("Admin".to_string(), "admin@localhost".to_string())
    } else {
        prompt_admin_identity()?
    };

    let tokens = TokenService::new(secret);
    let api_key = tokens.issue_api_key();
    let now = Utc::now().timestamp();

    let admin = Principal {
        id: Uuid::new_v4().to_string(),
        email,
        name,
        role: Role::Admin,
        department: None,
        api_key: Some(api_key.clone()),
        last_active_at: None,
        created_at: now,
        updated_at: now,
    };
    store.create_principal(&admin)?;

    println!();
    println!("========================================");
    println!("Admin API key (save this, it won't be shown again):");
    println!();
    println!("  {api_key}");
    println!();
    println!("Signing secret written to: {}", config.secret_path().display());
    println!("========================================");
    println!();

    Ok(())
}

fn prompt_admin_identity() -> anyhow::Result<(String, String)> {
    let name = inquire::Text::new("Admin name:")
        .with_default("Admin")
        .prompt()?;

    let email = inquire::Text::new("Admin email:")
        .with_validator(|input: &str| {
            if input.trim().is_empty() || !input.contains('@') {
                Err("Enter a valid email address".into())
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()?;

    Ok((name, email))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warden=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                non_interactive,
            } => {
                run_init(data_dir, non_interactive)?;
            }
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            trusted_email_header,
            disable_api_keys,
            api_key_allowed_endpoints,
            legacy_admin_override,
        } => {
            let config = ServerConfig {
                host,
                port,
                data_dir: data_dir.into(),
            };

            if !config.secret_path().exists() {
                bail!(
                    "Server not initialized. Run 'warden admin init' first to create the database and signing secret."
                );
            }
            let secret = fs::read_to_string(config.secret_path())?.trim().to_string();

            let store = SqliteStore::new(config.db_path())?;
            if !store.has_admin()? {
                bail!(
                    "Server not initialized. Run 'warden admin init' first to create the admin principal."
                );
            }

            let mut auth = AuthConfig::new(secret);
            auth.trusted_email_header = trusted_email_header;
            auth.enable_api_key = !disable_api_keys;
            auth.api_key_allowed_endpoints = api_key_allowed_endpoints
                .map(|raw| raw.split(',').map(|p| p.trim().to_string()).collect());
            auth.legacy_admin_override = legacy_admin_override;

            if auth.legacy_admin_override {
                tracing::warn!(
                    "legacy admin override is enabled: admins bypass explicit-grant checks"
                );
            }

            let state = Arc::new(AppState::new(Arc::new(store), auth));

            let app = create_router(state);
            let addr = config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
