mod api;
mod pair;
mod realtime;
mod summarizer;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zapdesk_core::{
    config::{self, shellexpand, Config},
    model::{AccountStatus, Role},
};
use zapdesk_store::Store;
use zapdesk_whatsapp::{ConnectionManager, WhatsAppRustFactory};

#[derive(Parser)]
#[command(
    name = "zapdesk",
    version,
    about = "zapdesk: shared WhatsApp inboxes for support teams"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server, realtime bridge, and WhatsApp connections.
    Serve,
    /// Link a phone from an invite link token.
    Pair {
        #[arg(long, env = "ZAPDESK_INVITE_TOKEN")]
        invite: String,
        /// Act as this profile instead of as the invitee.
        #[arg(long, env = "ZAPDESK_API_TOKEN", hide_env_values = true)]
        api_token: Option<String>,
        /// Also write each QR code to this PNG file.
        #[arg(long)]
        qr_file: Option<PathBuf>,
        /// Override `client.server_url`.
        #[arg(long)]
        server: Option<String>,
    },
    /// Re-link a known account from a reconnection token.
    Reconnect {
        #[arg(long)]
        token: String,
        #[arg(long)]
        qr_file: Option<PathBuf>,
        #[arg(long)]
        server: Option<String>,
    },
    /// Show configuration and stored account status.
    Status,
    /// Manage profiles.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a profile and print its API token.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Agent)]
        role: RoleArg,
        /// Existing organization id.
        #[arg(long, conflicts_with = "org_name")]
        org: Option<uuid::Uuid>,
        /// Create a new organization with this name.
        #[arg(long)]
        org_name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    SuperAdmin,
    Admin,
    Agent,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::SuperAdmin => Role::SuperAdmin,
            RoleArg::Admin => Role::Admin,
            RoleArg::Agent => Role::Agent,
        }
    }
}

/// Console logging, plus a daily file under `{data_dir}/logs` when `log_dir` is set.
/// The returned guard must live as long as the process logs.
fn init_tracing(
    cfg: &Config,
    log_dir: Option<PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.zapdesk.log_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "zapdesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let log_dir = PathBuf::from(shellexpand(&cfg.zapdesk.data_dir)).join("logs");
            std::fs::create_dir_all(&log_dir)?;
            let _guard = init_tracing(&cfg, Some(log_dir));
            serve(cfg).await?;
        }
        Commands::Pair {
            invite,
            api_token,
            qr_file,
            server,
        } => {
            init_tracing(&cfg, None);
            let mut client = cfg.client.clone();
            if let Some(server) = server {
                client.server_url = server;
            }
            let target = pair::PairTarget::Invite {
                token: invite,
                api_token,
            };
            pair::run(&client, target, qr_file).await?;
        }
        Commands::Reconnect {
            token,
            qr_file,
            server,
        } => {
            init_tracing(&cfg, None);
            let mut client = cfg.client.clone();
            if let Some(server) = server {
                client.server_url = server;
            }
            pair::run(&client, pair::PairTarget::Reconnect(token), qr_file).await?;
        }
        Commands::Status => {
            init_tracing(&cfg, None);
            status(&cli.config, &cfg).await?;
        }
        Commands::User { action } => {
            init_tracing(&cfg, None);
            match action {
                UserAction::Add {
                    name,
                    email,
                    role,
                    org,
                    org_name,
                } => add_user(&cfg, &name, &email, role.into(), org, org_name).await?,
            }
        }
    }

    Ok(())
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let store = Store::new(&cfg.store).await?;
    let hub = Arc::new(realtime::RoomHub::new());
    let factory = Arc::new(WhatsAppRustFactory::new(
        store.pool().clone(),
        &cfg.whatsapp.device_name,
    ));
    let manager = Arc::new(ConnectionManager::new(
        store.clone(),
        hub.clone(),
        factory,
        &cfg.whatsapp,
    ));

    if cfg.whatsapp.restore_on_start {
        if let Err(e) = manager.restore_connected().await {
            warn!("restoring whatsapp connections failed: {e}");
        }
    }

    let summarizer = summarizer::Summarizer::from_config(&cfg.summarizer);
    if summarizer.is_none() {
        info!("chat summaries disabled");
    }

    info!("{} starting", cfg.zapdesk.name);
    let state = api::ApiState::new(
        store,
        manager.clone(),
        hub.clone(),
        hub,
        summarizer,
        cfg.tokens.clone(),
    );
    let result = api::serve(&cfg.api, state).await;

    manager.shutdown().await;
    info!("{} stopped", cfg.zapdesk.name);
    Ok(result?)
}

async fn status(config_path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("zapdesk status\n");
    println!("Config:   {config_path}");
    println!("Database: {}", shellexpand(&cfg.store.db_path));
    println!("API:      http://{}:{}", cfg.api.host, cfg.api.port);
    println!(
        "Summaries: {}",
        if cfg.summarizer.enabled {
            cfg.summarizer.model.as_str()
        } else {
            "disabled"
        }
    );
    println!();

    let store = Store::new(&cfg.store).await?;
    for status in [
        AccountStatus::Connected,
        AccountStatus::Connecting,
        AccountStatus::QrPending,
        AccountStatus::Disconnected,
    ] {
        let accounts = store.accounts_with_status(status).await?;
        println!("  {:<13} {}", status.as_str(), accounts.len());
        for account in accounts {
            println!(
                "    {} {} {}",
                account.account_id,
                account.name,
                account.phone_number.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

async fn add_user(
    cfg: &Config,
    name: &str,
    email: &str,
    role: Role,
    org: Option<uuid::Uuid>,
    org_name: Option<String>,
) -> anyhow::Result<()> {
    let store = Store::new(&cfg.store).await?;
    let organization_id = match (org, org_name) {
        (Some(id), _) => Some(id),
        (None, Some(org_name)) => Some(store.create_organization(&org_name).await?),
        (None, None) if role == Role::SuperAdmin => None,
        (None, None) => anyhow::bail!("--org or --org-name is required for {}", role.as_str()),
    };
    if store.profile_by_email(email).await?.is_some() {
        anyhow::bail!("a profile with email {email} already exists");
    }

    let (profile, token) = store
        .create_profile(organization_id, name, email, role)
        .await?;
    println!("Created {} {} ({})", role.as_str(), profile.name, profile.id);
    if let Some(org) = organization_id {
        println!("Organization: {org}");
    }
    println!("API token (shown once): {token}");
    Ok(())
}
