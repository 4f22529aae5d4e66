//! GitHub App Demo Bot
//!
//! Authenticates as a GitHub App installation, creates a repository, commits
//! a file locally and pushes it over HTTPS with the installation token.
//!
//! ## Usage
//! ```bash
//! # With command line arguments
//! github-app-bot run \
//!   --github-app-id 123456 \
//!   --github-app-private-key ./key.pem \
//!   --github-app-installation-id 78901234
//!
//! # With environment variables
//! PUREBOT_GITHUB_APP_ID=123456 \
//! PUREBOT_GITHUB_APP_PRIVATE_KEY=./key.pem \
//! PUREBOT_GITHUB_APP_INSTALLATION_ID=78901234 \
//! github-app-bot run
//!
//! # With a config file
//! github-app-bot --config ./bot.yaml run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use github_app_bot::config::{BotConfig, ConfigOverrides};
use github_app_bot::git::{CommitAuthor, LocalRepository, SmartHttpPusher};
use github_app_bot::{ApiClient, AppIdentity, AuthStrategy, AuthenticatingTransport, PrivateKey};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// GitHub App Demo Bot
#[derive(Parser, Debug)]
#[command(name = "github-app-bot")]
#[command(about = "Demo bot authenticating as a GitHub App installation")]
#[command(version)]
struct Cli {
    /// Config file (default is $HOME/.github-app-bot.yaml)
    #[arg(long, global = true, env = "PUREBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info", env = "PUREBOT_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a repository, commit a file and push it
    Run {
        /// GitHub App ID
        #[arg(long, env = "PUREBOT_GITHUB_APP_ID")]
        github_app_id: Option<u64>,

        /// GitHub App installation ID
        #[arg(long, env = "PUREBOT_GITHUB_APP_INSTALLATION_ID")]
        github_app_installation_id: Option<u64>,

        /// Path to the GitHub App private key PEM file
        #[arg(long, env = "PUREBOT_GITHUB_APP_PRIVATE_KEY")]
        github_app_private_key: Option<PathBuf>,

        /// Organisation that owns the new repository
        #[arg(long, env = "PUREBOT_ORG")]
        org: Option<String>,

        /// Name of the repository to create
        #[arg(long, env = "PUREBOT_REPOSITORY")]
        repository: Option<String>,

        /// Local working directory for the clone
        #[arg(long, env = "PUREBOT_WORKDIR")]
        workdir: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

async fn run(config: BotConfig) -> Result<()> {
    let app = &config.github_app;
    let demo = &config.demo;

    let identity = AppIdentity::new(app.app_id, app.installation_id)?;
    let key_file = app
        .private_key_file
        .as_ref()
        .context("GitHub app private key file is required")?;
    let key = PrivateKey::from_file(key_file).context("Failed to load GitHub app private key")?;

    // One HTTP client shared by both transports
    let http = Arc::new(
        reqwest::Client::builder()
            .user_agent(concat!("github-app-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?,
    );

    let api_transport = AuthenticatingTransport::with_key(
        http.clone(),
        identity,
        key.clone(),
        AuthStrategy::ApiBearer,
    )
    .with_base_url(&app.app_base_url);
    let git_transport =
        AuthenticatingTransport::with_key(http, identity, key, AuthStrategy::GitBasic)
            .with_base_url(&app.app_base_url);

    let api = ApiClient::with_base_url(api_transport, &app.api_base_url);
    let repository = api
        .create_org_repository(&demo.org, &demo.repository)
        .await
        .context("Failed to create github repo")?;

    let local = LocalRepository::init(&demo.workdir)?;
    local
        .write_and_stage(&demo.file_name, demo.file_contents.as_bytes())
        .context("Failed to add new file")?;
    let author = CommitAuthor {
        name: demo.author_name.clone(),
        email: demo.author_email.clone(),
    };
    local
        .commit(&demo.commit_message, &author)
        .context("Failed to commit file")?;

    let pusher = SmartHttpPusher::new(git_transport);
    pusher
        .push_head(&local, &repository.clone_url)
        .await
        .context("Failed to push")?;

    info!(repository = %repository.full_name, "Demo commit pushed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Build info");

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut config = BotConfig::load(cli.config.as_deref(), home.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            github_app_id,
            github_app_installation_id,
            github_app_private_key,
            org,
            repository,
            workdir,
        } => {
            config.apply(ConfigOverrides {
                app_id: github_app_id,
                installation_id: github_app_installation_id,
                private_key_file: github_app_private_key,
                org,
                repository,
                workdir,
            });
            async {
                config.validate()?;
                run(config).await
            }
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %format!("{:#}", e), "Command failed");
        std::process::exit(1);
    }

    Ok(())
}
