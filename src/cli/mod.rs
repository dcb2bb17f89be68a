//! CLI module for the taskboard command-line interface.
//!
//! Without a subcommand the binary runs the HTTP server. Subcommands work
//! directly on the configured database:
//! - `seed-users` - Create the demo admin, manager and member accounts
//! - `create-user` - Add a single account
//! - `purge-sessions` - Delete expired sessions
//! - `config check` - Validate configuration file

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::api::validation::{normalize_email, parse_role, validate_password, validate_username};
use crate::config::Config;
use crate::db::{self, NewUser, SeedOutcome};
use crate::session::{hash_password, SessionStore, SqliteSessionStore};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "taskboard")]
#[command(author, version, about = "A small role-based task management backend", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TASKBOARD_CONFIG", default_value = "taskboard.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create demo users (admin/admin123, manager/manager123, member/member123)
    SeedUsers,

    /// Create a user account
    CreateUser {
        #[arg(short, long)]
        username: String,
        /// Password (can also be set via TASKBOARD_PASSWORD env var)
        #[arg(short, long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
        password: String,
        /// Admin, Manager or Member
        #[arg(short, long, default_value = "Member")]
        role: String,
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Delete expired sessions
    PurgeSessions,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a CLI subcommand
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::SeedUsers) => cmd_seed_users(config).await,
        Some(Commands::CreateUser {
            username,
            password,
            role,
            email,
        }) => cmd_create_user(config, username, password, role, email.clone()).await,
        Some(Commands::PurgeSessions) => cmd_purge_sessions(config).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

/// Ensure the bootstrap admin from `[auth]` exists. The account must pass the
/// same username and password rules as `create-user`.
pub async fn bootstrap_admin(pool: &db::DbPool, config: &Config) -> Result<()> {
    let (Some(username), Some(password)) =
        (&config.auth.admin_username, &config.auth.admin_password)
    else {
        return Ok(());
    };

    validate_username(username).map_err(|e| anyhow!("auth.admin_username: {}", e))?;
    validate_password(password, config.auth.min_password_length)
        .map_err(|e| anyhow!("auth.admin_password: {}", e))?;

    db::ensure_admin_user(pool, username, password).await?;
    Ok(())
}

async fn open_db(config: &Config) -> Result<db::DbPool> {
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;
    db::init(&config.server.data_dir).await
}

async fn cmd_seed_users(config: &Config) -> Result<()> {
    let pool = open_db(config).await?;

    for outcome in db::seed_demo_users(&pool).await? {
        match outcome {
            SeedOutcome::Created(username) => println!("[OK] Created user {}", username),
            SeedOutcome::Existing(username) => {
                println!("[--] User {} already exists, left unchanged", username)
            }
        }
    }
    Ok(())
}

async fn cmd_create_user(
    config: &Config,
    username: &str,
    password: &str,
    role: &str,
    email: Option<String>,
) -> Result<()> {
    validate_username(username).map_err(anyhow::Error::msg)?;
    validate_password(password, config.auth.min_password_length).map_err(anyhow::Error::msg)?;
    let role = parse_role(role).map_err(anyhow::Error::msg)?;
    let email = normalize_email(email).map_err(anyhow::Error::msg)?;

    let pool = open_db(config).await?;
    if db::username_taken(&pool, username, None).await? {
        bail!("A user named {} already exists", username);
    }

    let user = db::insert_user(
        &pool,
        NewUser {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            email,
            role,
            is_active: true,
        },
    )
    .await
    .context("Failed to create user")?;

    println!("[OK] Created {} {} (id {})", user.role(), user.username, user.id);
    Ok(())
}

async fn cmd_purge_sessions(config: &Config) -> Result<()> {
    let pool = open_db(config).await?;
    let removed = SqliteSessionStore::new(pool)
        .purge_expired(Utc::now())
        .await
        .context("Failed to purge sessions")?;

    println!("[OK] Removed {} expired session(s)", removed);
    Ok(())
}

/// Validate configuration file
fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    let config = Config::load(config_path)?;

    println!("[OK] Configuration file is valid!");
    println!();
    println!("=== Configuration Summary ===");
    println!();
    println!("Server:");
    println!("  Listen:       {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!();
    println!("Sessions:");
    println!(
        "  TTL:          {}s (allowed 1..={}s)",
        config.auth.session_ttl_secs,
        crate::config::MAX_SESSION_TTL_SECS
    );
    println!(
        "  Sliding:      {}",
        if config.auth.sliding_sessions {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    println!(
        "  Secret Key:   {}",
        if config.auth.secret_key.is_some() {
            "Configured"
        } else {
            "Not set (random per process, CSRF tokens reset on restart)"
        }
    );
    println!();
    println!("Cookies:");
    println!(
        "  Names:        {} / {}",
        config.cookies.session_name, config.cookies.csrf_name
    );
    println!("  Secure:       {}", config.cookies.secure);
    println!("  SameSite:     {:?}", config.cookies.same_site);
    println!();
    println!("CORS Origins:   {}", config.cors.allowed_origins.join(", "));

    Ok(())
}
