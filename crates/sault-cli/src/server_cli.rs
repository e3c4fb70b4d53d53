use std::path::Path;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use server_core::setup;
use tracing::info;

use crate::GlobalArgs;

#[derive(Debug, Subcommand)]
pub enum ServerCmd {
    /// Serve until Ctrl-C
    Run,
    /// Create sault.conf, the host and client keys and an empty registry
    Init,
    /// Print local server files
    Print {
        #[arg(value_enum)]
        what: PrintTarget,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrintTarget {
    /// Public key sault presents to hosts, for their authorized_keys
    Clientkey,
    /// The effective configuration
    Config,
    /// The registry as TOML
    Registry,
}

pub async fn run(global: &GlobalArgs, cmd: ServerCmd) -> Result<()> {
    let dir = global.config_dir()?;
    match cmd {
        ServerCmd::Run => {
            let config = setup::load_config(&dir)
                .with_context(|| format!("cannot load {}; run `sault server init` first", setup::config_path(&dir).display()))?;
            server_core::run_server(&config).await?;
        }
        ServerCmd::Init => {
            let config = setup::init_config_dir(&dir).await?;
            info!(dir = %dir.display(), "config directory ready");
            println!("config: {}", setup::config_path(&dir).display());
            println!("client key (add to each host's authorized_keys):");
            println!("{}", setup::client_public_key(&config)?);
        }
        ServerCmd::Print { what } => println!("{}", print(&dir, what).await?.trim_end()),
    }
    Ok(())
}

/// Text of `sault server print <what>`.
pub async fn print(dir: &Path, what: PrintTarget) -> Result<String> {
    let config = setup::load_config(dir)?;
    Ok(match what {
        PrintTarget::Clientkey => setup::client_public_key(&config)?,
        PrintTarget::Config => config.to_toml_string()?,
        PrintTarget::Registry => setup::registry_text(&config).await?,
    })
}

/// `sault init <admin-id> <public-key-file>`.
pub async fn init(global: &GlobalArgs, admin_id: &str, public_key_file: &Path) -> Result<()> {
    let dir = global.config_dir()?;
    let public_key = std::fs::read_to_string(public_key_file)
        .with_context(|| format!("cannot read {}", public_key_file.display()))?;
    let user = setup::init_with_admin(&dir, admin_id, public_key.trim()).await?;
    println!("admin user '{}' created in {}", user.id, dir.display());
    Ok(())
}
