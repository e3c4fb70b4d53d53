//! Command line front end of sault.
//!
//! `server` subcommands and `init` work on the local config directory; `user`, `host` and
//! `version` talk to a running server over a control session (`--at`, `--identity`).

pub mod client_cli;
pub mod server_cli;

use std::{
    fs::OpenOptions, path::PathBuf, sync::Mutex
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use client_cli::{HostCmd, UserCmd};
use server_cli::ServerCmd;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

pub const CONFIG_DIR_NAME: &str = ".sault";

#[derive(Debug, Parser)]
#[command(name = "sault", about = "SSH bastion that relays users to hosts by key and link")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Config directory (defaults to ~/.sault)
    #[arg(long = "config-dir", global = true, env = "SAULT_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long = "log-level", global = true, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,
    /// Log line format
    #[arg(long = "log-format", global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    /// Where logs go: stderr, stdout or a file path
    #[arg(long = "log-output", global = true, default_value = "stderr", value_name = "OUTPUT")]
    pub log_output: String,
    /// sault server to manage, as [name@]host[:port]
    #[arg(long, global = true, env = "SAULT_AT", default_value = "localhost", help_heading = "Client Options")]
    pub at: String,
    /// Private key of an admin user (defaults to ~/.ssh/id_ed25519)
    #[arg(short = 'i', long, global = true, value_name = "KEY", help_heading = "Client Options")]
    pub identity: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run and set up the sault server
    Server {
        #[command(subcommand)]
        cmd: ServerCmd,
    },
    /// Manage users and their links to hosts
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
    /// Manage hosts
    Host {
        #[command(subcommand)]
        cmd: HostCmd,
    },
    /// Print the version
    Version,
    /// Initialize the config directory and register the first admin user
    Init {
        /// ID of the admin user
        admin_id: String,
        /// File holding the admin's public key
        public_key_file: PathBuf,
    },
}

impl GlobalArgs {
    pub fn config_dir(&self) -> Result<PathBuf> {
        match &self.config_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .context("cannot find the home directory; pass --config-dir")?
                .join(CONFIG_DIR_NAME)),
        }
    }

    pub fn identity(&self) -> Result<PathBuf> {
        match &self.identity {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::home_dir()
                .context("cannot find the home directory; pass --identity")?
                .join(".ssh")
                .join("id_ed25519")),
        }
    }
}

/// Install the global tracing subscriber from the log flags.
pub fn init_tracing(args: &GlobalArgs) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level).with_context(|| format!("invalid log level '{}'", args.log_level))?,
    };
    let (writer, ansi) = match args.log_output.as_str() {
        "stderr" => (BoxMakeWriter::new(std::io::stderr), true),
        "stdout" => (BoxMakeWriter::new(std::io::stdout), true),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(writer);
    let _ = match args.log_format {
        LogFormat::Text => builder.with_ansi(ansi).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Command::Server { cmd } => server_cli::run(&cli.global, cmd).await,
        Command::Init {
            admin_id,
            public_key_file,
        } => server_cli::init(&cli.global, &admin_id, &public_key_file).await,
        Command::User { cmd } => client_cli::run_user(&cli.global, cmd).await,
        Command::Host { cmd } => client_cli::run_host(&cli.global, cmd).await,
        Command::Version => {
            println!("sault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Print `err` with its remedy hint, if the error carries one.
pub fn report_error(err: &anyhow::Error) {
    use ansi_term::Colour::{Red, Yellow};

    eprintln!("{} {err:#}", Red.bold().paint("error:"));
    let hint = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<client_core::ClientError>())
        .and_then(|e| e.hint());
    if let Some(hint) = hint {
        eprintln!("{} {hint}", Yellow.paint("hint:"));
    }
}
