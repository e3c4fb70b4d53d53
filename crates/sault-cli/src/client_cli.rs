use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Subcommand};
use client_core::{SaultClient, ServerTarget, inject_client_key, load_identity, prompt_for_secret};
use sault_types::{
    commands::{
        CommandRequest, DEFAULT_HOST_PORT, HostActiveRequest, HostAddRequest, HostAliveRequest, HostListRequest, HostRemoveRequest, HostUpdateRequest, UserActiveRequest, UserAddRequest, UserAdminRequest, UserLinkRequest, UserListRequest, UserRemoveRequest, UserUpdateRequest
    }, validation::parse_host_address
};
use serde_json::Value;

use crate::GlobalArgs;

#[derive(Debug, Subcommand)]
pub enum UserCmd {
    /// Register a user with their public key
    Add {
        id: String,
        /// File holding the user's public key
        public_key_file: PathBuf,
    },
    /// Remove a user and their links
    Remove { id: String },
    /// Rename a user or replace their public key
    Update {
        id: String,
        /// New user ID
        #[arg(long = "id", value_name = "NEW_ID")]
        new_id: Option<String>,
        /// File holding the new public key
        #[arg(long = "key", value_name = "FILE")]
        public_key_file: Option<PathBuf>,
    },
    /// List users with their links
    List {
        #[command(flatten)]
        active: ActiveFilter,
        /// Only admins
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "users")]
        admins: bool,
        /// Only non-admin users
        #[arg(long, action = ArgAction::SetTrue)]
        users: bool,
    },
    /// Allow (or with --unlink, revoke) a user's access to host accounts
    Link {
        user_id: String,
        host_id: String,
        accounts: Vec<String>,
        /// Every account of the host, including ones added later
        #[arg(long, action = ArgAction::SetTrue)]
        all: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        unlink: bool,
    },
    /// Grant or revoke admin rights
    Admin {
        id: String,
        #[arg(action = ArgAction::Set)]
        admin: bool,
    },
    /// Activate or deactivate a user
    Active {
        id: String,
        #[arg(action = ArgAction::Set)]
        active: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum HostCmd {
    /// Register a host; its connectivity is tested first
    Add {
        id: String,
        /// host[:port] (port defaults to 22)
        address: String,
        /// Accounts users may log in as
        #[arg(required = true)]
        accounts: Vec<String>,
        /// Register the host as inactive
        #[arg(long, action = ArgAction::SetTrue)]
        inactive: bool,
        /// Private key sault uses for this host instead of its global client key
        #[arg(long = "key", value_name = "FILE")]
        client_key_file: Option<PathBuf>,
        #[command(flatten)]
        test: TestOptions,
    },
    /// Remove a host and every link to it
    Remove { id: String },
    /// Change a host
    Update {
        id: String,
        #[arg(long = "id", value_name = "NEW_ID")]
        new_id: Option<String>,
        /// host[:port]
        #[arg(long)]
        address: Option<String>,
        /// Comma separated account list replacing the current one
        #[arg(long, value_delimiter = ',')]
        accounts: Option<Vec<String>>,
        #[arg(long = "key", value_name = "FILE")]
        client_key_file: Option<PathBuf>,
        #[command(flatten)]
        test: TestOptions,
    },
    /// List hosts
    List {
        #[command(flatten)]
        active: ActiveFilter,
    },
    /// Activate or deactivate a host
    Active {
        id: String,
        #[arg(action = ArgAction::Set)]
        active: bool,
    },
    /// Check that hosts accept sault's key (all hosts when none given)
    Alive { ids: Vec<String> },
    /// Install sault's client key on a host using an account password
    Inject {
        id: String,
        /// Account to log in as (defaults to the host's first account)
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ActiveFilter {
    /// Only active entries
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "inactive")]
    pub active: bool,
    /// Only inactive entries
    #[arg(long, action = ArgAction::SetTrue)]
    pub inactive: bool,
}

impl ActiveFilter {
    fn get(&self) -> Option<bool> {
        tri_state(self.active, self.inactive)
    }
}

#[derive(Debug, Args)]
pub struct TestOptions {
    /// Save even if the connectivity test fails
    #[arg(long, action = ArgAction::SetTrue)]
    pub force: bool,
    /// Do not test connectivity
    #[arg(long = "skiptest", action = ArgAction::SetTrue)]
    pub skip_test: bool,
}

fn tri_state(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text.trim().to_string())
}

async fn connect(global: &GlobalArgs) -> Result<SaultClient> {
    let target = ServerTarget::parse(&global.at)?;
    let identity = global.identity()?;
    let key = load_identity(&identity)
        .await
        .with_context(|| format!("cannot load identity {}", identity.display()))?;
    Ok(SaultClient::connect(&target, key).await?)
}

/// Send one request and print its response.
async fn send<R: CommandRequest>(global: &GlobalArgs, request: R) -> Result<()> {
    let client = connect(global).await?;
    let response = client.request(&request).await?;
    print_response(&serde_json::to_value(&response)?)?;
    let _ = client.disconnect().await;
    Ok(())
}

fn print_response(value: &Value) -> Result<()> {
    match value {
        Value::Null => println!("{}", ansi_term::Colour::Green.paint("done")),
        Value::String(text) => println!("{}", text.trim_end()),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

pub fn user_request(cmd: UserCmd) -> Result<UserRequest> {
    Ok(match cmd {
        UserCmd::Add { id, public_key_file } => UserRequest::Add(UserAddRequest {
            id,
            public_key: read_trimmed(&public_key_file)?,
        }),
        UserCmd::Remove { id } => UserRequest::Remove(UserRemoveRequest { id }),
        UserCmd::Update {
            id,
            new_id,
            public_key_file,
        } => {
            if new_id.is_none() && public_key_file.is_none() {
                bail!("nothing to update; pass --id or --key");
            }
            UserRequest::Update(UserUpdateRequest {
                id,
                new_id,
                public_key: public_key_file.as_deref().map(read_trimmed).transpose()?,
            })
        }
        UserCmd::List { active, admins, users } => UserRequest::List(UserListRequest {
            active: active.get(),
            admin: tri_state(admins, users),
        }),
        UserCmd::Link {
            user_id,
            host_id,
            accounts,
            all,
            unlink,
        } => {
            if accounts.is_empty() && !all {
                bail!("name at least one account or pass --all");
            }
            UserRequest::Link(UserLinkRequest {
                user_id,
                host_id,
                accounts,
                all,
                unlink,
            })
        }
        UserCmd::Admin { id, admin } => UserRequest::Admin(UserAdminRequest { id, admin }),
        UserCmd::Active { id, active } => UserRequest::Active(UserActiveRequest { id, active }),
    })
}

/// A parsed `sault user ...` invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum UserRequest {
    Add(UserAddRequest),
    Remove(UserRemoveRequest),
    Update(UserUpdateRequest),
    List(UserListRequest),
    Link(UserLinkRequest),
    Admin(UserAdminRequest),
    Active(UserActiveRequest),
}

pub async fn run_user(global: &GlobalArgs, cmd: UserCmd) -> Result<()> {
    match user_request(cmd)? {
        UserRequest::Add(req) => send(global, req).await,
        UserRequest::Remove(req) => send(global, req).await,
        UserRequest::Update(req) => send(global, req).await,
        UserRequest::List(req) => send(global, req).await,
        UserRequest::Link(req) => send(global, req).await,
        UserRequest::Admin(req) => send(global, req).await,
        UserRequest::Active(req) => send(global, req).await,
    }
}

/// A parsed `sault host ...` invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum HostRequest {
    Add(HostAddRequest),
    Remove(HostRemoveRequest),
    Update(HostUpdateRequest),
    List(HostListRequest),
    Active(HostActiveRequest),
    Alive(HostAliveRequest),
    Inject { id: String, account: Option<String> },
}

pub fn host_request(cmd: HostCmd) -> Result<HostRequest> {
    Ok(match cmd {
        HostCmd::Add {
            id,
            address,
            accounts,
            inactive,
            client_key_file,
            test,
        } => {
            let (host_name, port) = parse_host_address(&address, DEFAULT_HOST_PORT)?;
            HostRequest::Add(HostAddRequest {
                id,
                host_name,
                port,
                accounts,
                is_active: !inactive,
                client_private_key: client_key_file.as_deref().map(read_trimmed).transpose()?,
                force: test.force,
                skip_test: test.skip_test,
            })
        }
        HostCmd::Remove { id } => HostRequest::Remove(HostRemoveRequest { id }),
        HostCmd::Update {
            id,
            new_id,
            address,
            accounts,
            client_key_file,
            test,
        } => {
            let (host_name, port) = match address {
                Some(address) => {
                    let (host, port) = parse_host_address(&address, DEFAULT_HOST_PORT)?;
                    (Some(host), Some(port))
                }
                None => (None, None),
            };
            HostRequest::Update(HostUpdateRequest {
                id,
                new_id,
                host_name,
                port,
                accounts,
                client_private_key: client_key_file.as_deref().map(read_trimmed).transpose()?,
                force: test.force,
                skip_test: test.skip_test,
            })
        }
        HostCmd::List { active } => HostRequest::List(HostListRequest { active: active.get() }),
        HostCmd::Active { id, active } => HostRequest::Active(HostActiveRequest { id, active }),
        HostCmd::Alive { ids } => HostRequest::Alive(HostAliveRequest { ids }),
        HostCmd::Inject { id, account } => HostRequest::Inject { id, account },
    })
}

pub async fn run_host(global: &GlobalArgs, cmd: HostCmd) -> Result<()> {
    match host_request(cmd)? {
        HostRequest::Add(req) => send(global, req).await,
        HostRequest::Remove(req) => send(global, req).await,
        HostRequest::Update(req) => send(global, req).await,
        HostRequest::List(req) => send(global, req).await,
        HostRequest::Active(req) => send(global, req).await,
        HostRequest::Alive(req) => send(global, req).await,
        HostRequest::Inject { id, account } => {
            let client = connect(global).await?;
            let prompt = match &account {
                Some(account) => format!("Password for {account}@{id}: "),
                None => format!("Password for the first account of {id}: "),
            };
            let password = prompt_for_secret(&prompt).await?;
            let outcome = inject_client_key(&client, &id, account.as_deref(), password).await?;
            if outcome.added {
                println!("client key added for {}@{}", outcome.account, outcome.host_id);
            } else {
                println!("client key already present for {}@{}", outcome.account, outcome.host_id);
            }
            let _ = client.disconnect().await;
            Ok(())
        }
    }
}
