//! Typed administrative commands.
//!
//! Each request type names the command it drives and the response it expects, so the client
//! side (`client-core`) and the server side (`server-core`) agree on one definition.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{ErrorType, Host, Link, User, validation::parse_host_address};

/// Default SSH port assumed for hosts added without one.
pub const DEFAULT_HOST_PORT: u16 = 22;

/// A request that can be sent over a control session.
pub trait CommandRequest: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name looked up in the server's command table.
    const NAME: &'static str;

    /// Self-service commands may be run by non-admin users.
    const SELF_SERVICE: bool = false;

    type Response: Serialize + DeserializeOwned + Send + 'static;

    /// Build the request from argv tokens sent by a native OpenSSH client.
    fn from_native(args: &NativeArgs) -> Result<Self, String>;
}

/// Argv of a native command: positionals plus `--flag` and `--key=value` options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeArgs {
    pub positional: Vec<String>,
    pub options: BTreeMap<String, Option<String>>,
}

impl NativeArgs {
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Self {
        let mut args = NativeArgs::default();
        for token in tokens {
            let token = token.as_ref();
            match token.strip_prefix("--").or_else(|| token.strip_prefix('-')) {
                Some(option) if !option.is_empty() => match option.split_once('=') {
                    Some((key, value)) => {
                        args.options.insert(key.to_string(), Some(value.to_string()));
                    }
                    None => {
                        args.options.insert(option.to_string(), None);
                    }
                },
                _ => args.positional.push(token.to_string()),
            }
        }
        args
    }

    pub fn required(&self, index: usize, what: &str) -> Result<String, String> {
        self.positional
            .get(index)
            .cloned()
            .ok_or_else(|| format!("missing {what}"))
    }

    /// Positionals from `index` on, joined with single spaces (public keys contain spaces).
    pub fn joined_from(&self, index: usize) -> Option<String> {
        let rest = self.positional.get(index..)?;
        (!rest.is_empty()).then(|| rest.join(" "))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(|v| v.as_deref())
    }

    /// `--active` / `--inactive` style tri-state filters.
    pub fn tri_state(&self, yes: &str, no: &str) -> Option<bool> {
        match (self.flag(yes), self.flag(no)) {
            (true, false) => Some(true),
            (false, true) => Some(false),
            _ => None,
        }
    }
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WhoamiRequest {}

impl CommandRequest for WhoamiRequest {
    const NAME: &'static str = "whoami";
    const SELF_SERVICE: bool = true;
    type Response = User;

    fn from_native(_args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {})
    }
}

/// Replace the caller's own public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicKeyRequest {
    pub public_key: String,
}

impl CommandRequest for PublicKeyRequest {
    const NAME: &'static str = "publickey";
    const SELF_SERVICE: bool = true;
    type Response = User;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            public_key: args.joined_from(0).ok_or("missing public key")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAddRequest {
    #[serde(rename = "ID")]
    pub id: String,
    pub public_key: String,
}

impl CommandRequest for UserAddRequest {
    const NAME: &'static str = "user.add";
    type Response = User;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "user ID")?,
            public_key: args.joined_from(1).ok_or("missing public key")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRemoveRequest {
    #[serde(rename = "ID")]
    pub id: String,
}

impl CommandRequest for UserRemoveRequest {
    const NAME: &'static str = "user.remove";
    type Response = ();

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "user ID")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserUpdateRequest {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NewID")]
    pub new_id: Option<String>,
    pub public_key: Option<String>,
}

impl CommandRequest for UserUpdateRequest {
    const NAME: &'static str = "user.update";
    type Response = User;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "user ID")?,
            new_id: args.value("id").map(str::to_string),
            public_key: args.joined_from(1),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserListRequest {
    pub active: Option<bool>,
    pub admin: Option<bool>,
}

/// One row of `user.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserEntry {
    pub user: User,
    /// Links keyed by host ID.
    pub links: BTreeMap<String, Link>,
}

impl CommandRequest for UserListRequest {
    const NAME: &'static str = "user.list";
    type Response = Vec<UserEntry>;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            active: args.tri_state("active", "inactive"),
            admin: args.tri_state("admin", "user"),
        })
    }
}

/// Link or unlink accounts; `all` applies to every account of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserLinkRequest {
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "HostID")]
    pub host_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub unlink: bool,
}

/// Link state after a `user.link` request; `None` when nothing is linked anymore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinkState {
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "HostID")]
    pub host_id: String,
    pub link: Option<Link>,
}

impl CommandRequest for UserLinkRequest {
    const NAME: &'static str = "user.link";
    type Response = LinkState;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            user_id: args.required(0, "user ID")?,
            host_id: args.required(1, "host ID")?,
            accounts: args.positional.iter().skip(2).cloned().collect(),
            all: args.flag("all"),
            unlink: args.flag("unlink"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAdminRequest {
    #[serde(rename = "ID")]
    pub id: String,
    pub admin: bool,
}

impl CommandRequest for UserAdminRequest {
    const NAME: &'static str = "user.admin";
    type Response = User;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "user ID")?,
            admin: parse_bool(&args.required(1, "true or false")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserActiveRequest {
    #[serde(rename = "ID")]
    pub id: String,
    pub active: bool,
}

impl CommandRequest for UserActiveRequest {
    const NAME: &'static str = "user.active";
    type Response = User;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "user ID")?,
            active: parse_bool(&args.required(1, "true or false")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostAddRequest {
    #[serde(rename = "ID")]
    pub id: String,
    pub host_name: String,
    pub port: u16,
    pub accounts: Vec<String>,
    pub is_active: bool,
    #[serde(default)]
    pub client_private_key: Option<String>,
    /// Keep the host even if the connectivity test fails.
    #[serde(default)]
    pub force: bool,
    /// Do not run the connectivity test at all.
    #[serde(default)]
    pub skip_test: bool,
}

impl CommandRequest for HostAddRequest {
    const NAME: &'static str = "host.add";
    type Response = Host;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        let (host_name, port) =
            parse_host_address(&args.required(1, "address")?, DEFAULT_HOST_PORT).map_err(|e| e.to_string())?;
        Ok(Self {
            id: args.required(0, "host ID")?,
            host_name,
            port,
            accounts: args.positional.iter().skip(2).cloned().collect(),
            is_active: !args.flag("inactive"),
            client_private_key: None,
            force: args.flag("force"),
            skip_test: args.flag("skiptest"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostRemoveRequest {
    #[serde(rename = "ID")]
    pub id: String,
}

impl CommandRequest for HostRemoveRequest {
    const NAME: &'static str = "host.remove";
    type Response = ();

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "host ID")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostUpdateRequest {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NewID")]
    pub new_id: Option<String>,
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub accounts: Option<Vec<String>>,
    pub client_private_key: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub skip_test: bool,
}

impl CommandRequest for HostUpdateRequest {
    const NAME: &'static str = "host.update";
    type Response = Host;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        let (host_name, port) = match args.value("address") {
            Some(address) => {
                let (host, port) = parse_host_address(address, DEFAULT_HOST_PORT).map_err(|e| e.to_string())?;
                (Some(host), Some(port))
            }
            None => (None, None),
        };
        Ok(Self {
            id: args.required(0, "host ID")?,
            new_id: args.value("id").map(str::to_string),
            host_name,
            port,
            accounts: args.value("accounts").map(split_list),
            client_private_key: None,
            force: args.flag("force"),
            skip_test: args.flag("skiptest"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostListRequest {
    pub active: Option<bool>,
}

impl CommandRequest for HostListRequest {
    const NAME: &'static str = "host.list";
    type Response = Vec<Host>;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            active: args.tri_state("active", "inactive"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostActiveRequest {
    #[serde(rename = "ID")]
    pub id: String,
    pub active: bool,
}

impl CommandRequest for HostActiveRequest {
    const NAME: &'static str = "host.active";
    type Response = Host;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "host ID")?,
            active: parse_bool(&args.required(1, "true or false")?)?,
        })
    }
}

/// Reachability check; an empty `ids` checks every host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostAliveRequest {
    #[serde(rename = "IDs")]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostAlive {
    #[serde(rename = "ID")]
    pub id: String,
    pub alive: bool,
    pub error_type: Option<ErrorType>,
    pub error: Option<String>,
}

impl CommandRequest for HostAliveRequest {
    const NAME: &'static str = "host.alive";
    type Response = Vec<HostAlive>;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            ids: args.positional.clone(),
        })
    }
}

/// Where a host lives and which key sault presents to it, used by `host inject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostClientKeyRequest {
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostClientKey {
    #[serde(rename = "ID")]
    pub id: String,
    pub host_name: String,
    pub port: u16,
    pub accounts: Vec<String>,
    /// OpenSSH public key line to append to `authorized_keys`.
    pub public_key: String,
}

impl CommandRequest for HostClientKeyRequest {
    const NAME: &'static str = "host.clientkey";
    type Response = HostClientKey;

    fn from_native(args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {
            id: args.required(0, "host ID")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerRegistryRequest {}

impl CommandRequest for ServerRegistryRequest {
    const NAME: &'static str = "server.registry";
    /// TOML text of the registry.
    type Response = String;

    fn from_native(_args: &NativeArgs) -> Result<Self, String> {
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_args_split_flags_and_values() {
        let args = NativeArgs::parse(&["web1", "--force", "--accounts=ubuntu,root", "-skiptest", "10.0.0.5:22"]);
        assert_eq!(args.positional, vec!["web1", "10.0.0.5:22"]);
        assert!(args.flag("force"));
        assert!(args.flag("skiptest"));
        assert_eq!(args.value("accounts"), Some("ubuntu,root"));
        assert_eq!(args.value("force"), None);
    }

    #[test]
    fn native_user_add_joins_key_tokens() {
        let args = NativeArgs::parse(&["alice", "ssh-ed25519", "AAAAC3Nza", "alice@laptop"]);
        let req = UserAddRequest::from_native(&args).unwrap();
        assert_eq!(req.id, "alice");
        assert_eq!(req.public_key, "ssh-ed25519 AAAAC3Nza alice@laptop");

        let err = UserAddRequest::from_native(&NativeArgs::parse(&["alice"])).unwrap_err();
        assert_eq!(err, "missing public key");
    }

    #[test]
    fn native_host_add_parses_address_and_accounts() {
        let args = NativeArgs::parse(&["web1", "10.0.0.5:2200", "ubuntu", "root", "--skiptest"]);
        let req = HostAddRequest::from_native(&args).unwrap();
        assert_eq!(req.host_name, "10.0.0.5");
        assert_eq!(req.port, 2200);
        assert_eq!(req.accounts, vec!["ubuntu", "root"]);
        assert!(req.skip_test);
        assert!(!req.force);
        assert!(req.is_active);
    }

    #[test]
    fn native_host_update_reads_options() {
        let args = NativeArgs::parse(&["web1", "--id=web2", "--accounts=a, b", "--address=db:23"]);
        let req = HostUpdateRequest::from_native(&args).unwrap();
        assert_eq!(req.new_id.as_deref(), Some("web2"));
        assert_eq!(req.accounts, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(req.host_name.as_deref(), Some("db"));
        assert_eq!(req.port, Some(23));
    }

    #[test]
    fn tri_state_filters() {
        let args = NativeArgs::parse(&["--inactive"]);
        assert_eq!(UserListRequest::from_native(&args).unwrap().active, Some(false));
        assert_eq!(UserListRequest::from_native(&NativeArgs::default()).unwrap().active, None);
    }

    #[test]
    fn host_add_decodes_pascal_case_json() {
        let req: HostAddRequest =
            serde_json::from_str(r#"{"ID":"web1","HostName":"10.0.0.5","Port":22,"Accounts":["ubuntu"],"IsActive":true}"#)
                .unwrap();
        assert_eq!(req.id, "web1");
        assert_eq!(req.host_name, "10.0.0.5");
        assert_eq!(req.port, 22);
        assert_eq!(req.accounts, vec!["ubuntu"]);
        assert!(req.is_active);
        assert_eq!(req.client_private_key, None);
        assert!(!req.force && !req.skip_test);

        assert!(serde_json::from_str::<HostAddRequest>(r#"{"id":"web1","host_name":"10.0.0.5","port":22}"#).is_err());
    }

    #[test]
    fn request_keys_are_pascal_case_with_upper_ids() {
        let link = UserLinkRequest {
            user_id: "alice".into(),
            host_id: "web1".into(),
            accounts: vec!["ubuntu".into()],
            all: false,
            unlink: true,
        };
        assert_eq!(
            serde_json::to_value(&link).unwrap(),
            serde_json::json!({"UserID": "alice", "HostID": "web1", "Accounts": ["ubuntu"], "All": false, "Unlink": true})
        );

        let update: UserUpdateRequest = serde_json::from_str(r#"{"ID":"alice","NewID":"alice2"}"#).unwrap();
        assert_eq!(update.new_id.as_deref(), Some("alice2"));
        assert_eq!(update.public_key, None);

        let alive: HostAliveRequest = serde_json::from_str(r#"{"IDs":["web1","db1"]}"#).unwrap();
        assert_eq!(alive.ids, vec!["web1", "db1"]);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
