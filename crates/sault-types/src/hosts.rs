//! Host registry entities.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A backend SSH server reachable through sault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Host {
    /// Identifier used in login names (`account+ID`).
    #[serde(rename = "ID")]
    pub id: String,
    /// DNS name or IP address of the backend.
    pub host_name: String,
    pub port: u16,
    /// Accounts users may request on this host.
    #[serde(default)]
    pub accounts: Vec<String>,
    pub is_active: bool,
    /// OpenSSH private key used instead of the global client key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_private_key: Option<String>,
    pub time_added: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl Host {
    pub fn new(id: impl Into<String>, host_name: impl Into<String>, port: u16, accounts: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            host_name: host_name.into(),
            port,
            accounts,
            is_active: true,
            client_private_key: None,
            time_added: now,
            time_updated: now,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host_name.contains(':') {
            format!("[{}]:{}", self.host_name, self.port)
        } else {
            format!("{}:{}", self.host_name, self.port)
        }
    }

    pub fn has_account(&self, account: &str) -> bool {
        self.accounts.iter().any(|a| a == account)
    }

    /// Copy without key material, for responses sent to clients.
    pub fn redacted(&self) -> Host {
        Host {
            client_private_key: None,
            ..self.clone()
        }
    }

    pub fn touch(&mut self) {
        self.time_updated = Utc::now();
    }
}

/// Lookup filter for hosts; `None` matches anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFilter {
    pub active: Option<bool>,
}

impl HostFilter {
    pub const ANY: HostFilter = HostFilter { active: None };
    pub const ACTIVE: HostFilter = HostFilter { active: Some(true) };

    pub fn matches(&self, host: &Host) -> bool {
        self.active.is_none_or(|active| host.is_active == active)
    }
}
