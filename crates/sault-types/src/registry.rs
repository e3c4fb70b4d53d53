//! Persisted registry document and user/host links.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Host, User};

/// Grants a user access to accounts on one host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Link {
    /// Every account of the host, present and future.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Link {
    pub fn allows(&self, account: &str) -> bool {
        self.all || self.accounts.iter().any(|a| a == account)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.accounts.is_empty()
    }
}

/// Everything the registry persists, laid out the way the `.reg` file stores it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryData {
    pub time_updated: DateTime<Utc>,
    /// Users keyed by ID.
    #[serde(default)]
    pub user: BTreeMap<String, User>,
    /// Hosts keyed by ID.
    #[serde(default)]
    pub host: BTreeMap<String, Host>,
    /// host ID -> user ID -> link
    #[serde(default)]
    pub links: BTreeMap<String, BTreeMap<String, Link>>,
}

impl RegistryData {
    pub fn link(&self, user_id: &str, host_id: &str) -> Option<&Link> {
        self.links.get(host_id).and_then(|users| users.get(user_id))
    }

    /// All links of one user, keyed by host ID.
    pub fn links_of_user(&self, user_id: &str) -> BTreeMap<String, Link> {
        self.links
            .iter()
            .filter_map(|(host_id, users)| users.get(user_id).map(|link| (host_id.clone(), link.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_document_uses_pascal_case_keys() {
        let mut data = RegistryData::default();
        data.user.insert("alice".into(), User::new("alice", "ssh-ed25519 AAAA"));
        data.host
            .insert("web1".into(), Host::new("web1", "10.0.0.5", 22, vec!["ubuntu".into()]));
        data.links.entry("web1".into()).or_default().insert(
            "alice".into(),
            Link {
                all: false,
                accounts: vec!["ubuntu".into()],
            },
        );

        let text = toml::to_string(&data).expect("serialize");
        assert!(text.contains("TimeUpdated"));
        assert!(text.contains("[User.alice]"));
        assert!(text.contains("[Host.web1]"));
        assert!(text.contains("[Links.web1.alice]"));

        let parsed: RegistryData = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, data);
    }

    #[test]
    fn link_lookup_by_user() {
        let mut data = RegistryData::default();
        data.links.entry("web1".into()).or_default().insert(
            "alice".into(),
            Link {
                all: true,
                accounts: vec![],
            },
        );
        assert!(data.link("alice", "web1").is_some_and(|l| l.allows("root")));
        assert!(data.link("bob", "web1").is_none());
        assert_eq!(data.links_of_user("alice").len(), 1);
    }
}
