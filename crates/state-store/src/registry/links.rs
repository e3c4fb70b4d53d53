//! User to host links.

use std::collections::BTreeMap;

use sault_types::{Link, RegistryData};

use super::Registry;
use crate::{RegistryError, RegistryResult};

fn ensure_pair(data: &RegistryData, user_id: &str, host_id: &str) -> RegistryResult<()> {
    if !data.user.contains_key(user_id) {
        return Err(RegistryError::not_found("user", user_id));
    }
    if !data.host.contains_key(host_id) {
        return Err(RegistryError::not_found("host", host_id));
    }
    Ok(())
}

impl Registry {
    /// True when the account is linked explicitly or through an all-accounts link.
    pub async fn is_linked(&self, user_id: &str, host_id: &str, account: &str) -> bool {
        self.read()
            .await
            .link(user_id, host_id)
            .is_some_and(|link| link.allows(account))
    }

    pub async fn link_of(&self, user_id: &str, host_id: &str) -> Option<Link> {
        self.read().await.link(user_id, host_id).cloned()
    }

    /// Links of a user keyed by host ID.
    pub async fn links_of_user(&self, user_id: &str) -> BTreeMap<String, Link> {
        self.read().await.links_of_user(user_id)
    }

    /// Link accounts of the host to the user. Linking an already linked account is a no-op.
    pub async fn link<S: AsRef<str>>(&self, user_id: &str, host_id: &str, accounts: &[S]) -> RegistryResult<Link> {
        let mut data = self.write().await;
        ensure_pair(&data, user_id, host_id)?;
        if let Some(host) = data.host.get(host_id)
            && let Some(unknown) = accounts.iter().map(AsRef::as_ref).find(|a| !host.has_account(a))
        {
            return Err(RegistryError::UnknownAccount {
                host: host_id.to_string(),
                account: unknown.to_string(),
            });
        }

        let link = data
            .links
            .entry(host_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default();
        for account in accounts {
            let account = account.as_ref();
            if !link.accounts.iter().any(|a| a == account) {
                link.accounts.push(account.to_string());
            }
        }
        Ok(link.clone())
    }

    /// Link every account of the host, including accounts added later.
    pub async fn link_all(&self, user_id: &str, host_id: &str) -> RegistryResult<Link> {
        let mut data = self.write().await;
        ensure_pair(&data, user_id, host_id)?;
        let link = data
            .links
            .entry(host_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default();
        link.all = true;
        link.accounts.clear();
        Ok(link.clone())
    }

    /// Remove accounts from a link. An all-accounts link is narrowed to the host's remaining
    /// accounts. Returns the link left behind, if any.
    pub async fn unlink<S: AsRef<str>>(&self, user_id: &str, host_id: &str, accounts: &[S]) -> RegistryResult<Option<Link>> {
        let mut data = self.write().await;
        ensure_pair(&data, user_id, host_id)?;
        let host_accounts = data.host.get(host_id).map(|h| h.accounts.clone()).unwrap_or_default();

        let Some(users) = data.links.get_mut(host_id) else {
            return Ok(None);
        };
        let Some(link) = users.get_mut(user_id) else {
            return Ok(None);
        };
        if link.all {
            link.all = false;
            link.accounts = host_accounts;
        }
        link.accounts
            .retain(|existing| !accounts.iter().any(|a| a.as_ref() == existing));

        let remaining = (!link.is_empty()).then(|| link.clone());
        if remaining.is_none() {
            users.remove(user_id);
            if users.is_empty() {
                data.links.remove(host_id);
            }
        }
        Ok(remaining)
    }

    /// Drop the link between user and host entirely.
    pub async fn unlink_all(&self, user_id: &str, host_id: &str) -> RegistryResult<()> {
        let mut data = self.write().await;
        ensure_pair(&data, user_id, host_id)?;
        if let Some(users) = data.links.get_mut(host_id) {
            users.remove(user_id);
            if users.is_empty() {
                data.links.remove(host_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sault_types::Host;

    use crate::{Registry, RegistryError, test_support::generate_public_key};

    async fn seeded() -> Registry {
        let registry = Registry::in_memory();
        registry.add_user("alice", &generate_public_key()).await.unwrap();
        registry
            .add_host(Host::new("web1", "10.0.0.5", 22, vec!["ubuntu".into(), "root".into()]))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn linking_twice_stores_account_once() {
        let registry = seeded().await;
        registry.link("alice", "web1", &["ubuntu"]).await.unwrap();
        let link = registry.link("alice", "web1", &["ubuntu"]).await.unwrap();
        assert_eq!(link.accounts, vec!["ubuntu"]);
        assert!(registry.is_linked("alice", "web1", "ubuntu").await);
        assert!(!registry.is_linked("alice", "web1", "root").await);
    }

    #[tokio::test]
    async fn link_requires_known_entities_and_accounts() {
        let registry = seeded().await;
        assert!(matches!(
            registry.link("bob", "web1", &["ubuntu"]).await.unwrap_err(),
            RegistryError::NotFound { kind: "user", .. }
        ));
        assert!(matches!(
            registry.link("alice", "db1", &["ubuntu"]).await.unwrap_err(),
            RegistryError::NotFound { kind: "host", .. }
        ));
        assert!(matches!(
            registry.link("alice", "web1", &["postgres"]).await.unwrap_err(),
            RegistryError::UnknownAccount { .. }
        ));
    }

    #[tokio::test]
    async fn unlink_narrows_all_link() {
        let registry = seeded().await;
        registry.link_all("alice", "web1").await.unwrap();
        assert!(registry.is_linked("alice", "web1", "root").await);

        let remaining = registry.unlink("alice", "web1", &["root"]).await.unwrap().unwrap();
        assert!(!remaining.all);
        assert_eq!(remaining.accounts, vec!["ubuntu"]);

        assert!(registry.unlink("alice", "web1", &["ubuntu"]).await.unwrap().is_none());
        assert!(registry.link_of("alice", "web1").await.is_none());
        assert!(registry.snapshot().await.links.is_empty());
    }

    #[tokio::test]
    async fn unlink_all_removes_link() {
        let registry = seeded().await;
        registry.link("alice", "web1", &["ubuntu", "root"]).await.unwrap();
        registry.unlink_all("alice", "web1").await.unwrap();
        assert!(!registry.is_linked("alice", "web1", "ubuntu").await);
        assert!(registry.links_of_user("alice").await.is_empty());
    }
}
