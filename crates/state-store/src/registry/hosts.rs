//! Host operations.

use sault_types::{Host, HostFilter, validation::validate_id};

use super::Registry;
use crate::{RegistryError, RegistryResult};

/// Changes applied by [`Registry::update_host`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct HostUpdate {
    pub new_id: Option<String>,
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub accounts: Option<Vec<String>>,
    pub client_private_key: Option<String>,
}

impl HostUpdate {
    /// The host as it would look after this update.
    pub fn apply_to(&self, host: &Host) -> Host {
        let mut next = host.clone();
        if let Some(id) = &self.new_id {
            next.id = id.clone();
        }
        if let Some(host_name) = &self.host_name {
            next.host_name = host_name.clone();
        }
        if let Some(port) = self.port {
            next.port = port;
        }
        if let Some(accounts) = &self.accounts {
            next.accounts = dedup_accounts(accounts);
        }
        if let Some(key) = &self.client_private_key {
            next.client_private_key = Some(key.clone());
        }
        next
    }
}

fn dedup_accounts(accounts: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(accounts.len());
    for account in accounts {
        if !out.contains(account) {
            out.push(account.clone());
        }
    }
    out
}

fn validate_host(host: &Host) -> RegistryResult<()> {
    validate_id("host ID", &host.id)?;
    if host.host_name.trim().is_empty() {
        return Err(sault_types::validation::ValidationError::Empty { field: "host name" }.into());
    }
    for account in &host.accounts {
        validate_id("account", account)?;
    }
    Ok(())
}

impl Registry {
    pub async fn get_host(&self, id: &str, filter: HostFilter) -> RegistryResult<Host> {
        self.read()
            .await
            .host
            .get(id)
            .filter(|host| filter.matches(host))
            .cloned()
            .ok_or_else(|| RegistryError::not_found("host", id))
    }

    pub async fn get_hosts(&self, filter: HostFilter) -> Vec<Host> {
        self.read()
            .await
            .host
            .values()
            .filter(|host| filter.matches(host))
            .cloned()
            .collect()
    }

    /// Register a host. The server's own name is rejected by callers that know it.
    pub async fn add_host(&self, mut host: Host) -> RegistryResult<Host> {
        host.accounts = dedup_accounts(&host.accounts);
        validate_host(&host)?;

        let mut data = self.write().await;
        if data.host.contains_key(&host.id) {
            return Err(RegistryError::already_exists("host", &host.id));
        }
        host.touch();
        data.host.insert(host.id.clone(), host.clone());
        Ok(host)
    }

    /// Apply an update. Accounts dropped from the host are pruned from its links; a rename moves
    /// the host's links along.
    pub async fn update_host(&self, id: &str, update: HostUpdate) -> RegistryResult<Host> {
        let mut data = self.write().await;
        let current = data.host.get(id).cloned().ok_or_else(|| RegistryError::not_found("host", id))?;

        let mut next = update.apply_to(&current);
        if next == current {
            return Err(RegistryError::NothingToUpdate);
        }
        validate_host(&next)?;
        if next.id != current.id && data.host.contains_key(&next.id) {
            return Err(RegistryError::already_exists("host", &next.id));
        }

        next.touch();
        data.host.remove(id);
        data.host.insert(next.id.clone(), next.clone());

        if let Some(mut users) = data.links.remove(id) {
            for link in users.values_mut() {
                link.accounts.retain(|account| next.has_account(account));
            }
            users.retain(|_, link| !link.is_empty());
            if !users.is_empty() {
                data.links.insert(next.id.clone(), users);
            }
        }
        Ok(next)
    }

    pub async fn set_host_active(&self, id: &str, active: bool) -> RegistryResult<Host> {
        let mut data = self.write().await;
        let host = data.host.get_mut(id).ok_or_else(|| RegistryError::not_found("host", id))?;
        host.is_active = active;
        host.touch();
        Ok(host.clone())
    }

    /// Remove a host together with all of its links.
    pub async fn remove_host(&self, id: &str) -> RegistryResult<Host> {
        let mut data = self.write().await;
        let host = data.host.remove(id).ok_or_else(|| RegistryError::not_found("host", id))?;
        data.links.remove(id);
        Ok(host)
    }
}
