//! User operations.

use russh::keys::PublicKey;
use sault_types::{User, UserFilter, validation::validate_id};

use super::{Registry, key_matches, normalize_public_key};
use crate::{RegistryError, RegistryResult};

/// Changes applied by [`Registry::update_user`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub new_id: Option<String>,
    pub public_key: Option<String>,
}

impl Registry {
    /// Look a user up by ID, by public key, or both (both must then agree).
    pub async fn get_user(&self, id: Option<&str>, public_key: Option<&PublicKey>, filter: UserFilter) -> RegistryResult<User> {
        let data = self.read().await;
        let found = match (id, public_key) {
            (Some(id), key) => data
                .user
                .get(id)
                .filter(|user| key.is_none_or(|key| key_matches(&user.public_key, key))),
            (None, Some(key)) => data.user.values().find(|user| key_matches(&user.public_key, key)),
            (None, None) => None,
        };
        found
            .filter(|user| filter.matches(user))
            .cloned()
            .ok_or_else(|| RegistryError::not_found("user", id.unwrap_or("<by public key>")))
    }

    pub async fn get_users(&self, filter: UserFilter) -> Vec<User> {
        self.read()
            .await
            .user
            .values()
            .filter(|user| filter.matches(user))
            .cloned()
            .collect()
    }

    pub async fn add_user(&self, id: &str, public_key: &str) -> RegistryResult<User> {
        validate_id("user ID", id)?;
        let (key, line) = normalize_public_key(public_key)?;

        let mut data = self.write().await;
        if data.user.contains_key(id) {
            return Err(RegistryError::already_exists("user", id));
        }
        if let Some(owner) = data.user.values().find(|u| key_matches(&u.public_key, &key)) {
            return Err(RegistryError::DuplicatePublicKey(owner.id.clone()));
        }

        let user = User::new(id, line);
        data.user.insert(id.to_string(), user.clone());
        Ok(user)
    }

    /// Rename and/or re-key a user. Links follow a renamed user.
    pub async fn update_user(&self, id: &str, update: UserUpdate) -> RegistryResult<User> {
        let new_key = update.public_key.as_deref().map(normalize_public_key).transpose()?;
        if let Some(new_id) = &update.new_id {
            validate_id("user ID", new_id)?;
        }

        let mut data = self.write().await;
        let mut user = data
            .user
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("user", id))?;

        let rename = update.new_id.filter(|new_id| new_id != id);
        let rekey = new_key.filter(|(_, line)| *line != user.public_key);
        if rename.is_none() && rekey.is_none() {
            return Err(RegistryError::NothingToUpdate);
        }

        if let Some((key, line)) = rekey {
            if let Some(owner) = data
                .user
                .values()
                .find(|u| u.id != id && key_matches(&u.public_key, &key))
            {
                return Err(RegistryError::DuplicatePublicKey(owner.id.clone()));
            }
            user.public_key = line;
        }

        if let Some(new_id) = rename {
            if data.user.contains_key(&new_id) {
                return Err(RegistryError::already_exists("user", &new_id));
            }
            data.user.remove(id);
            for users in data.links.values_mut() {
                if let Some(link) = users.remove(id) {
                    users.insert(new_id.clone(), link);
                }
            }
            user.id = new_id;
        }

        user.touch();
        data.user.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub async fn set_user_admin(&self, id: &str, admin: bool) -> RegistryResult<User> {
        self.modify_user(id, |user| user.is_admin = admin).await
    }

    pub async fn set_user_active(&self, id: &str, active: bool) -> RegistryResult<User> {
        self.modify_user(id, |user| user.is_active = active).await
    }

    /// Remove a user together with all of its links.
    pub async fn remove_user(&self, id: &str) -> RegistryResult<User> {
        let mut data = self.write().await;
        let user = data.user.remove(id).ok_or_else(|| RegistryError::not_found("user", id))?;
        for users in data.links.values_mut() {
            users.remove(id);
        }
        data.links.retain(|_, users| !users.is_empty());
        Ok(user)
    }

    async fn modify_user(&self, id: &str, apply: impl FnOnce(&mut User)) -> RegistryResult<User> {
        let mut data = self.write().await;
        let user = data.user.get_mut(id).ok_or_else(|| RegistryError::not_found("user", id))?;
        apply(user);
        user.touch();
        Ok(user.clone())
    }
}
