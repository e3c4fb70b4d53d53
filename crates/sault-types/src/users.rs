//! User registry entities.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A principal allowed to connect through sault, identified by its public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    /// Human readable handle, unique across users.
    #[serde(rename = "ID")]
    pub id: String,
    /// OpenSSH encoded public key (`ssh-ed25519 AAAA...`), unique across users.
    pub public_key: String,
    /// Inactive users are never authorized.
    pub is_active: bool,
    /// Admins may open control sessions and bypass link checks.
    pub is_admin: bool,
    pub time_added: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, public_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            public_key: public_key.into(),
            is_active: true,
            is_admin: false,
            time_added: now,
            time_updated: now,
        }
    }

    pub fn touch(&mut self) {
        self.time_updated = Utc::now();
    }
}

/// Lookup filter for users; `None` fields match anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    pub active: Option<bool>,
    pub admin: Option<bool>,
}

impl UserFilter {
    pub const ANY: UserFilter = UserFilter { active: None, admin: None };
    pub const ACTIVE: UserFilter = UserFilter {
        active: Some(true),
        admin: None,
    };

    pub fn matches(&self, user: &User) -> bool {
        self.active.is_none_or(|active| user.is_active == active) && self.admin.is_none_or(|admin| user.is_admin == admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_on_each_flag() {
        let mut user = User::new("alice", "ssh-ed25519 AAAA");
        assert!(UserFilter::ANY.matches(&user));
        assert!(UserFilter::ACTIVE.matches(&user));

        user.is_active = false;
        assert!(!UserFilter::ACTIVE.matches(&user));

        let admins = UserFilter {
            active: None,
            admin: Some(true),
        };
        assert!(!admins.matches(&user));
        user.is_admin = true;
        assert!(admins.matches(&user));
    }
}
