//! Login names of the form `[<account>+]<hostID>`.
use thiserror::Error;

use crate::validation::{ValidationError, validate_id};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("login name is empty")]
    Empty,
    #[error("login name '{0}' contains more than one '+'")]
    TooManySeparators(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// The resource requested through the SSH user name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginIdentity {
    /// Account on the target host; empty when no `+` was given.
    pub account: String,
    pub host_id: String,
}

impl LoginIdentity {
    pub fn parse(login: &str) -> Result<Self, IdentityError> {
        if login.is_empty() {
            return Err(IdentityError::Empty);
        }
        let (account, host_id) = match login.split_once('+') {
            Some((_, rest)) if rest.contains('+') => return Err(IdentityError::TooManySeparators(login.to_string())),
            Some((account, host_id)) => {
                validate_id("account", account)?;
                (account, host_id)
            }
            None => ("", login),
        };
        validate_id("host ID", host_id)?;
        Ok(Self {
            account: account.to_string(),
            host_id: host_id.to_string(),
        })
    }

    /// Whether the login targets the server itself rather than a host.
    pub fn is_control(&self, control_name: &str) -> bool {
        self.host_id == control_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_account_and_host() {
        let id = LoginIdentity::parse("ubuntu+webserver1").unwrap();
        assert_eq!(id.account, "ubuntu");
        assert_eq!(id.host_id, "webserver1");
        assert!(!id.is_control("sault"));
    }

    #[test]
    fn bare_host_has_empty_account() {
        let id = LoginIdentity::parse("sault").unwrap();
        assert_eq!(id.account, "");
        assert!(id.is_control("sault"));
    }

    #[test]
    fn malformed_logins_are_rejected() {
        assert_eq!(LoginIdentity::parse(""), Err(IdentityError::Empty));
        assert!(matches!(LoginIdentity::parse("a+b+c"), Err(IdentityError::TooManySeparators(_))));
        assert!(matches!(LoginIdentity::parse("+web1"), Err(IdentityError::Invalid(_))));
        assert!(matches!(LoginIdentity::parse("ubuntu+"), Err(IdentityError::Invalid(_))));
        assert!(matches!(LoginIdentity::parse("ub untu+web1"), Err(IdentityError::Invalid(_))));
    }
}
