//! Authentication credentials and the provider boundary.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Which credential fields an authentication step needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CredentialFields: u8 {
        const USERNAME = 1 << 0;
        const PASSWORD = 1 << 1;
        const TARGET   = 1 << 2;
    }
}

impl fmt::Display for CredentialFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(n, _)| n).collect();
        write!(f, "{}", names.join(", ").to_lowercase())
    }
}

/// Username, password and XVP target, each optional.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub target: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("target", &self.target)
            .finish()
    }
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            target: None,
        }
    }

    /// Fields that are set.
    pub fn fields(&self) -> CredentialFields {
        let mut fields = CredentialFields::empty();
        fields.set(CredentialFields::USERNAME, self.username.is_some());
        fields.set(CredentialFields::PASSWORD, self.password.is_some());
        fields.set(CredentialFields::TARGET, self.target.is_some());
        fields
    }

    pub fn has(&self, needed: CredentialFields) -> bool {
        self.fields().contains(needed)
    }

    /// Fill unset fields from `other`.
    pub fn merge(&mut self, other: Credentials) {
        if self.username.is_none() {
            self.username = other.username;
        }
        if self.password.is_none() {
            self.password = other.password;
        }
        if self.target.is_none() {
            self.target = other.target;
        }
    }
}

/// Supplies credentials when an authentication step asks for them.
///
/// Returning `None`, or credentials lacking a needed field, makes the session
/// emit a credentials-required event and wait for
/// [`Session::send_credentials`](crate::Session::send_credentials).
pub trait CredentialProvider {
    fn credentials(&mut self, needed: CredentialFields) -> Option<Credentials>;
}

/// Never supplies anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credentials(&mut self, _needed: CredentialFields) -> Option<Credentials> {
        None
    }
}

/// Always hands out the same credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn credentials(&mut self, _needed: CredentialFields) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// Credentials held for the duration of one handshake.
pub(crate) struct CredentialStore {
    provider: Box<dyn CredentialProvider>,
    current: Credentials,
}

impl CredentialStore {
    pub(crate) fn new(provider: Box<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            current: Credentials::default(),
        }
    }

    /// The held credentials if they cover `needed`, asking the provider
    /// first when they do not.
    pub(crate) fn require(&mut self, needed: CredentialFields) -> Option<&Credentials> {
        if !self.current.has(needed) {
            if let Some(supplied) = self.provider.credentials(needed) {
                self.current.merge(supplied);
            }
        }
        self.current.has(needed).then_some(&self.current)
    }

    pub(crate) fn supply(&mut self, creds: Credentials) {
        self.current = creds;
    }

    pub(crate) fn clear(&mut self) {
        self.current = Credentials::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_reflect_set_values() {
        let c = Credentials::user_password("u", "p");
        assert_eq!(
            c.fields(),
            CredentialFields::USERNAME | CredentialFields::PASSWORD
        );
        assert!(!c.has(CredentialFields::TARGET));
    }

    #[test]
    fn debug_hides_password() {
        let c = Credentials::password("hunter2");
        assert!(!format!("{c:?}").contains("hunter2"));
    }

    #[test]
    fn display_lists_field_names() {
        let f = CredentialFields::USERNAME | CredentialFields::TARGET;
        assert_eq!(f.to_string(), "username, target");
    }

    #[test]
    fn store_asks_provider_once_missing() {
        let mut store = CredentialStore::new(Box::new(StaticCredentials(Credentials::password(
            "pw",
        ))));
        assert!(store.require(CredentialFields::PASSWORD).is_some());
        assert!(store.require(CredentialFields::USERNAME).is_none());

        store.supply(Credentials::user_password("me", "pw"));
        assert!(store
            .require(CredentialFields::USERNAME | CredentialFields::PASSWORD)
            .is_some());
        store.clear();

        let mut empty = CredentialStore::new(Box::new(NoCredentials));
        assert!(empty.require(CredentialFields::PASSWORD).is_none());
    }
}
