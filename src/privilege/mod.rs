pub mod auth;

use async_trait::async_trait;
use std::fmt;

pub use auth::{AuthManager, User};

/// Authenticated principal: `user@host`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserIdentity {
    pub username: String,
    pub hostname: String,
}

impl UserIdentity {
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }

    /// Principal used by engine-internal sessions
    pub fn internal() -> Self {
        Self::new("root", "localhost")
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.hostname)
    }
}

/// User permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Execute SELECT queries
    Select,
    /// Execute INSERT queries
    Insert,
    /// Execute UPDATE queries
    Update,
    /// Execute DELETE queries
    Delete,
    /// Create databases and tables
    Create,
    /// Drop databases and tables
    Drop,
    /// Administrative privileges, including the `mysql` system schema
    Admin,
}

/// Verifies identities and answers privilege lookups for sessions
#[async_trait]
pub trait PrivilegeStore: Send + Sync {
    async fn verify(&self, identity: &UserIdentity, salt: &[u8], auth_response: &[u8]) -> bool;

    /// Permissions granted to `identity`; empty when the account is unknown
    async fn privileges(&self, identity: &UserIdentity) -> Vec<Permission>;
}
