use super::{Permission, PrivilegeStore, UserIdentity};
use crate::core::{DbError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// User account, scoped to a host pattern
#[derive(Debug, Clone)]
pub struct User {
    username: String,
    host: String,
    password_hash: Option<String>,
    permissions: Vec<Permission>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        host: impl Into<String>,
        password_hash: Option<String>,
        permissions: Vec<Permission>,
    ) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
            password_hash,
            permissions,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Host pattern; `%` matches any run of characters, `_` a single one
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Checks if user has a specific permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&permission)
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.permissions.contains(&Permission::Admin)
    }

    fn matches_host(&self, hostname: &str) -> bool {
        if self.host == "%" || self.host == hostname {
            return true;
        }
        let pattern = regex::escape(&self.host).replace('%', ".*").replace('_', ".");
        Regex::new(&format!("^(?i){}$", pattern))
            .map(|re| re.is_match(hostname))
            .unwrap_or(false)
    }

    fn add_permission(&mut self, permission: Permission) -> bool {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
            true
        } else {
            false
        }
    }

    fn remove_permission(&mut self, permission: Permission) -> bool {
        let len_before = self.permissions.len();
        self.permissions.retain(|p| p != &permission);
        len_before != self.permissions.len()
    }
}

/// In-memory privilege store backed by bcrypt password hashes.
///
/// Accounts are keyed by `(username, host pattern)`. The bootstrap account is
/// `root@%` with no password and full privileges. Because bcrypt hashes carry
/// their own salt, the handshake salt is not mixed into verification: the
/// auth response is checked against the stored hash directly.
pub struct AuthManager {
    users: RwLock<HashMap<(String, String), User>>,
    cost: u32,
}

impl AuthManager {
    pub const ROOT_USERNAME: &'static str = "root";

    pub fn new() -> Self {
        Self::with_cost(bcrypt::DEFAULT_COST)
    }

    /// Creates a manager hashing with the given bcrypt cost (4..=31)
    pub fn with_cost(cost: u32) -> Self {
        let root = User::new(Self::ROOT_USERNAME, "%", None, vec![Permission::Admin]);
        let mut users = HashMap::new();
        users.insert((root.username.clone(), root.host.clone()), root);

        Self {
            users: RwLock::new(users),
            cost,
        }
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| DbError::ExecutionError(format!("Failed to hash password: {}", e)))
    }

    /// Finds the account for `identity`, preferring an exact host over patterns
    async fn find(&self, identity: &UserIdentity) -> Option<User> {
        let users = self.users.read().await;
        let mut candidates: Vec<&User> = users
            .values()
            .filter(|u| u.username == identity.username && u.matches_host(&identity.hostname))
            .collect();
        candidates.sort_by_key(|u| {
            (
                u.host != identity.hostname,
                std::cmp::Reverse(u.host.replace(['%', '_'], "").len()),
            )
        });
        candidates.first().map(|u| (*u).clone())
    }

    pub async fn create_user(
        &self,
        username: &str,
        host: &str,
        password: &str,
        permissions: Vec<Permission>,
    ) -> Result<()> {
        self.validate_username(username)?;
        self.validate_password(password)?;
        let hash = self.hash_password(password)?;

        let mut users = self.users.write().await;
        let key = (username.to_string(), host.to_string());
        if users.contains_key(&key) {
            return Err(DbError::ExecutionError(format!(
                "User '{}'@'{}' already exists",
                username, host
            )));
        }

        users.insert(key, User::new(username, host, Some(hash), permissions));
        Ok(())
    }

    pub async fn delete_user(&self, username: &str, host: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let key = (username.to_string(), host.to_string());

        let user = users
            .get(&key)
            .ok_or_else(|| DbError::ExecutionError(format!("User '{}'@'{}' not found", username, host)))?;

        if user.is_admin() && users.values().filter(|u| u.is_admin()).count() <= 1 {
            return Err(DbError::ExecutionError("Cannot delete the last admin user".into()));
        }

        users.remove(&key);
        Ok(())
    }

    pub async fn update_password(&self, username: &str, host: &str, new_password: &str) -> Result<()> {
        self.validate_password(new_password)?;
        let hash = self.hash_password(new_password)?;

        let mut users = self.users.write().await;
        let user = users
            .get_mut(&(username.to_string(), host.to_string()))
            .ok_or_else(|| DbError::ExecutionError(format!("User '{}'@'{}' not found", username, host)))?;
        user.password_hash = Some(hash);
        Ok(())
    }

    pub async fn grant_permission(&self, username: &str, host: &str, permission: Permission) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&(username.to_string(), host.to_string()))
            .ok_or_else(|| DbError::ExecutionError(format!("User '{}'@'{}' not found", username, host)))?;
        user.add_permission(permission);
        Ok(())
    }

    pub async fn revoke_permission(&self, username: &str, host: &str, permission: Permission) -> Result<()> {
        let mut users = self.users.write().await;
        let key = (username.to_string(), host.to_string());

        let is_admin = users
            .get(&key)
            .map(|u| u.is_admin())
            .ok_or_else(|| DbError::ExecutionError(format!("User '{}'@'{}' not found", username, host)))?;

        if permission == Permission::Admin
            && is_admin
            && users.values().filter(|u| u.is_admin()).count() <= 1
        {
            return Err(DbError::ExecutionError(
                "Cannot revoke admin permission from the last admin user".into(),
            ));
        }

        if let Some(user) = users.get_mut(&key) {
            user.remove_permission(permission);
        }
        Ok(())
    }

    /// Every account, sorted by username then host
    pub async fn list_users(&self) -> Vec<User> {
        let users = self.users.read().await;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| (&a.username, &a.host).cmp(&(&b.username, &b.host)));
        all
    }

    fn validate_username(&self, username: &str) -> Result<()> {
        if username.is_empty() {
            return Err(DbError::ExecutionError("Username cannot be empty".into()));
        }
        if username.len() > 32 {
            return Err(DbError::ExecutionError("Username too long (max 32 characters)".into()));
        }
        Ok(())
    }

    fn validate_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(DbError::ExecutionError("Password cannot be empty".into()));
        }
        if password.len() < 8 {
            return Err(DbError::ExecutionError(
                "Password must be at least 8 characters long".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrivilegeStore for AuthManager {
    async fn verify(&self, identity: &UserIdentity, _salt: &[u8], auth_response: &[u8]) -> bool {
        match self.find(identity).await {
            Some(user) => match &user.password_hash {
                // Accounts without a password accept any response
                None => true,
                Some(hash) => bcrypt::verify(auth_response, hash).unwrap_or(false),
            },
            None => false,
        }
    }

    async fn privileges(&self, identity: &UserIdentity) -> Vec<Permission> {
        self.find(identity)
            .await
            .map(|u| u.permissions)
            .unwrap_or_default()
    }
}
