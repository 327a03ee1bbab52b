//! In-memory user directory for tests and local runs.

use super::{DirectoryError, UserDirectory};
use crate::domain::UserId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

/// Every user exists unless deleted; selected ids can be made to fail.
#[derive(Debug, Default)]
pub struct MockUserDirectory {
    deleted: RwLock<HashSet<UserId>>,
    unavailable: RwLock<HashSet<UserId>>,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_user(&self, user_id: &UserId) {
        if let Ok(mut deleted) = self.deleted.write() {
            deleted.insert(user_id.clone());
        }
    }

    /// Lookups for `user_id` fail with `DirectoryError::Unavailable`.
    pub fn with_unavailable(self, user_id: UserId) -> Self {
        if let Ok(mut unavailable) = self.unavailable.write() {
            unavailable.insert(user_id);
        }
        self
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn user_exists(&self, user_id: &UserId) -> Result<bool, DirectoryError> {
        let unavailable = self
            .unavailable
            .read()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        if unavailable.contains(user_id) {
            return Err(DirectoryError::Unavailable(user_id.to_string()));
        }
        let deleted = self
            .deleted
            .read()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(!deleted.contains(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_users_do_not_exist() {
        let dir = MockUserDirectory::new();
        let user = UserId::new("v1");
        assert_eq!(tokio_test::block_on(dir.user_exists(&user)), Ok(true));
        dir.delete_user(&user);
        assert_eq!(tokio_test::block_on(dir.user_exists(&user)), Ok(false));
    }

    #[test]
    fn test_unavailable_users_error() {
        let user = UserId::new("v1");
        let dir = MockUserDirectory::new().with_unavailable(user.clone());
        tokio_test::assert_err!(tokio_test::block_on(dir.user_exists(&user)));
    }
}
