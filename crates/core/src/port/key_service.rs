// Key Service Port (encryption key lookup)

use super::ServiceError;
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Resolve a key alias to a key id, `None` if the alias is unknown
    async fn get_key_by_alias(&self, alias: &str) -> Result<Option<String>, ServiceError>;
}
