//! 连接鉴权插槽 / Connection authentication seam
//!
//! 令牌机制属于外部协作方；这里只定义校验接口
//! Token mechanics belong to an external collaborator; only the validation
//! seam lives here

use async_trait::async_trait;

use crate::domain::UserId;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 校验令牌，成功时返回用户ID / Validate a token, yielding the user id on success
    async fn authenticate(&self, token: &str) -> anyhow::Result<Option<UserId>>;
}

/// 默认实现：令牌即数字用户ID，仅用于开发与测试
/// Default implementation: the token IS the numeric user id; dev/test only
pub struct StaticAuthenticator;

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> anyhow::Result<Option<UserId>> {
        Ok(token.trim().parse::<UserId>().ok().filter(|id| *id > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_authenticator_parses_uid() {
        let auth = StaticAuthenticator;
        assert_eq!(auth.authenticate("42").await.unwrap(), Some(42));
        assert_eq!(auth.authenticate("not-a-uid").await.unwrap(), None);
        assert_eq!(auth.authenticate("-3").await.unwrap(), None);
    }
}
