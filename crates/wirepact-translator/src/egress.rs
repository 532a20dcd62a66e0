//! 出站授权检查
//!
//! 把离开工作负载的 Basic Auth 凭证换成签名的 WirePact 身份令牌。
//! 没有凭证或不是 Basic 方案的请求原样放行。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::grpc::HttpAttributes;
use crate::repository::UserRepository;
use crate::server::{AuthorizationCheck, Direction};
use wirepact_common::{
    AuthorizationDecision, BasicCredentials, HeaderEntry, ParsedAuthorization, Result,
    HTTP_AUTHORIZATION_HEADER, STATUS_FORBIDDEN, STATUS_UNAUTHORIZED, WIREPACT_IDENTITY_HEADER,
};
use wirepact_pki::TokenIssuer;

const MALFORMED_CREDENTIALS: &str = "The Basic Auth credentials are malformed.";
const NO_USER_ID: &str = "No user ID found for the given credentials.";

/// 出站授权检查
pub struct EgressCheck {
    repository: Arc<dyn UserRepository>,
    issuer: TokenIssuer,
}

impl EgressCheck {
    /// 创建新的出站检查
    pub fn new(repository: Arc<dyn UserRepository>, issuer: TokenIssuer) -> Self {
        Self { repository, issuer }
    }

    async fn resolve_user_id(&self, credentials: &BasicCredentials) -> Option<String> {
        match self
            .repository
            .lookup_user_id(&credentials.username, &credentials.password)
            .await
        {
            Ok(Some(user_id)) if !user_id.is_empty() => Some(user_id),
            Ok(_) => None,
            Err(e) => {
                error!("查询用户 {} 失败: {}", credentials.username, e);
                None
            }
        }
    }
}

#[async_trait]
impl AuthorizationCheck for EgressCheck {
    fn direction(&self) -> Direction {
        Direction::Egress
    }

    async fn check(&self, request: &HttpAttributes) -> Result<AuthorizationDecision> {
        let Some(header) = request.header(HTTP_AUTHORIZATION_HEADER) else {
            debug!("请求没有 Authorization 头，跳过");
            return Ok(AuthorizationDecision::pass_through());
        };

        let credentials = match BasicCredentials::parse_authorization(header) {
            ParsedAuthorization::NotBasic => {
                debug!("Authorization 头不是 Basic 方案，跳过");
                return Ok(AuthorizationDecision::pass_through());
            }
            ParsedAuthorization::Malformed(reason) => {
                warn!("Basic Auth 凭证格式错误: {}", reason);
                return Ok(AuthorizationDecision::deny(
                    STATUS_UNAUTHORIZED,
                    MALFORMED_CREDENTIALS,
                ));
            }
            ParsedAuthorization::Credentials(credentials) => credentials,
        };

        let Some(user_id) = self.resolve_user_id(&credentials).await else {
            info!("用户 {} 没有对应的用户标识", credentials.username);
            return Ok(AuthorizationDecision::deny(STATUS_FORBIDDEN, NO_USER_ID));
        };

        let token = self.issuer.issue(&user_id).map_err(|e| {
            error!("无法为用户标识 {} 签发令牌: {}", user_id, e);
            e
        })?;

        info!("已将用户 {} 转换为用户标识 {}", credentials.username, user_id);
        Ok(AuthorizationDecision::allow(
            vec![HeaderEntry::new(WIREPACT_IDENTITY_HEADER, &token)],
            vec![HTTP_AUTHORIZATION_HEADER.to_string()],
        ))
    }
}
