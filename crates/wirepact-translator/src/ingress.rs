//! 入站授权检查
//!
//! 验证进入工作负载的 WirePact 身份令牌，然后按 [`IngressMode`] 把它换回
//! Basic Auth 凭证，或者去掉令牌后直接放行。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::grpc::HttpAttributes;
use crate::repository::UserRepository;
use crate::server::{AuthorizationCheck, Direction};
use wirepact_common::error::IntoError;
use wirepact_common::{
    AuthorizationDecision, BasicCredentials, Error, HeaderEntry, Result,
    HTTP_AUTHORIZATION_HEADER, STATUS_FORBIDDEN, WIREPACT_IDENTITY_HEADER,
};
use wirepact_pki::TokenVerifier;

const NO_CREDENTIALS: &str = "No credentials found for the given user ID.";

/// 令牌验证通过后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum IngressMode {
    /// 查询用户名和密码，以 Basic Auth 头交给工作负载
    #[default]
    BasicAuth,
    /// 只移除令牌头，记录用户标识后放行
    PassThrough,
}

impl fmt::Display for IngressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressMode::BasicAuth => write!(f, "basic_auth"),
            IngressMode::PassThrough => write!(f, "pass_through"),
        }
    }
}

impl FromStr for IngressMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "basic_auth" => Ok(IngressMode::BasicAuth),
            "pass_through" => Ok(IngressMode::PassThrough),
            _ => format!("无效的入站模式: {}", s).into_error(Error::Config),
        }
    }
}

impl TryFrom<String> for IngressMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// 入站授权检查
pub struct IngressCheck {
    verifier: TokenVerifier,
    repository: Arc<dyn UserRepository>,
    mode: IngressMode,
}

impl IngressCheck {
    /// 创建新的入站检查
    pub fn new(
        verifier: TokenVerifier,
        repository: Arc<dyn UserRepository>,
        mode: IngressMode,
    ) -> Self {
        Self {
            verifier,
            repository,
            mode,
        }
    }

    async fn basic_auth_for(&self, user_id: &str) -> AuthorizationDecision {
        let credentials = match self.repository.lookup_username_and_password(user_id).await {
            Ok(Some((username, password))) => BasicCredentials::new(&username, &password),
            Ok(None) => {
                info!("用户标识 {} 没有对应的凭证", user_id);
                return AuthorizationDecision::deny(STATUS_FORBIDDEN, NO_CREDENTIALS);
            }
            Err(e) => {
                error!("查询用户标识 {} 失败: {}", user_id, e);
                return AuthorizationDecision::deny(STATUS_FORBIDDEN, NO_CREDENTIALS);
            }
        };

        info!("已将用户标识 {} 转换为用户 {}", user_id, credentials.username);
        AuthorizationDecision::allow(
            vec![HeaderEntry::new(
                HTTP_AUTHORIZATION_HEADER,
                &credentials.to_header_value(),
            )],
            vec![WIREPACT_IDENTITY_HEADER.to_string()],
        )
    }
}

#[async_trait]
impl AuthorizationCheck for IngressCheck {
    fn direction(&self) -> Direction {
        Direction::Ingress
    }

    async fn check(&self, request: &HttpAttributes) -> Result<AuthorizationDecision> {
        let Some(token) = request.header(WIREPACT_IDENTITY_HEADER) else {
            debug!("请求没有 WirePact 身份令牌，跳过");
            return Ok(AuthorizationDecision::pass_through());
        };

        let user_id = match self.verifier.verify(token) {
            Ok(user_id) => user_id,
            Err(kind) => {
                warn!(reason = %kind, "WirePact 身份令牌无效");
                return Ok(AuthorizationDecision::rejected(kind));
            }
        };

        Ok(match self.mode {
            IngressMode::PassThrough => {
                info!("请求来自用户标识 {}", user_id);
                AuthorizationDecision::allow(Vec::new(), vec![WIREPACT_IDENTITY_HEADER.to_string()])
            }
            IngressMode::BasicAuth => self.basic_auth_for(&user_id).await,
        })
    }
}
