//! WirePact 身份令牌模型
//!
//! 身份令牌是一个短期有效的 JWT，断言某个不透明的用户标识。
//! 证书链 (`x5c`) 和指纹 (`x5t`) 放在 JWT 头部，载荷只包含标准声明。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 本翻译器默认的签发者名称
pub const DEFAULT_ISSUER: &str = "k8s-basic-auth-translator";

/// WirePact 信任域的受众
pub const WIREPACT_AUDIENCE: &str = "WirePact";

/// 令牌有效期（秒）
pub const TOKEN_TTL_SECS: i64 = 60;

/// 身份令牌声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// 签发者
    pub iss: String,
    /// 受众
    pub aud: String,
    /// 签发时间（Unix 时间戳）
    pub iat: i64,
    /// 过期时间（Unix 时间戳）
    pub exp: i64,
    /// 用户标识
    pub sub: String,
}

impl IdentityClaims {
    /// 为用户标识创建声明，立即生效，`TOKEN_TTL_SECS` 秒后过期
    pub fn for_subject(issuer: &str, subject: &str, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: issuer.to_string(),
            aud: WIREPACT_AUDIENCE.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
            sub: subject.to_string(),
        }
    }

    /// 检查给定时间是否在 [iat, exp] 之内
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp();
        self.iat <= now && now <= self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_claims_for_subject() {
        let now = Utc::now();
        let claims = IdentityClaims::for_subject(DEFAULT_ISSUER, "user-42", now);
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.aud, "WirePact");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_claims_validity_window() {
        let now = Utc::now();
        let claims = IdentityClaims::for_subject(DEFAULT_ISSUER, "user-42", now);

        assert!(claims.is_valid_at(now));
        assert!(claims.is_valid_at(now + Duration::seconds(60)));
        assert!(!claims.is_valid_at(now + Duration::seconds(61)));
        assert!(!claims.is_valid_at(now - Duration::seconds(5)));
    }

    #[test]
    fn test_claims_without_nbf_serialization() {
        let claims = IdentityClaims::for_subject(DEFAULT_ISSUER, "user-42", Utc::now());
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("nbf").is_none());
        assert_eq!(json["iss"], "k8s-basic-auth-translator");
    }
}
