//! 授权决策模型
//!
//! 每个授权检查的结果都是一个 [`AuthorizationDecision`]：允许（可附带
//! 请求头的增删）或拒绝（附带 HTTP 状态码和简短原因）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP 400
pub const STATUS_BAD_REQUEST: u16 = 400;
/// HTTP 401
pub const STATUS_UNAUTHORIZED: u16 = 401;
/// HTTP 403
pub const STATUS_FORBIDDEN: u16 = 403;

/// 身份令牌被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyKind {
    /// 令牌结构、证书链或指纹字段无法解析
    Malformed,
    /// 指纹与证书链首个证书不一致
    ThumbprintMismatch,
    /// 签名无法用首个证书的公钥验证
    BadSignature,
    /// 证书链没有终止于受信任的根证书
    UntrustedIssuer,
    /// 令牌不在有效期内
    Expired,
}

impl DenyKind {
    /// 对应的 HTTP 状态码
    pub fn http_status(&self) -> u16 {
        match self {
            DenyKind::Malformed => STATUS_BAD_REQUEST,
            DenyKind::ThumbprintMismatch | DenyKind::BadSignature | DenyKind::Expired => {
                STATUS_UNAUTHORIZED
            }
            DenyKind::UntrustedIssuer => STATUS_FORBIDDEN,
        }
    }

    /// 返回给调用方的简短原因
    pub fn reason(&self) -> &'static str {
        match self {
            DenyKind::Malformed => "The WirePact identity token is malformed.",
            DenyKind::ThumbprintMismatch => {
                "The WirePact identity token thumbprint does not match its certificate."
            }
            DenyKind::BadSignature => "The WirePact identity token signature is invalid.",
            DenyKind::UntrustedIssuer => "The WirePact identity token was not issued by a trusted CA.",
            DenyKind::Expired => "The WirePact identity token is expired or not yet valid.",
        }
    }
}

impl fmt::Display for DenyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyKind::Malformed => write!(f, "malformed"),
            DenyKind::ThumbprintMismatch => write!(f, "thumbprint_mismatch"),
            DenyKind::BadSignature => write!(f, "bad_signature"),
            DenyKind::UntrustedIssuer => write!(f, "untrusted_issuer"),
            DenyKind::Expired => write!(f, "expired"),
        }
    }
}

/// 要添加或覆盖的请求头
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    /// 请求头名称
    pub key: String,
    /// 请求头值
    pub value: String,
}

impl HeaderEntry {
    /// 创建新的请求头
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// 授权决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationDecision {
    /// 允许请求，可附带请求头改写
    Allow {
        /// 要添加或覆盖的请求头
        headers_to_add: Vec<HeaderEntry>,
        /// 要移除的请求头名称
        headers_to_remove: Vec<String>,
    },
    /// 拒绝请求
    Deny {
        /// HTTP 状态码
        status: u16,
        /// 返回给调用方的原因
        reason: String,
    },
}

impl AuthorizationDecision {
    /// 原样放行
    pub fn pass_through() -> Self {
        AuthorizationDecision::Allow {
            headers_to_add: Vec::new(),
            headers_to_remove: Vec::new(),
        }
    }

    /// 放行并改写请求头
    pub fn allow(headers_to_add: Vec<HeaderEntry>, headers_to_remove: Vec<String>) -> Self {
        AuthorizationDecision::Allow {
            headers_to_add,
            headers_to_remove,
        }
    }

    /// 拒绝请求
    pub fn deny(status: u16, reason: &str) -> Self {
        AuthorizationDecision::Deny {
            status,
            reason: reason.to_string(),
        }
    }

    /// 根据令牌拒绝原因构造拒绝决策
    pub fn rejected(kind: DenyKind) -> Self {
        Self::deny(kind.http_status(), kind.reason())
    }

    /// 是否允许
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allow { .. })
    }

    /// 是否为不带任何改写的放行
    pub fn is_pass_through(&self) -> bool {
        match self {
            AuthorizationDecision::Allow {
                headers_to_add,
                headers_to_remove,
            } => headers_to_add.is_empty() && headers_to_remove.is_empty(),
            AuthorizationDecision::Deny { .. } => false,
        }
    }

    /// 查找要添加的请求头值
    pub fn added_header(&self, name: &str) -> Option<&str> {
        match self {
            AuthorizationDecision::Allow { headers_to_add, .. } => headers_to_add
                .iter()
                .find(|h| h.key.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str()),
            AuthorizationDecision::Deny { .. } => None,
        }
    }

    /// 是否会移除指定请求头
    pub fn removes_header(&self, name: &str) -> bool {
        match self {
            AuthorizationDecision::Allow {
                headers_to_remove, ..
            } => headers_to_remove.iter().any(|h| h.eq_ignore_ascii_case(name)),
            AuthorizationDecision::Deny { .. } => false,
        }
    }

    /// 拒绝时的状态码
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthorizationDecision::Allow { .. } => None,
            AuthorizationDecision::Deny { status, .. } => Some(*status),
        }
    }

    /// 用于指标的结果标签
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthorizationDecision::Allow { .. } if self.is_pass_through() => "skipped",
            AuthorizationDecision::Allow { .. } => "translated",
            AuthorizationDecision::Deny { .. } => "denied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DenyKind::Malformed, 400)]
    #[case(DenyKind::ThumbprintMismatch, 401)]
    #[case(DenyKind::BadSignature, 401)]
    #[case(DenyKind::Expired, 401)]
    #[case(DenyKind::UntrustedIssuer, 403)]
    fn test_deny_kind_status(#[case] kind: DenyKind, #[case] status: u16) {
        assert_eq!(kind.http_status(), status);
        assert_eq!(AuthorizationDecision::rejected(kind).status(), Some(status));
    }

    #[rstest]
    #[case(DenyKind::Malformed, "malformed")]
    #[case(DenyKind::ThumbprintMismatch, "thumbprint_mismatch")]
    #[case(DenyKind::BadSignature, "bad_signature")]
    #[case(DenyKind::UntrustedIssuer, "untrusted_issuer")]
    #[case(DenyKind::Expired, "expired")]
    fn test_deny_kind_log_label(#[case] kind: DenyKind, #[case] label: &str) {
        assert_eq!(kind.to_string(), label);
    }

    #[test]
    fn test_decision_helpers() {
        let decision = AuthorizationDecision::allow(
            vec![HeaderEntry::new("x-wirepact-identity", "token")],
            vec!["authorization".to_string()],
        );
        assert!(decision.is_allowed());
        assert!(!decision.is_pass_through());
        assert_eq!(decision.added_header("X-WirePact-Identity"), Some("token"));
        assert!(decision.removes_header("Authorization"));
        assert_eq!(decision.outcome(), "translated");

        assert_eq!(AuthorizationDecision::pass_through().outcome(), "skipped");
        assert_eq!(
            AuthorizationDecision::deny(STATUS_FORBIDDEN, "no").outcome(),
            "denied"
        );
    }
}
