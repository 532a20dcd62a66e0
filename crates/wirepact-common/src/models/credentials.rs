//! Basic Auth 凭证模型
//!
//! 负责解析 `Authorization: Basic ...` 请求头，以及为旧式工作负载
//! 重新生成 Basic Auth 请求头。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// 用户名/密码对
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

/// Authorization 请求头的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAuthorization {
    /// 不是 Basic 方案（例如 Bearer）
    NotBasic,
    /// Basic 方案，但载荷无法解码或不含冒号
    Malformed(String),
    /// 有效的用户名/密码对
    Credentials(BasicCredentials),
}

impl BasicCredentials {
    /// 创建新的凭证
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// 解析 Authorization 请求头的值
    ///
    /// 方案名大小写不敏感；载荷按第一个冒号切分为用户名和密码。
    pub fn parse_authorization(header: &str) -> ParsedAuthorization {
        let header = header.trim();
        let (scheme, payload) = match header.split_once(char::is_whitespace) {
            Some((scheme, payload)) => (scheme, payload.trim()),
            None => (header, ""),
        };

        if !scheme.eq_ignore_ascii_case("basic") {
            return ParsedAuthorization::NotBasic;
        }

        let decoded = match STANDARD.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => return ParsedAuthorization::Malformed(format!("invalid base64: {}", e)),
        };

        let decoded = match String::from_utf8(decoded) {
            Ok(decoded) => decoded,
            Err(_) => return ParsedAuthorization::Malformed("payload is not utf-8".to_string()),
        };

        match decoded.split_once(':') {
            Some((username, password)) => {
                ParsedAuthorization::Credentials(Self::new(username, password))
            }
            None => ParsedAuthorization::Malformed("payload contains no colon".to_string()),
        }
    }

    /// 生成 `Basic <base64(username:password)>` 请求头值
    pub fn to_header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

// 密码不进入日志
impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_valid_basic_header() {
        let header = format!("Basic {}", STANDARD.encode("alice:secret"));
        assert_eq!(
            BasicCredentials::parse_authorization(&header),
            ParsedAuthorization::Credentials(BasicCredentials::new("alice", "secret"))
        );
    }

    #[test]
    fn test_password_may_contain_colons() {
        let header = format!("basic {}", STANDARD.encode("alice:se:cr:et"));
        assert_eq!(
            BasicCredentials::parse_authorization(&header),
            ParsedAuthorization::Credentials(BasicCredentials::new("alice", "se:cr:et"))
        );
    }

    #[rstest]
    #[case("Bearer abc.def.ghi")]
    #[case("Digest username=\"alice\"")]
    #[case("Basically")]
    fn test_non_basic_schemes(#[case] header: &str) {
        assert_eq!(
            BasicCredentials::parse_authorization(header),
            ParsedAuthorization::NotBasic
        );
    }

    #[rstest]
    #[case(STANDARD.encode("alice"))]
    #[case(STANDARD.encode(""))]
    #[case("not base64!!".to_string())]
    fn test_malformed_payloads(#[case] payload: String) {
        let header = format!("Basic {}", payload);
        assert!(matches!(
            BasicCredentials::parse_authorization(&header),
            ParsedAuthorization::Malformed(_)
        ));
    }

    #[test]
    fn test_header_value_round_trip() {
        let credentials = BasicCredentials::new("alice", "secret");
        let header = credentials.to_header_value();
        assert_eq!(header, format!("Basic {}", STANDARD.encode("alice:secret")));
        assert_eq!(
            BasicCredentials::parse_authorization(&header),
            ParsedAuthorization::Credentials(credentials)
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let credentials = BasicCredentials::new("alice", "secret");
        assert!(!format!("{:?}", credentials).contains("secret"));
    }
}
