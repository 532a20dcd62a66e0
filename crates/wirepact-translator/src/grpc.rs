//! Envoy ext_authz v3 协议
//!
//! 生成的 protobuf 类型，以及与 [`AuthorizationDecision`] 之间的转换。

use std::collections::HashMap;

use tonic::Status;
use wirepact_common::{AuthorizationDecision, STATUS_BAD_REQUEST, STATUS_UNAUTHORIZED};

/// tonic-build 生成的代码
#[allow(clippy::all, missing_docs)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/envoy.rs"));
}

pub use proto::envoy::service::auth::v3::authorization_client::AuthorizationClient;
pub use proto::envoy::service::auth::v3::authorization_server::{
    Authorization, AuthorizationServer,
};
pub use proto::envoy::service::auth::v3::{CheckRequest, CheckResponse};

use proto::envoy::config::core::v3::header_value_option::HeaderAppendAction;
use proto::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use proto::envoy::r#type::v3::HttpStatus;
use proto::envoy::service::auth::v3::attribute_context::{HttpRequest, Request};
use proto::envoy::service::auth::v3::check_response::HttpResponse;
use proto::envoy::service::auth::v3::{AttributeContext, DeniedHttpResponse, OkHttpResponse};
use proto::google::rpc;

/// google.rpc.Code
const GRPC_OK: i32 = 0;
const GRPC_INVALID_ARGUMENT: i32 = 3;
const GRPC_PERMISSION_DENIED: i32 = 7;
const GRPC_UNAUTHENTICATED: i32 = 16;

/// 授权检查关心的 HTTP 请求属性
///
/// 请求头名称统一转为小写，查找时大小写不敏感。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpAttributes {
    /// Envoy 分配的请求标识
    pub id: String,
    /// HTTP 方法
    pub method: String,
    /// 目标主机
    pub host: String,
    /// 请求路径
    pub path: String,
    headers: HashMap<String, String>,
}

impl HttpAttributes {
    /// 创建不带请求头的请求属性
    pub fn new(method: &str, host: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// 设置请求标识
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// 添加请求头
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// 查找请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 从 CheckRequest 中提取请求属性，缺少 attributes/request/http 时返回 INVALID_ARGUMENT
    pub fn from_check_request(request: CheckRequest) -> Result<Self, Status> {
        let http = request
            .attributes
            .and_then(|attributes| attributes.request)
            .and_then(|request| request.http)
            .ok_or_else(|| Status::invalid_argument("check request carries no http attributes"))?;

        Ok(Self {
            id: http.id,
            method: http.method,
            host: http.host,
            path: http.path,
            headers: http
                .headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        })
    }

    /// 构造携带这些属性的 CheckRequest
    pub fn to_check_request(&self) -> CheckRequest {
        CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(Request {
                    time: None,
                    http: Some(HttpRequest {
                        id: self.id.clone(),
                        method: self.method.clone(),
                        headers: self.headers.clone(),
                        path: self.path.clone(),
                        host: self.host.clone(),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
        }
    }
}

fn header_option(key: &str, value: &str) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
    }
}

fn grpc_code_for(status: u16) -> i32 {
    match status {
        STATUS_UNAUTHORIZED => GRPC_UNAUTHENTICATED,
        STATUS_BAD_REQUEST => GRPC_INVALID_ARGUMENT,
        _ => GRPC_PERMISSION_DENIED,
    }
}

impl From<&AuthorizationDecision> for CheckResponse {
    fn from(decision: &AuthorizationDecision) -> Self {
        match decision {
            AuthorizationDecision::Allow {
                headers_to_add,
                headers_to_remove,
            } => CheckResponse {
                status: Some(rpc::Status {
                    code: GRPC_OK,
                    message: String::new(),
                    details: Vec::new(),
                }),
                http_response: Some(HttpResponse::OkResponse(OkHttpResponse {
                    headers: headers_to_add
                        .iter()
                        .map(|h| header_option(&h.key, &h.value))
                        .collect(),
                    headers_to_remove: headers_to_remove.clone(),
                    response_headers_to_add: Vec::new(),
                })),
            },
            AuthorizationDecision::Deny { status, reason } => CheckResponse {
                status: Some(rpc::Status {
                    code: grpc_code_for(*status),
                    message: reason.clone(),
                    details: Vec::new(),
                }),
                http_response: Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
                    status: Some(HttpStatus {
                        code: i32::from(*status),
                    }),
                    headers: Vec::new(),
                    body: reason.clone(),
                })),
            },
        }
    }
}

/// 从 CheckResponse 还原授权决策，客户端和测试使用
pub fn decision_from_response(response: &CheckResponse) -> Option<AuthorizationDecision> {
    match response.http_response.as_ref()? {
        HttpResponse::OkResponse(ok) => Some(AuthorizationDecision::allow(
            ok.headers
                .iter()
                .filter_map(|option| option.header.as_ref())
                .map(|h| wirepact_common::HeaderEntry::new(&h.key, &h.value))
                .collect(),
            ok.headers_to_remove.clone(),
        )),
        HttpResponse::DeniedResponse(denied) => {
            let status = denied
                .status
                .as_ref()
                .and_then(|s| u16::try_from(s.code).ok())?;
            Some(AuthorizationDecision::deny(status, &denied.body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wirepact_common::{DenyKind, HeaderEntry, HTTP_AUTHORIZATION_HEADER, WIREPACT_IDENTITY_HEADER};

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut request = HttpAttributes::new("GET", "api", "/").to_check_request();
        if let Some(http) = request
            .attributes
            .as_mut()
            .and_then(|a| a.request.as_mut())
            .and_then(|r| r.http.as_mut())
        {
            http.headers
                .insert("Authorization".to_string(), "Basic Zm9vOmJhcg==".to_string());
        }

        let attributes = HttpAttributes::from_check_request(request).unwrap();
        assert_eq!(attributes.header("authorization"), Some("Basic Zm9vOmJhcg=="));
        assert_eq!(attributes.header("AUTHORIZATION"), Some("Basic Zm9vOmJhcg=="));
    }

    #[test]
    fn test_request_without_http_attributes_is_invalid_argument() {
        let status = HttpAttributes::from_check_request(CheckRequest { attributes: None })
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = HttpAttributes::from_check_request(CheckRequest {
            attributes: Some(AttributeContext::default()),
        })
        .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_attributes_survive_check_request() {
        let attributes = HttpAttributes::new("POST", "orders.svc", "/orders")
            .with_id("req-1")
            .with_header(WIREPACT_IDENTITY_HEADER, "token");

        let extracted = HttpAttributes::from_check_request(attributes.to_check_request()).unwrap();
        assert_eq!(extracted, attributes);
    }

    #[test]
    fn test_allow_becomes_ok_response() {
        let decision = AuthorizationDecision::allow(
            vec![HeaderEntry::new(WIREPACT_IDENTITY_HEADER, "token")],
            vec![HTTP_AUTHORIZATION_HEADER.to_string()],
        );
        let response = CheckResponse::from(&decision);

        assert_eq!(response.status.as_ref().map(|s| s.code), Some(GRPC_OK));
        match response.http_response {
            Some(HttpResponse::OkResponse(ok)) => {
                assert_eq!(ok.headers.len(), 1);
                let header = ok.headers[0].header.as_ref().unwrap();
                assert_eq!(header.key, WIREPACT_IDENTITY_HEADER);
                assert_eq!(header.value, "token");
                assert_eq!(
                    ok.headers[0].append_action,
                    HeaderAppendAction::OverwriteIfExistsOrAdd as i32
                );
                assert_eq!(ok.headers_to_remove, vec![HTTP_AUTHORIZATION_HEADER]);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[rstest]
    #[case(DenyKind::Malformed, GRPC_INVALID_ARGUMENT)]
    #[case(DenyKind::Expired, GRPC_UNAUTHENTICATED)]
    #[case(DenyKind::BadSignature, GRPC_UNAUTHENTICATED)]
    #[case(DenyKind::UntrustedIssuer, GRPC_PERMISSION_DENIED)]
    fn test_deny_becomes_denied_response(#[case] kind: DenyKind, #[case] code: i32) {
        let response = CheckResponse::from(&AuthorizationDecision::rejected(kind));

        assert_eq!(response.status.as_ref().map(|s| s.code), Some(code));
        match response.http_response {
            Some(HttpResponse::DeniedResponse(denied)) => {
                assert_eq!(
                    denied.status.map(|s| s.code),
                    Some(i32::from(kind.http_status()))
                );
                assert_eq!(denied.body, kind.reason());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_decision_from_response() {
        let decision = AuthorizationDecision::deny(403, "forbidden");
        let response = CheckResponse::from(&decision);
        assert_eq!(decision_from_response(&response), Some(decision));

        let decision = AuthorizationDecision::pass_through();
        let response = CheckResponse::from(&decision);
        assert_eq!(decision_from_response(&response), Some(decision));
    }
}
