//! PKI 服务客户端
//!
//! 翻译器本身不是 CA，它通过 PKI 服务获取根证书并用 CSR 换取叶子证书。
//! 两个接口都返回 PEM 包装的 DER 证书。

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request, Uri};
use tracing::debug;

use wirepact_common::{Error, Result};

/// 默认的根证书路径
pub const DEFAULT_CA_PATH: &str = "/ca";
/// 默认的 CSR 路径
pub const DEFAULT_CSR_PATH: &str = "/csr";

/// 证书签发服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssuanceClient: Send + Sync {
    /// 获取根证书（PEM）
    async fn fetch_root_certificate(&self) -> Result<Vec<u8>>;

    /// 提交 PEM 编码的 PKCS#10 CSR，返回签发的证书（PEM）
    async fn sign_csr(&self, csr_pem: &[u8]) -> Result<Vec<u8>>;
}

/// PKI 服务地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiEndpoint {
    /// 基础地址，如 `http://wirepact-pki:8080`
    pub base_address: String,
    /// 根证书路径
    pub ca_path: String,
    /// CSR 路径
    pub csr_path: String,
}

impl PkiEndpoint {
    /// 使用默认路径创建
    pub fn new(base_address: &str) -> Self {
        Self {
            base_address: base_address.trim_end_matches('/').to_string(),
            ca_path: DEFAULT_CA_PATH.to_string(),
            csr_path: DEFAULT_CSR_PATH.to_string(),
        }
    }

    /// 根证书完整地址
    pub fn ca_address(&self) -> String {
        format!("{}{}", self.base_address, self.ca_path)
    }

    /// CSR 完整地址
    pub fn csr_address(&self) -> String {
        format!("{}{}", self.base_address, self.csr_path)
    }
}

/// 基于 hyper 的 PKI 客户端
pub struct HttpIssuanceClient {
    endpoint: PkiEndpoint,
    client: Client<HttpConnector>,
}

impl HttpIssuanceClient {
    /// 创建新的客户端
    pub fn new(endpoint: PkiEndpoint) -> Self {
        Self {
            endpoint,
            client: Client::new(),
        }
    }

    fn parse_uri(address: &str) -> Result<Uri> {
        address
            .parse::<Uri>()
            .map_err(|e| Error::Config(format!("无效的 PKI 地址 {}: {}", address, e)))
    }

    async fn send(&self, request: Request<Body>) -> Result<Vec<u8>> {
        let uri = request.uri().to_string();
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| Error::Network(format!("请求 {} 失败: {}", uri, e)))?;

        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| Error::Network(format!("读取 {} 的响应失败: {}", uri, e)))?;

        if !status.is_success() {
            return Err(Error::Network(format!(
                "PKI 服务 {} 返回状态码 {}",
                uri, status
            )));
        }

        debug!("从 {} 收到 {} 字节", uri, body.len());
        Ok(body.to_vec())
    }
}

#[async_trait]
impl IssuanceClient for HttpIssuanceClient {
    async fn fetch_root_certificate(&self) -> Result<Vec<u8>> {
        let uri = Self::parse_uri(&self.endpoint.ca_address())?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| Error::Network(e.to_string()))?;

        self.send(request).await
    }

    async fn sign_csr(&self, csr_pem: &[u8]) -> Result<Vec<u8>> {
        let uri = Self::parse_uri(&self.endpoint.csr_address())?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/pkcs10")
            .body(Body::from(csr_pem.to_vec()))
            .map_err(|e| Error::Network(e.to_string()))?;

        self.send(request).await
    }
}
