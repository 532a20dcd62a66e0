//! WirePact PKI - 密钥材料引导与身份令牌
//!
//! 该模块负责翻译器的证书生命周期：从本地存储加载或向 PKI 服务申请
//! 根证书、私钥和叶子证书，并基于这些密钥材料签发和验证 WirePact 身份令牌。
//! 密钥材料在启动时引导一次，之后只读，可在请求之间无锁共享。

pub mod issuance;
pub mod store;
pub mod token;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use issuance::{HttpIssuanceClient, IssuanceClient, PkiEndpoint};
pub use store::{KeyMaterial, KeyStore, CA_FILENAME, CERT_FILENAME, KEY_FILENAME};
pub use token::{TokenIssuer, TokenVerifier};
