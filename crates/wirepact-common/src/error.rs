//! 错误处理模块
//!
//! 该模块提供翻译器的统一错误处理机制。启动阶段的错误（密钥材料、
//! 配置）是致命的；单个请求内的错误由授权检查转换为拒绝决策，不会跨越请求边界。

use std::io;
use thiserror::Error;

/// WirePact 翻译器统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 网络错误（访问 PKI 或 Kubernetes API）
    #[error("网络错误: {0}")]
    Network(String),

    /// 证书或密钥无法解析、生成或校验
    #[error("PKI 错误: {0}")]
    Pki(String),

    /// 密钥材料引导失败
    #[error("密钥材料引导失败: {0}")]
    Bootstrap(String),

    /// 令牌签名失败，说明密钥材料已损坏
    #[error("令牌签名失败: {0}")]
    Signing(String),

    /// 用户仓库错误
    #[error("用户仓库错误: {0}")]
    Repository(String),

    /// Kubernetes 访问错误
    #[error("Kubernetes 错误: {0}")]
    Kubernetes(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// WirePact 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 从字符串创建错误
pub trait IntoError<T> {
    /// 将当前类型转换为错误
    fn into_error(self, kind: fn(String) -> Error) -> Result<T>;
}

impl<T> IntoError<T> for String {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self))
    }
}

impl<T> IntoError<T> for &str {
    fn into_error(self, kind: fn(String) -> Error) -> Result<T> {
        Err(kind(self.to_string()))
    }
}
