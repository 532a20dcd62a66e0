//! WirePact Common - 跨模块共享工具与数据结构
//!
//! 该模块提供翻译器中所有组件共享的数据结构、错误处理和常量。
//! 包括身份令牌声明、授权决策等数据模型以及统一的错误处理机制。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::credentials::*;
pub use models::decision::*;
pub use models::token::*;

/// 携带 Basic Auth 凭证的标准请求头
pub const HTTP_AUTHORIZATION_HEADER: &str = "authorization";

/// 在受信服务之间携带 WirePact 身份令牌的请求头
pub const WIREPACT_IDENTITY_HEADER: &str = "x-wirepact-identity";
