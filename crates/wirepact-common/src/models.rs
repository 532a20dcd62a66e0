//! 数据模型模块
//!
//! 该模块定义了翻译器使用的核心数据模型，包括身份令牌声明、
//! Basic Auth 凭证和授权决策，并提供序列化/反序列化功能。

pub mod token;
pub mod credentials;
pub mod decision;
