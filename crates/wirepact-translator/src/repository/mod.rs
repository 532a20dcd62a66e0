//! 用户仓库
//!
//! 在 Basic Auth 凭证与 WirePact 用户标识之间建立映射。每个进程只使用一个后端：
//! 本地 CSV 文件，或者当前命名空间中的 Kubernetes Secret。

mod csv_file;
mod secret;

pub use csv_file::CsvRepository;
pub use secret::{parse_secret_entries, KubernetesSecretRepository, SecretEntry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::TranslatorConfig;
use wirepact_common::error::IntoError;
use wirepact_common::{Error, Result};

/// 用户标识查询
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 根据用户名和密码查找用户标识
    async fn lookup_user_id(&self, username: &str, password: &str) -> Result<Option<String>>;

    /// 根据用户标识查找用户名和密码
    async fn lookup_username_and_password(&self, user_id: &str)
        -> Result<Option<(String, String)>>;
}

/// 用户仓库后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum RepositoryKind {
    /// 本地 CSV 文件
    #[default]
    Csv,
    /// Kubernetes Secret
    Kubernetes,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryKind::Csv => write!(f, "csv"),
            RepositoryKind::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

impl FromStr for RepositoryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(RepositoryKind::Csv),
            "kubernetes" => Ok(RepositoryKind::Kubernetes),
            _ => format!("无效的用户仓库类型: {}", s).into_error(Error::Config),
        }
    }
}

impl TryFrom<String> for RepositoryKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// 按配置创建用户仓库
pub async fn from_config(config: &TranslatorConfig) -> Result<Arc<dyn UserRepository>> {
    match config.repository {
        RepositoryKind::Csv => {
            let path = config
                .csv_path
                .as_deref()
                .ok_or_else(|| Error::Config("使用 csv 仓库时必须设置 csv_path".to_string()))?;
            info!("使用 CSV 用户仓库 {}", path);
            Ok(Arc::new(CsvRepository::from_path(path)?))
        }
        RepositoryKind::Kubernetes => {
            let secret_name = config.k8s_secret_name.as_deref().ok_or_else(|| {
                Error::Config("使用 kubernetes 仓库时必须设置 k8s_secret_name".to_string())
            })?;
            info!("使用 Kubernetes Secret 用户仓库 {}", secret_name);
            let timeout = Duration::from_secs(config.lookup_timeout_secs);
            Ok(Arc::new(
                KubernetesSecretRepository::connect(secret_name, timeout).await?,
            ))
        }
    }
}
