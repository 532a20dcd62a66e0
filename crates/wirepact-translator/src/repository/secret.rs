//! Kubernetes Secret 用户仓库
//!
//! Secret 的每个数据键是用户标识，值为 `username:password`。每次查询都重新读取
//! Secret，这样轮换凭证无需重启；单次读取受超时限制。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use std::time::Duration;
use tracing::{debug, warn};

use super::UserRepository;
use crate::kubernetes;
use wirepact_common::{Error, Result};

/// Secret 中的一条用户记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    /// 用户标识
    pub id: String,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

/// 解析 Secret 数据，无法解析的条目会被跳过
pub fn parse_secret_entries(secret: &Secret) -> Vec<SecretEntry> {
    let Some(data) = secret.data.as_ref() else {
        return Vec::new();
    };

    data.iter()
        .filter_map(|(id, value)| {
            let Ok(payload) = std::str::from_utf8(&value.0) else {
                warn!("Secret 条目 {} 不是 UTF-8，已跳过", id);
                return None;
            };
            match payload.split_once(':') {
                Some((username, password)) => Some(SecretEntry {
                    id: id.clone(),
                    username: username.to_string(),
                    password: password.to_string(),
                }),
                None => {
                    warn!("Secret 条目 {} 不是 username:password 格式，已跳过", id);
                    None
                }
            }
        })
        .collect()
}

/// 基于 Kubernetes Secret 的用户仓库
pub struct KubernetesSecretRepository {
    secrets: Api<Secret>,
    secret_name: String,
    timeout: Duration,
}

impl KubernetesSecretRepository {
    /// 连接当前命名空间，并确认 Secret 可读
    pub async fn connect(secret_name: &str, timeout: Duration) -> Result<Self> {
        let namespace = kubernetes::current_namespace().await;
        debug!(
            "使用命名空间 {} 中的 Secret {} 作为用户仓库",
            namespace, secret_name
        );

        let repository = Self {
            secrets: Api::namespaced(kubernetes::client().await?, &namespace),
            secret_name: secret_name.to_string(),
            timeout,
        };
        repository.load_entries().await?;

        Ok(repository)
    }

    async fn load_entries(&self) -> Result<Vec<SecretEntry>> {
        let secret = tokio::time::timeout(self.timeout, self.secrets.get(&self.secret_name))
            .await
            .map_err(|_| {
                Error::Repository(format!(
                    "读取 Secret {} 超时（{} 秒）",
                    self.secret_name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::Kubernetes(format!("无法读取 Secret {}: {}", self.secret_name, e))
            })?;

        Ok(parse_secret_entries(&secret))
    }
}

#[async_trait]
impl UserRepository for KubernetesSecretRepository {
    async fn lookup_user_id(&self, username: &str, password: &str) -> Result<Option<String>> {
        Ok(self
            .load_entries()
            .await?
            .into_iter()
            .find(|entry| entry.username == username && entry.password == password)
            .map(|entry| entry.id))
    }

    async fn lookup_username_and_password(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, String)>> {
        Ok(self
            .load_entries()
            .await?
            .into_iter()
            .find(|entry| entry.id == user_id)
            .map(|entry| (entry.username, entry.password)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, &[u8])]) -> Secret {
        let data: BTreeMap<String, ByteString> = entries
            .iter()
            .map(|(key, value)| (key.to_string(), ByteString(value.to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_entries() {
        let entries = parse_secret_entries(&secret(&[
            ("1", "alice:secret".as_bytes()),
            ("2", "bob:pass:with:colons".as_bytes()),
        ]));

        assert_eq!(
            entries,
            vec![
                SecretEntry {
                    id: "1".to_string(),
                    username: "alice".to_string(),
                    password: "secret".to_string(),
                },
                SecretEntry {
                    id: "2".to_string(),
                    username: "bob".to_string(),
                    password: "pass:with:colons".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let entries = parse_secret_entries(&secret(&[
            ("1", "no-colon".as_bytes()),
            ("2", &[0xff, 0xfe, b':'][..]),
            ("3", "carol:pw".as_bytes()),
        ]));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "3");
    }

    #[test]
    fn test_secret_without_data_is_empty() {
        assert!(parse_secret_entries(&Secret::default()).is_empty());
    }
}
