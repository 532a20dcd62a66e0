//! 本地 CSV 用户仓库
//!
//! 文件包含表头 `id,username,password`，启动时整体读入内存。

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::UserRepository;
use wirepact_common::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct CsvEntry {
    id: String,
    username: String,
    password: String,
}

/// 基于 CSV 文件的用户仓库
#[derive(Debug, Clone)]
pub struct CsvRepository {
    entries: Vec<CsvEntry>,
}

impl CsvRepository {
    /// 从文件加载
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("从 {} 加载 CSV 用户仓库", path.display());

        let reader = csv::Reader::from_path(path)
            .map_err(|e| Error::Repository(format!("无法打开 {}: {}", path.display(), e)))?;
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let entries = reader
            .deserialize()
            .collect::<std::result::Result<Vec<CsvEntry>, _>>()
            .map_err(|e| Error::Repository(format!("CSV 格式错误: {}", e)))?;

        debug!("已加载 {} 个用户", entries.len());
        Ok(Self { entries })
    }

    /// 用户数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否没有任何用户
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl UserRepository for CsvRepository {
    async fn lookup_user_id(&self, username: &str, password: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.username == username && entry.password == password)
            .map(|entry| entry.id.clone()))
    }

    async fn lookup_username_and_password(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, String)>> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.id == user_id)
            .map(|entry| (entry.username.clone(), entry.password.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_lookup_in_both_directions() {
        let file = csv_file("id,username,password\n1,alice,secret\n2,bob,hunter2\n");
        let repository = CsvRepository::from_path(file.path()).unwrap();
        assert_eq!(repository.len(), 2);

        assert_eq!(
            repository.lookup_user_id("bob", "hunter2").await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(
            repository.lookup_username_and_password("1").await.unwrap(),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_wrong_password_or_unknown_id_is_miss() {
        let file = csv_file("id,username,password\n1,alice,secret\n");
        let repository = CsvRepository::from_path(file.path()).unwrap();

        tokio_test::block_on(async {
            assert_eq!(repository.lookup_user_id("alice", "wrong").await.unwrap(), None);
            assert_eq!(repository.lookup_user_id("carol", "secret").await.unwrap(), None);
            assert_eq!(repository.lookup_username_and_password("9").await.unwrap(), None);
        });
    }

    #[test]
    fn test_password_may_contain_colon() {
        let file = csv_file("id,username,password\n7,svc,\"a:b:c\"\n");
        let repository = CsvRepository::from_path(file.path()).unwrap();
        assert_eq!(repository.entries[0].password, "a:b:c");
    }

    #[test]
    fn test_header_only_is_empty() {
        let file = csv_file("id,username,password\n");
        let repository = CsvRepository::from_path(file.path()).unwrap();
        assert!(repository.is_empty());
    }

    #[test]
    fn test_missing_file_is_repository_error() {
        let result = CsvRepository::from_path("/nonexistent/users.csv");
        assert!(matches!(result, Err(Error::Repository(_))));
    }

    #[test]
    fn test_missing_column_is_repository_error() {
        let file = csv_file("id,username\n1,alice\n");
        let result = CsvRepository::from_path(file.path());
        assert!(matches!(result, Err(Error::Repository(_))));
    }
}
