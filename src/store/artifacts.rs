//! 产物存储：保存执行器产出的报告，返回引用
//!
//! 路径由 (task_id, name) 单射确定，重放同一步骤只会覆盖同一文件，
//! 不同任务也不会落到同一文件。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::checkpoint::Artifact;
use crate::store::StoreError;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 写入产物，返回写入 result_refs 的引用
    async fn put(&self, task_id: &str, artifact: &Artifact) -> Result<String, StoreError>;

    /// 按引用读取
    async fn get(&self, reference: &str) -> Result<Option<String>, StoreError>;
}

/// 字母数字、`-`、`_` 原样保留，其余字节转义为 `%XX`
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// 写入 `{dir}/{task_id}/{name}.md`，两段分别转义
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, task_id: &str, name: &str) -> PathBuf {
        self.dir.join(escape(task_id)).join(format!("{}.md", escape(name)))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put(&self, task_id: &str, artifact: &Artifact) -> Result<String, StoreError> {
        let path = self.path_for(task_id, &artifact.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // 先写临时文件再改名，读者不会看到半个报告
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, artifact.content.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), "artifact written");
        Ok(path.display().to_string())
    }

    async fn get(&self, reference: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(reference).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存实现（测试），引用形如 `artifact://{task_id}/{name}`
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, task_id: &str, artifact: &Artifact) -> Result<String, StoreError> {
        let reference = format!("artifact://{}/{}", task_id, artifact.name);
        self.items
            .write()
            .await
            .insert(reference.clone(), artifact.content.clone());
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.read().await.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_overwrites_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path().join("files"));

        let first = store
            .put("task_1", &Artifact::report("v1".into()))
            .await
            .unwrap();
        let second = store
            .put("task_1", &Artifact::report("v2".into()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(PathBuf::from(&first).ends_with("task_1/report.md"));
        assert_eq!(store.get(&first).await.unwrap().as_deref(), Some("v2"));
        assert_eq!(std::fs::read_dir(dir.path().join("files/task_1")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let missing = dir.path().join("nope.md");
        assert!(store.get(&missing.display().to_string()).await.unwrap().is_none());
    }

    #[test]
    fn test_names_are_escaped() {
        let store = FileArtifactStore::new("/tmp/x");
        let path = store.path_for("../evil", "a b");
        assert_eq!(path, PathBuf::from("/tmp/x/%2E%2E%2Fevil/a%20b.md"));
        assert_eq!(escape("50%"), "50%25");
        assert_eq!(escape("任务"), "%E4%BB%BB%E5%8A%A1");
    }

    #[tokio::test]
    async fn test_similar_task_ids_do_not_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());

        let dotted = store
            .put("team.alpha", &Artifact::report("alpha report".into()))
            .await
            .unwrap();
        let underscored = store
            .put("team_alpha", &Artifact::report("beta report".into()))
            .await
            .unwrap();

        assert_ne!(dotted, underscored);
        assert_eq!(store.get(&dotted).await.unwrap().as_deref(), Some("alpha report"));
        assert_eq!(store.get(&underscored).await.unwrap().as_deref(), Some("beta report"));
    }

    #[tokio::test]
    async fn test_memory_store_reference() {
        let store = MemoryArtifactStore::new();
        let reference = store.put("t", &Artifact::report("x".into())).await.unwrap();
        assert_eq!(reference, "artifact://t/report");
        assert_eq!(store.len().await, 1);
    }
}
