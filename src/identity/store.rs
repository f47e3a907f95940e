//! 凭据存储
//!
//! 对应浏览器端的本地存储：按键读取 token 或用户 ID。

use std::path::PathBuf;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// 本地凭据存储
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// 内存凭据存储，登录 / 登出时由宿主写入
#[derive(Default)]
pub struct MemoryCredentialStore {
    data: DashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.value().clone())
    }
}

/// JSON 文件凭据存储
///
/// 解析结果按文件的修改时间与长度缓存，每次查询只做一次 `metadata` 调用；
/// 外部登录 / 登出改写文件后，下一次查询重新读取，无需重启。
/// 文件缺失或格式错误视为没有凭据。
pub struct FileCredentialStore {
    path: PathBuf,
    cache: Mutex<Option<CachedCredentials>>,
}

struct CachedCredentials {
    modified: SystemTime,
    len: u64,
    values: Map<String, Value>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    fn read_value(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.lock();

        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) => {
                debug!(
                    "Credential file {} unreadable: {}",
                    self.path.display(),
                    e
                );
                *cache = None;
                return None;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let len = metadata.len();

        let fresh = cache
            .as_ref()
            .is_some_and(|c| c.modified == modified && c.len == len);
        if !fresh {
            trace!("Reloading credential file {}", self.path.display());
            *cache = Some(CachedCredentials {
                modified,
                len,
                values: self.load_values(),
            });
        }

        cache.as_ref().and_then(|c| c.values.get(key).cloned())
    }

    fn load_values(&self) -> Map<String, Value> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!(
                    "Credential file {} unreadable: {}",
                    self.path.display(),
                    e
                );
                return Map::new();
            }
        };

        serde_json::from_str::<Map<String, Value>>(&content).unwrap_or_else(|e| {
            debug!(
                "Credential file {} is not a JSON object: {}",
                self.path.display(),
                e
            );
            Map::new()
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_value(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_remove() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get("user_id"), None);

        store.set("user_id", "u1");
        assert_eq!(store.get("user_id").as_deref(), Some("u1"));

        assert_eq!(store.remove("user_id").as_deref(), Some("u1"));
        assert_eq!(store.get("user_id"), None);
    }

    #[test]
    fn test_file_store_reads_strings_and_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"user_id": 1234, "access_token": "abc", "flag": true}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get("user_id").as_deref(), Some("1234"));
        assert_eq!(store.get("access_token").as_deref(), Some("abc"));
        assert_eq!(store.get("flag"), None);
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_file_store_observes_logout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"user_id": "u1"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get("user_id").as_deref(), Some("u1"));

        std::fs::remove_file(&path).unwrap();
        assert_eq!(store.get("user_id"), None);
    }

    #[test]
    fn test_file_store_reloads_after_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"user_id": "u1"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get("user_id").as_deref(), Some("u1"));
        // 命中缓存
        assert_eq!(store.get("user_id").as_deref(), Some("u1"));

        // 长度不同，即使修改时间精度不足也会重新读取
        std::fs::write(&path, r#"{"user_id": "user-2"}"#).unwrap();
        assert_eq!(store.get("user_id").as_deref(), Some("user-2"));

        std::fs::write(&path, "{}").unwrap();
        assert_eq!(store.get("user_id"), None);
    }

    #[test]
    fn test_file_store_malformed_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert_eq!(FileCredentialStore::new(&path).get("user_id"), None);
    }
}
