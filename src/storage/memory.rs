use std::collections::HashMap;

use super::{StorageBackend, StorageError};

/// In-process backend with an optional byte quota, mirroring the limits of
/// browser-style local storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose keys and values together may not exceed `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            values: HashMap::new(),
            quota: Some(quota),
        }
    }

    /// Bytes currently held, keys included.
    pub fn used_bytes(&self) -> usize {
        self.values.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            let current = self.values.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let available = quota.saturating_sub(self.used_bytes() - current);
            let required = key.len() + value.len();
            if required > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    required,
                    available,
                });
            }
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.values.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_counts_existing_keys() {
        let mut backend = MemoryBackend::with_quota(20);
        backend.write("a", "123456789").unwrap();
        // 10 used, 10 left
        assert!(backend.write("b", "123456789").is_ok());
        assert!(matches!(
            backend.write("c", "1"),
            Err(StorageError::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn test_overwrite_frees_previous_value() {
        let mut backend = MemoryBackend::with_quota(12);
        backend.write("k", "12345678901").unwrap();
        assert!(backend.write("k", "abcdefghijk").is_ok());
        assert_eq!(backend.read("k").unwrap().as_deref(), Some("abcdefghijk"));
    }

    #[test]
    fn test_unbounded() {
        let mut backend = MemoryBackend::new();
        backend.write("k", &"x".repeat(1_000_000)).unwrap();
        assert_eq!(backend.used_bytes(), 1_000_001);
        backend.remove("k").unwrap();
        assert_eq!(backend.read("k").unwrap(), None);
    }
}
