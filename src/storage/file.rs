//! File-based storage backend

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::{Storage, StorageError, StorageResult};

/// File-based storage backend
///
/// Each key maps to one file under the base directory. Key bytes outside
/// `[A-Za-z0-9._-]` are percent-encoded so arbitrary keys (including the
/// `:`-separated index keys) stay filesystem-safe on every platform.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a file store rooted at `base_path`, creating the directory if
    /// needed
    pub fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        // Sync create in the constructor, matching the store's sync setup path
        std::fs::create_dir_all(&base_path)
            .map_err(|e| StorageError::Io(format!("failed to create {:?}: {}", base_path, e)))?;

        Ok(Self { base_path })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(encode_key(key))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("failed to read {:?}: {}", path, e))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.key_path(key);
        fs::write(&path, value)
            .await
            .map_err(|e| StorageError::Io(format!("failed to write {:?}: {}", path, e)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!(
                "failed to delete {:?}: {}",
                path, e
            ))),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| StorageError::Io(format!("failed to list {:?}: {}", self.base_path, e)))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = decode_key(name) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn decode_key(name: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut chars = name.bytes();
    while let Some(byte) = chars.next() {
        if byte == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}
