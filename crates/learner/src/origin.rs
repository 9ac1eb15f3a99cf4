//! Origin store access.
//!
//! The origin store is the controller-side storage where learned codes land
//! some seconds after a learn is triggered. It is written by another process
//! with no notification, so every read here goes to disk and nothing is
//! cached between scans.
//!
//! Each controller is one shard. A shard maps `device -> command -> code`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::document::{read_json, write_json};
use crate::error::StoreError;
use crate::types::OriginKey;

/// Commands of one shard: `device -> command -> code`.
pub type ShardData = BTreeMap<String, BTreeMap<String, String>>;

/// Trait for the external store learned codes are written to.
#[async_trait]
pub trait OriginStore: Send + Sync {
    /// Names of all shards currently present.
    async fn list_shards(&self) -> Result<Vec<String>, StoreError>;

    /// Read one shard.
    async fn read_shard(&self, shard: &str) -> Result<ShardData, StoreError>;

    /// Delete a single command. Returns `false` if it was not present.
    async fn delete_command(
        &self,
        shard: &str,
        device_name: &str,
        command_name: &str,
    ) -> Result<bool, StoreError>;
}

/// Location and value of a code found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginHit {
    pub shard: String,
    pub device_name: String,
    pub value: String,
}

/// Point-in-time copy of every shard.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct OriginSnapshot {
    shards: BTreeMap<String, ShardData>,
}

impl OriginSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_shard(&mut self, shard: impl Into<String>, data: ShardData) {
        self.shards.insert(shard.into(), data);
    }

    #[must_use]
    pub fn shard(&self, shard: &str) -> Option<&ShardData> {
        self.shards.get(shard)
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn command_count(&self) -> usize {
        self.shards
            .values()
            .flat_map(|devices| devices.values())
            .map(BTreeMap::len)
            .sum()
    }

    fn scoped<'a>(
        &'a self,
        only_shard: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a String, &'a ShardData)> + 'a {
        self.shards
            .iter()
            .filter(move |(name, _)| only_shard.map_or(true, |s| s == name.as_str()))
    }

    /// Look up `key` directly. Shards are visited in name order and the first
    /// hit wins.
    #[must_use]
    pub fn find_exact(&self, key: &OriginKey, only_shard: Option<&str>) -> Option<OriginHit> {
        self.scoped(only_shard).find_map(|(shard, devices)| {
            devices
                .get(&key.device_name)
                .and_then(|commands| commands.get(&key.command_name))
                .map(|value| OriginHit {
                    shard: shard.clone(),
                    device_name: key.device_name.clone(),
                    value: value.clone(),
                })
        })
    }

    /// Every device carrying `command_name`, whatever the device is called.
    #[must_use]
    pub fn find_by_command(&self, command_name: &str, only_shard: Option<&str>) -> Vec<OriginHit> {
        self.scoped(only_shard)
            .flat_map(|(shard, devices)| {
                devices.iter().filter_map(move |(device, commands)| {
                    commands.get(command_name).map(|value| OriginHit {
                        shard: shard.clone(),
                        device_name: device.clone(),
                        value: value.clone(),
                    })
                })
            })
            .collect()
    }
}

/// Read-only scanner over an [`OriginStore`].
#[derive(Clone)]
pub struct OriginReader {
    store: Arc<dyn OriginStore>,
}

impl OriginReader {
    pub fn new(store: Arc<dyn OriginStore>) -> Self {
        Self { store }
    }

    /// Snapshot every shard. Unreadable shards are left out of this scan.
    pub async fn scan(&self) -> OriginSnapshot {
        let mut snapshot = OriginSnapshot::new();

        let shards = match self.store.list_shards().await {
            Ok(shards) => shards,
            Err(e) => {
                debug!(error = %e, "Origin store listing failed, treating as empty");
                return snapshot;
            }
        };

        for shard in shards {
            match self.store.read_shard(&shard).await {
                Ok(data) => snapshot.insert_shard(shard, data),
                Err(e) => {
                    debug!(shard = %shard, error = %e, "Shard unreadable this scan");
                }
            }
        }

        snapshot
    }
}

/// Origin store backed by a directory of JSON storage files, one per controller.
///
/// Files are either a bare `device -> command -> code` map or a storage
/// envelope `{"version": 1, "key": "...", "data": {...}}`. The shard name is
/// the file name without a `.json` extension.
#[derive(Debug, Clone)]
pub struct JsonOriginStore {
    dir: PathBuf,
}

impl JsonOriginStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    async fn shard_path(&self, shard: &str) -> PathBuf {
        let with_ext = self.dir.join(format!("{shard}.json"));
        if fs::try_exists(&with_ext).await.unwrap_or(false) {
            with_ext
        } else {
            self.dir.join(shard)
        }
    }
}

fn is_envelope(value: &Value) -> bool {
    value.get("data").is_some_and(Value::is_object)
        && (value.get("version").is_some() || value.get("key").is_some())
}

fn commands_root(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    if is_envelope(value) {
        value.get("data").and_then(Value::as_object)
    } else {
        value.as_object()
    }
}

fn commands_root_mut(value: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    if is_envelope(value) {
        value.get_mut("data").and_then(Value::as_object_mut)
    } else {
        value.as_object_mut()
    }
}

/// Parse a shard document. Non-string codes (toggle lists and the like) are skipped.
fn parse_shard(path: &Path, value: &Value) -> Result<ShardData, StoreError> {
    let root = commands_root(value).ok_or_else(|| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: "expected a JSON object".to_string(),
    })?;

    let mut data = ShardData::new();
    for (device, commands) in root {
        let Some(commands) = commands.as_object() else {
            continue;
        };
        let parsed: BTreeMap<String, String> = commands
            .iter()
            .filter_map(|(name, code)| code.as_str().map(|c| (name.clone(), c.to_string())))
            .collect();
        data.insert(device.clone(), parsed);
    }
    Ok(data)
}

#[async_trait]
impl OriginStore for JsonOriginStore {
    async fn list_shards(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|source| StoreError::Read {
                path: self.dir.clone(),
                source,
            })?;

        let mut shards = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::Read {
                path: self.dir.clone(),
                source,
            })?
        {
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_file || name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            let shard = name.strip_suffix(".json").unwrap_or(&name).to_string();
            shards.push(shard);
        }
        shards.sort();
        Ok(shards)
    }

    async fn read_shard(&self, shard: &str) -> Result<ShardData, StoreError> {
        let path = self.shard_path(shard).await;
        match read_json(&path).await? {
            Some(value) => parse_shard(&path, &value),
            None => Ok(ShardData::new()),
        }
    }

    async fn delete_command(
        &self,
        shard: &str,
        device_name: &str,
        command_name: &str,
    ) -> Result<bool, StoreError> {
        let path = self.shard_path(shard).await;
        let Some(mut doc) = read_json(&path).await? else {
            return Ok(false);
        };

        let root = commands_root_mut(&mut doc).ok_or_else(|| StoreError::Malformed {
            path: path.clone(),
            reason: "expected a JSON object".to_string(),
        })?;

        let Some(commands) = root.get_mut(device_name).and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        if commands.remove(command_name).is_none() {
            return Ok(false);
        }
        if commands.is_empty() {
            root.remove(device_name);
        }

        write_json(&path, &doc).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn shard(entries: &[(&str, &str, &str)]) -> ShardData {
        let mut data = ShardData::new();
        for (device, command, value) in entries {
            data.entry((*device).to_string())
                .or_default()
                .insert((*command).to_string(), (*value).to_string());
        }
        data
    }

    #[test]
    fn test_find_exact_prefers_first_shard() {
        let mut snapshot = OriginSnapshot::new();
        snapshot.insert_shard("b_remote", shard(&[("tv", "power", "B")]));
        snapshot.insert_shard("a_remote", shard(&[("tv", "power", "A")]));

        let hit = snapshot
            .find_exact(&OriginKey::new("tv", "power"), None)
            .unwrap();
        assert_eq!(hit.shard, "a_remote");
        assert_eq!(hit.value, "A");

        let scoped = snapshot
            .find_exact(&OriginKey::new("tv", "power"), Some("b_remote"))
            .unwrap();
        assert_eq!(scoped.value, "B");
    }

    #[test]
    fn test_find_by_command_ignores_device_name() {
        let mut snapshot = OriginSnapshot::new();
        snapshot.insert_shard(
            "remote",
            shard(&[("tv", "power", "X"), ("amp", "power", "Y"), ("amp", "mute", "Z")]),
        );

        let hits = snapshot.find_by_command("power", None);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.device_name == "amp" && h.value == "Y"));
        assert!(snapshot.find_by_command("volume_up", None).is_empty());
        assert_eq!(snapshot.command_count(), 3);
    }

    #[tokio::test]
    async fn test_json_store_reads_envelope_and_bare() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("broadlink_remote_aa_codes"),
            json!({"version": 1, "key": "broadlink_remote_aa_codes", "data": {
                "tv": {"power": "JgBQ", "toggle": ["a", "b"]}
            }})
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("bedroom.json"),
            json!({"fan": {"speed_1": "JgCC"}}).to_string(),
        )
        .unwrap();

        let reader = OriginReader::new(Arc::new(JsonOriginStore::new(temp_dir.path())));
        let snapshot = reader.scan().await;

        assert_eq!(snapshot.shard_count(), 2);
        let remote = snapshot.shard("broadlink_remote_aa_codes").unwrap();
        assert_eq!(remote["tv"]["power"], "JgBQ");
        assert!(!remote["tv"].contains_key("toggle"));
        assert_eq!(snapshot.shard("bedroom").unwrap()["fan"]["speed_1"], "JgCC");
    }

    #[tokio::test]
    async fn test_unreadable_shard_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{{{").unwrap();
        std::fs::write(
            temp_dir.path().join("good.json"),
            json!({"tv": {"power": "X"}}).to_string(),
        )
        .unwrap();

        let reader = OriginReader::new(Arc::new(JsonOriginStore::new(temp_dir.path())));
        let snapshot = reader.scan().await;

        assert_eq!(snapshot.shard_count(), 1);
        assert!(snapshot
            .find_exact(&OriginKey::new("tv", "power"), None)
            .is_some());
    }

    #[tokio::test]
    async fn test_missing_directory_scans_empty() {
        let reader = OriginReader::new(Arc::new(JsonOriginStore::new(
            "/nonexistent/learner/origin",
        )));
        assert_eq!(reader.scan().await.shard_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_command_keeps_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("remote_codes");
        std::fs::write(
            &path,
            json!({"version": 1, "key": "remote_codes", "data": {
                "tv": {"power": "X"},
                "amp": {"power": "Y", "mute": "Z"}
            }})
            .to_string(),
        )
        .unwrap();

        let store = JsonOriginStore::new(temp_dir.path());
        assert!(store.delete_command("remote_codes", "tv", "power").await.unwrap());
        assert!(store.delete_command("remote_codes", "amp", "mute").await.unwrap());
        assert!(!store.delete_command("remote_codes", "amp", "mute").await.unwrap());

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["version"], 1);
        assert!(doc["data"].get("tv").is_none());
        assert_eq!(doc["data"]["amp"]["power"], "Y");
    }
}
