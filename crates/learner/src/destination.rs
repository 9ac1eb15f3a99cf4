//! Destination stores: the device document and the profile library.
//!
//! Both are plain JSON files edited by other parts of the application. Every
//! write here is a locked read-modify-write of one document and refuses to
//! recreate a record that has been deleted in the meantime.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::document::{read_json, write_json, DocumentLocks};
use crate::error::StoreError;
use crate::types::CommandKind;

/// Result of a destination write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    /// The owning record no longer exists. Nothing was written.
    DestinationGone,
}

/// Device records: `device_id -> { name, commands: { command -> {value, type} } }`.
#[derive(Debug, Clone)]
pub struct DeviceDocument {
    path: PathBuf,
    locks: DocumentLocks,
}

impl DeviceDocument {
    pub fn new(path: impl AsRef<Path>, locks: DocumentLocks) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            locks,
        }
    }

    async fn load(&self) -> Result<Map<String, Value>, StoreError> {
        match read_json(&self.path).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(StoreError::Malformed {
                path: self.path.clone(),
                reason: "device document must be a JSON object".to_string(),
            }),
            None => Ok(Map::new()),
        }
    }

    /// Whether a device record with this id exists.
    pub async fn contains(&self, device_id: &str) -> Result<bool, StoreError> {
        Ok(self.load().await?.contains_key(device_id))
    }

    /// Current value of one command, if present.
    pub async fn command_value(
        &self,
        device_id: &str,
        command_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let devices = self.load().await?;
        Ok(devices
            .get(device_id)
            .and_then(|d| d.get("commands"))
            .and_then(|c| c.get(command_name))
            .and_then(|c| c.get("value"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    /// Set `command_name` on an existing device.
    ///
    /// An existing command keeps its recorded type; new commands get `kind`.
    pub async fn set_command(
        &self,
        device_id: &str,
        command_name: &str,
        value: &str,
        kind: CommandKind,
    ) -> Result<WriteOutcome, StoreError> {
        let _guard = self.locks.lock(&self.path).await;
        let mut devices = self.load().await?;

        let Some(device) = devices.get_mut(device_id).and_then(Value::as_object_mut) else {
            return Ok(WriteOutcome::DestinationGone);
        };

        let commands = device
            .entry("commands")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(commands) = commands.as_object_mut() else {
            return Err(StoreError::Malformed {
                path: self.path.clone(),
                reason: format!("commands of device '{device_id}' is not an object"),
            });
        };

        let kind = commands
            .get(command_name)
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            .map_or_else(|| kind.as_str().to_string(), String::from);
        commands.insert(
            command_name.to_string(),
            json!({ "value": value, "type": kind }),
        );

        write_json(&self.path, &Value::Object(devices)).await?;
        debug!(device = %device_id, command = %command_name, "Device command written");
        Ok(WriteOutcome::Written)
    }
}

/// Metadata of one profile file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    /// Path relative to the library root, e.g. `climate/1000.json`.
    pub profile_path: PathBuf,
    pub platform: String,
    pub code: u32,
    pub manufacturer: String,
    pub models: Vec<String>,
}

/// Profile library: `<root>/<platform>/<code>.json`.
#[derive(Debug, Clone)]
pub struct ProfileLibrary {
    root: PathBuf,
    locks: DocumentLocks,
}

impl ProfileLibrary {
    pub fn new(root: impl AsRef<Path>, locks: DocumentLocks) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks,
        }
    }

    fn full_path(&self, profile_path: &Path) -> PathBuf {
        self.root.join(profile_path)
    }

    /// List every profile, optionally restricted to one platform.
    ///
    /// Files whose name is not a numeric code, or that fail to parse, are skipped.
    pub async fn profiles(&self, platform: Option<&str>) -> Result<Vec<ProfileSummary>, StoreError> {
        let mut summaries = Vec::new();

        for platform_name in self.platforms().await? {
            if platform.is_some_and(|p| p != platform_name) {
                continue;
            }
            let dir = self.root.join(&platform_name);
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|source| StoreError::Read {
                    path: dir.clone(),
                    source,
                })?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| StoreError::Read {
                    path: dir.clone(),
                    source,
                })?
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(code) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u32>().ok())
                else {
                    continue;
                };

                let doc = match read_json(&path).await {
                    Ok(Some(doc)) => doc,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Skipping unreadable profile");
                        continue;
                    }
                };

                summaries.push(ProfileSummary {
                    profile_path: PathBuf::from(&platform_name).join(format!("{code}.json")),
                    platform: platform_name.clone(),
                    code,
                    manufacturer: doc["manufacturer"].as_str().unwrap_or_default().to_string(),
                    models: profile_models(&doc),
                });
            }
        }

        summaries.sort_by(|a, b| a.profile_path.cmp(&b.profile_path));
        Ok(summaries)
    }

    async fn platforms(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut platforms = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::Read {
                path: self.root.clone(),
                source,
            })?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                platforms.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        platforms.sort();
        Ok(platforms)
    }

    /// Current value at a `/`-separated command path, if it is a string.
    pub async fn command_value(
        &self,
        profile_path: &Path,
        command_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(doc) = read_json(&self.full_path(profile_path)).await? else {
            return Ok(None);
        };
        let mut node = &doc["commands"];
        for segment in command_name.split('/') {
            node = &node[segment];
        }
        Ok(node.as_str().map(String::from))
    }

    /// Set a command inside an existing profile.
    ///
    /// `command_name` may be a `/`-separated path for commands nested by mode,
    /// e.g. `cool/auto/24`. Missing intermediate objects are created.
    pub async fn set_command(
        &self,
        profile_path: &Path,
        command_name: &str,
        value: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let path = self.full_path(profile_path);
        let _guard = self.locks.lock(&path).await;

        let Some(mut doc) = read_json(&path).await? else {
            return Ok(WriteOutcome::DestinationGone);
        };
        let Some(root) = doc.as_object_mut() else {
            return Err(StoreError::Malformed {
                path,
                reason: "profile must be a JSON object".to_string(),
            });
        };

        let mut node = root
            .entry("commands")
            .or_insert_with(|| Value::Object(Map::new()));
        let segments: Vec<&str> = command_name.split('/').collect();
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| StoreError::Malformed {
                path: path.clone(),
                reason: "empty command name".to_string(),
            })?;

        for segment in parents {
            let Some(map) = node.as_object_mut() else {
                return Err(conflict(&path, command_name));
            };
            node = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let Some(map) = node.as_object_mut() else {
            return Err(conflict(&path, command_name));
        };
        map.insert((*leaf).to_string(), Value::String(value.to_string()));

        write_json(&path, &doc).await?;
        debug!(profile = %profile_path.display(), command = %command_name, "Profile command written");
        Ok(WriteOutcome::Written)
    }
}

fn conflict(path: &Path, command_name: &str) -> StoreError {
    StoreError::Malformed {
        path: path.to_path_buf(),
        reason: format!("command path '{command_name}' crosses a non-object value"),
    }
}

fn profile_models(doc: &Value) -> Vec<String> {
    let mut models: Vec<String> = doc["supportedModels"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if let Some(model) = doc["model"].as_str() {
        models.push(model.to_string());
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, value: &Value) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, value.to_string()).unwrap();
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_device_write_keeps_existing_type() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        write(
            &path,
            &json!({"tv": {"name": "TV", "commands": {"power": {"value": "pending", "type": "rf"}}}}),
        );

        let devices = DeviceDocument::new(&path, DocumentLocks::new());
        let outcome = devices
            .set_command("tv", "power", "JgBQ", CommandKind::Ir)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let doc = read(&path);
        assert_eq!(doc["tv"]["commands"]["power"]["value"], "JgBQ");
        assert_eq!(doc["tv"]["commands"]["power"]["type"], "rf");
        assert_eq!(doc["tv"]["name"], "TV");
    }

    #[tokio::test]
    async fn test_device_write_missing_device_is_gone() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        write(&path, &json!({"tv": {"commands": {}}}));

        let devices = DeviceDocument::new(&path, DocumentLocks::new());
        let outcome = devices
            .set_command("radio", "power", "X", CommandKind::Ir)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::DestinationGone);
        assert!(read(&path).get("radio").is_none());
    }

    #[tokio::test]
    async fn test_device_write_creates_commands_map() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devices.json");
        write(&path, &json!({"fan": {"name": "Fan"}}));

        let devices = DeviceDocument::new(&path, DocumentLocks::new());
        devices
            .set_command("fan", "speed_1", "X", CommandKind::Rf)
            .await
            .unwrap();
        assert_eq!(
            devices.command_value("fan", "speed_1").await.unwrap().as_deref(),
            Some("X")
        );
        assert_eq!(read(&path)["fan"]["commands"]["speed_1"]["type"], "rf");
    }

    #[tokio::test]
    async fn test_profile_nested_write() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("climate/1000.json");
        write(
            &file,
            &json!({"manufacturer": "LG", "supportedModels": ["AKB74955603"], "commands": {"off": "X"}}),
        );

        let library = ProfileLibrary::new(temp_dir.path(), DocumentLocks::new());
        let profile = Path::new("climate/1000.json");
        library
            .set_command(profile, "cool/auto/24", "JgBQ")
            .await
            .unwrap();

        let doc = read(&file);
        assert_eq!(doc["commands"]["cool"]["auto"]["24"], "JgBQ");
        assert_eq!(doc["commands"]["off"], "X");
        assert_eq!(
            library
                .command_value(profile, "cool/auto/24")
                .await
                .unwrap()
                .as_deref(),
            Some("JgBQ")
        );
    }

    #[tokio::test]
    async fn test_profile_write_through_leaf_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write(
            &temp_dir.path().join("climate/1000.json"),
            &json!({"manufacturer": "LG", "commands": {"off": "X"}}),
        );
        let library = ProfileLibrary::new(temp_dir.path(), DocumentLocks::new());
        let err = library
            .set_command(Path::new("climate/1000.json"), "off/auto", "Y")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_profile_write_missing_file_is_gone() {
        let temp_dir = TempDir::new().unwrap();
        let library = ProfileLibrary::new(temp_dir.path(), DocumentLocks::new());
        let outcome = library
            .set_command(Path::new("fan/1000.json"), "low", "X")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::DestinationGone);
        assert!(!temp_dir.path().join("fan/1000.json").exists());
    }

    #[tokio::test]
    async fn test_list_profiles() {
        let temp_dir = TempDir::new().unwrap();
        write(
            &temp_dir.path().join("climate/1000.json"),
            &json!({"manufacturer": "LG", "supportedModels": ["A", "B"], "commands": {}}),
        );
        write(
            &temp_dir.path().join("fan/2000.json"),
            &json!({"manufacturer": "Dyson", "model": "AM09", "commands": {}}),
        );
        write(&temp_dir.path().join("fan/notes.json"), &json!({}));

        let library = ProfileLibrary::new(temp_dir.path(), DocumentLocks::new());
        let all = library.profiles(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].code, 1000);
        assert_eq!(all[0].models, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(all[1].profile_path, PathBuf::from("fan/2000.json"));

        let fans = library.profiles(Some("fan")).await.unwrap();
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].manufacturer, "Dyson");
    }

    #[tokio::test]
    async fn test_missing_library_lists_nothing() {
        let library = ProfileLibrary::new("/nonexistent/learner/codes", DocumentLocks::new());
        assert!(library.profiles(None).await.unwrap().is_empty());
    }
}
