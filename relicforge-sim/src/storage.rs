//! JSON file persistence for profiles and engine configuration.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use relicforge_engine::{ConfigError, ConfigLoader, EngineConfig, Profile, ProfileStorage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed profile {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid profile name {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Profiles stored as `<root>/<name>.json`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl ProfileStorage for JsonFileStorage {
    type Error = StorageError;

    fn save_profile(&self, name: &str, profile: &Profile) -> Result<(), Self::Error> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let json = serde_json::to_vec_pretty(profile).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(&json).map_err(io_error(&tmp))?;
        file.sync_all().map_err(io_error(&tmp))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_error(&path))?;
        log::debug!("saved profile {name} to {}", path.display());
        Ok(())
    }

    fn load_profile(&self, name: &str) -> Result<Option<Profile>, Self::Error> {
        let path = self.path_for(name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Json { path, source })
    }

    fn delete_profile(&self, name: &str) -> Result<(), Self::Error> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Engine configuration read from an optional JSON file.
#[derive(Debug, Clone, Default)]
pub struct JsonConfigLoader {
    path: Option<PathBuf>,
}

impl JsonConfigLoader {
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigLoader for JsonConfigLoader {
    type Error = StorageError;

    fn load_engine_config(&self) -> Result<EngineConfig, Self::Error> {
        let Some(path) = &self.path else {
            return Ok(EngineConfig::default());
        };
        let json = fs::read_to_string(path).map_err(io_error(path))?;
        Ok(EngineConfig::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relicforge_engine::Relicforge;

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "relicforge-storage-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn profiles_roundtrip_without_leaving_temp_files() {
        let root = temp_root("roundtrip");
        let storage = JsonFileStorage::new(&root);
        let profile = Profile::with_coins(321);
        storage.save_profile("main", &profile).unwrap();
        storage.save_profile("main", &profile).unwrap();

        assert_eq!(storage.load_profile("main").unwrap(), Some(profile));
        let leftovers: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());

        storage.delete_profile("main").unwrap();
        assert!(storage.load_profile("main").unwrap().is_none());
        storage.delete_profile("main").unwrap();
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn rejects_path_like_names() {
        let storage = JsonFileStorage::new(temp_root("names"));
        assert!(matches!(
            storage.load_profile("../escape"),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn config_loader_validates_through_the_host() {
        let root = temp_root("config");
        fs::create_dir_all(&root).unwrap();
        let path = root.join("engine.json");
        fs::write(&path, r#"{"merge":{"success_cap":1.5}}"#).unwrap();

        let host = Relicforge::new(
            JsonConfigLoader::new(Some(path)),
            JsonFileStorage::new(&root),
        );
        assert!(matches!(
            host.start(1),
            Err(StorageError::Config(ConfigError::RangeViolation { .. }))
        ));

        let host = Relicforge::new(JsonConfigLoader::default(), JsonFileStorage::new(&root));
        let engine = host.start(1).unwrap();
        assert_eq!(engine.action_cost(&Profile::default(), "merge").unwrap(), 50);
        let _ = fs::remove_dir_all(root);
    }
}
