use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chorus::FeedConfig;
use nrelay::{Pubkey, RelayDescriptor};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_RELAYS: [&str; 4] = [
    "wss://nos.lol",
    "wss://relay.damus.io",
    "wss://relay.snort.social",
    "wss://nostr.mom",
];

const SETTINGS_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct DataPath {
    base: PathBuf,
}

impl DataPath {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self { base }
    }

    pub fn default_base() -> Option<PathBuf> {
        dirs::data_local_dir().map(|pb| pb.join("chorus"))
    }

    pub fn rel_path(&self, typ: DataPathType) -> PathBuf {
        match typ {
            DataPathType::Log => PathBuf::from("logs"),
            DataPathType::Setting => PathBuf::from("settings"),
        }
    }

    pub fn path(&self, typ: DataPathType) -> PathBuf {
        self.base.join(self.rel_path(typ))
    }
}

impl Default for DataPath {
    fn default() -> Self {
        Self::new(Self::default_base().unwrap_or_else(|| PathBuf::from(".")))
    }
}

pub enum DataPathType {
    Log,
    Setting,
}

/// What the client remembers between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relays: Vec<RelayDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<Pubkey>,
    pub feed: FeedConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            relays: DEFAULT_RELAYS
                .iter()
                .map(|url| RelayDescriptor::read_write(*url))
                .collect(),
            pubkey: None,
            feed: FeedConfig::default(),
        }
    }
}

impl Settings {
    fn file(path: &DataPath) -> PathBuf {
        path.path(DataPathType::Setting).join(SETTINGS_FILE)
    }

    /// Read `settings/config.json`, writing the defaults there first if it
    /// does not exist yet
    pub fn load(path: &DataPath) -> chorus::Result<Self> {
        let file = Self::file(path);
        match fs::read_to_string(&file) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no settings at {}, writing defaults", file.display());
                let settings = Settings::default();
                settings.save(path)?;
                Ok(settings)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &DataPath) -> chorus::Result<()> {
        let file = Self::file(path);
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&file, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = DataPath::new(dir.path());

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.relays.len(), 4);
        assert!(settings.relays.iter().all(|r| r.read && r.write && r.enabled));
        assert!(dir.path().join("settings").join("config.json").exists());

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = DataPath::new(dir.path());
        let settings_dir = dir.path().join("settings");
        fs::create_dir_all(&settings_dir).unwrap();
        fs::write(
            settings_dir.join("config.json"),
            r#"{"relays":[{"url":"wss://nos.lol","write":false}],"feed":{"poll_interval_secs":30}}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.relays.len(), 1);
        assert!(settings.relays[0].read);
        assert!(!settings.relays[0].write);
        assert_eq!(settings.feed.poll_interval_secs, 30);
        assert_eq!(settings.feed.query_chunk_size, 25);
        assert!(settings.pubkey.is_none());
    }

    #[test]
    fn test_garbage_settings_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = DataPath::new(dir.path());
        let settings_dir = dir.path().join("settings");
        fs::create_dir_all(&settings_dir).unwrap();
        fs::write(settings_dir.join("config.json"), "{nope").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(chorus::Error::Json(_))
        ));
    }
}
