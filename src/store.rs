// ============================================================================
// ENV-FILE CONFIG STORE
// ============================================================================
// The dashboard's flat `KEY=VALUE` configuration (`config.env`):
// - Reads are lock-free through `ArcSwap`
// - Writers are serialized by an async mutex
// - A write merges into a copy, persists it (temp file + rename) and only
//   then swaps it in; a failed write leaves memory and disk untouched
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};

/// Flat key-value configuration map
pub type EnvMap = BTreeMap<String, String>;

// ----------------------------------------------------------------------------
// File Layout
// ----------------------------------------------------------------------------

const HEADER: &str = "# DevEnv remote development environment configuration";

/// Known keys in file order, grouped by section, with the values written when
/// a key has never been set.
const SECTIONS: &[(&str, &[(&str, &str)])] = &[
    (
        "Remote server",
        &[
            ("SSH_ALIAS", "remote-server"),
            ("REMOTE_HOST", "192.168.1.100"),
            ("REMOTE_USER", "user"),
            ("REMOTE_PROJECT_PATH", "/tmp/workspace"),
            ("SSH_PORT", "22"),
        ],
    ),
    ("Local", &[("LOCAL_PATH", "./work"), ("SYNC_EXCLUDE", ".git,node_modules")]),
    ("Service", &[("WEB_PORT", "8080"), ("API_PORT", "5001")]),
    ("Logging", &[("LOG_LEVEL", "INFO"), ("LOG_FILE", "dev.log")]),
];

/// Keys whose values are written in double quotes
const QUOTED_KEYS: &[&str] = &["SYNC_EXCLUDE"];

pub const REMOTE_HOST_KEY: &str = "REMOTE_HOST";
pub const API_PORT_KEY: &str = "API_PORT";

fn is_known_key(key: &str) -> bool {
    SECTIONS
        .iter()
        .any(|(_, keys)| keys.iter().any(|(known, _)| *known == key))
}

/// Strip surrounding whitespace and quotes, the form a value reads back as.
pub fn normalize_value(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
}

/// Parse env-file text.
///
/// Blank lines, `#` comments and lines without `=` are skipped. Keys are
/// trimmed and values normalized with [`normalize_value`].
pub fn parse_env(content: &str) -> EnvMap {
    let mut map = EnvMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        map.insert(key.trim().to_string(), normalize_value(value).to_string());
    }
    map
}

/// Fill in defaults for every known key that is not set.
pub fn with_defaults(map: &EnvMap) -> EnvMap {
    let mut full = map.clone();
    for (_, keys) in SECTIONS {
        for (key, default) in keys.iter() {
            full.entry((*key).to_string())
                .or_insert_with(|| (*default).to_string());
        }
    }
    full
}

fn write_entry(out: &mut String, key: &str, value: &str) {
    if QUOTED_KEYS.contains(&key) {
        out.push_str(&format!("{key}=\"{value}\"\n"));
    } else {
        out.push_str(&format!("{key}={value}\n"));
    }
}

/// Render the sectioned file. Keys outside the known layout follow in
/// sorted order under their own section.
pub fn render_env(map: &EnvMap) -> String {
    let full = with_defaults(map);
    let mut out = String::with_capacity(512);
    out.push_str(HEADER);
    out.push_str("\n\n");

    for (index, (title, keys)) in SECTIONS.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&format!("# {title}\n"));
        for (key, _) in keys.iter() {
            let value = full.get(*key).map(String::as_str).unwrap_or_default();
            write_entry(&mut out, key, value);
        }
    }

    let mut others = full.iter().filter(|(key, _)| !is_known_key(key)).peekable();
    if others.peek().is_some() {
        out.push_str("\n# Other\n");
        for (key, value) in others {
            write_entry(&mut out, key, value);
        }
    }

    out
}

// ----------------------------------------------------------------------------
// Update Validation
// ----------------------------------------------------------------------------

fn validate_key(key: &str) -> StoreResult<()> {
    let reason = if key.is_empty() {
        Some("must not be empty")
    } else if key.contains('=') {
        Some("must not contain '='")
    } else if key.contains('#') {
        Some("must not contain '#'")
    } else if key.chars().any(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn validate_value(key: &str, value: &str) -> StoreResult<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(StoreError::InvalidValue {
            key: key.to_string(),
            reason: "must not contain newlines",
        });
    }
    Ok(())
}

/// Convert a JSON request body into validated updates.
///
/// Strings, numbers and booleans become their string form; anything else
/// is rejected, as is an empty object.
pub fn updates_from_json(body: &Value) -> StoreResult<EnvMap> {
    let object = body.as_object().ok_or(StoreError::NotAnObject)?;
    if object.is_empty() {
        return Err(StoreError::EmptyUpdate);
    }

    let mut updates = EnvMap::new();
    for (key, value) in object {
        validate_key(key)?;
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                return Err(StoreError::InvalidValue {
                    key: key.clone(),
                    reason: "must be a string, number or boolean",
                })
            }
        };
        validate_value(key, &value)?;
        updates.insert(key.clone(), value);
    }
    Ok(updates)
}

// ----------------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------------

/// Shared handle to the env-file configuration.
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<EnvMap>,
    loaded: bool,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the file at `path`. A missing file yields an empty map.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let (map, loaded) = match tokio::fs::read_to_string(&path).await {
            Ok(content) => (parse_env(&content), true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(target: "devenv::store", path = %path.display(), "Env file not found, using defaults");
                (EnvMap::new(), false)
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        info!(target: "devenv::store", path = %path.display(), keys = map.len(), "Config store opened");

        Ok(Self {
            path,
            current: ArcSwap::from_pointee(map),
            loaded,
            write_lock: Mutex::new(()),
        })
    }

    /// In-memory store that was never backed by a file read
    pub fn from_map(path: impl Into<PathBuf>, map: EnvMap) -> Self {
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(map),
            loaded: false,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file existed when the store was opened
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The full current map
    pub fn snapshot(&self) -> Arc<EnvMap> {
        self.current.load_full()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.current.load().get(key).cloned()
    }

    /// SSH probe target
    pub fn remote_host(&self) -> Option<String> {
        self.get(REMOTE_HOST_KEY)
    }

    /// `API_PORT`, when set to a valid port
    pub fn api_port(&self) -> Option<u16> {
        self.get(API_PORT_KEY).and_then(|p| p.trim().parse().ok())
    }

    /// Merge `updates` (last write wins per key) and persist.
    ///
    /// Returns the applied updates. Memory is only updated once the file has
    /// been replaced.
    pub async fn merge(&self, updates: EnvMap) -> StoreResult<EnvMap> {
        for (key, value) in &updates {
            validate_key(key)?;
            validate_value(key, value)?;
        }
        let updates: EnvMap = updates
            .into_iter()
            .map(|(key, value)| (key, normalize_value(&value).to_string()))
            .collect();

        let _guard = self.write_lock.lock().await;

        let mut merged = EnvMap::clone(&self.current.load());
        merged.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        let merged = with_defaults(&merged);

        self.persist(&merged).await?;
        self.current.store(Arc::new(merged));

        info!(
            target: "devenv::store",
            path = %self.path.display(),
            keys = ?updates.keys().collect::<Vec<_>>(),
            "Configuration updated"
        );
        Ok(updates)
    }

    async fn persist(&self, map: &EnvMap) -> StoreResult<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::DEFAULT_ENV_FILE.to_string());
        let temp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let persist_err = |source: std::io::Error| StoreError::Persist {
            path: self.path.clone(),
            source,
        };

        tokio::fs::write(&temp, render_env(map)).await.map_err(persist_err)?;
        if let Err(source) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(persist_err(source));
        }
        Ok(())
    }
}

impl Debug for ConfigStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("keys", &self.current.load().len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SAMPLE: &str = r#"
# comment line
SSH_ALIAS=devbox
REMOTE_HOST = 10.0.0.2
SYNC_EXCLUDE=".git,target"
LOG_FILE='dev.log'
not a pair
EMPTY=
URL=http://example.com/?a=b
"#;

    #[test]
    fn test_parse_env() {
        let map = parse_env(SAMPLE);
        assert_eq!(map.get("SSH_ALIAS").unwrap(), "devbox");
        assert_eq!(map.get("REMOTE_HOST").unwrap(), "10.0.0.2");
        assert_eq!(map.get("SYNC_EXCLUDE").unwrap(), ".git,target");
        assert_eq!(map.get("LOG_FILE").unwrap(), "dev.log");
        assert_eq!(map.get("EMPTY").unwrap(), "");
        assert_eq!(map.get("URL").unwrap(), "http://example.com/?a=b");
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_render_fills_defaults_and_keeps_unknown_keys() {
        let mut map = EnvMap::new();
        map.insert("REMOTE_HOST".into(), "10.0.0.9".into());
        map.insert("ZED".into(), "1".into());
        map.insert("ALPHA".into(), "2".into());

        let rendered = render_env(&map);
        assert!(rendered.starts_with(HEADER));
        assert!(rendered.contains("REMOTE_HOST=10.0.0.9\n"));
        assert!(rendered.contains("SSH_PORT=22\n"));
        assert!(rendered.contains("SYNC_EXCLUDE=\".git,node_modules\"\n"));
        assert!(rendered.ends_with("# Other\nALPHA=2\nZED=1\n"));

        let parsed = parse_env(&rendered);
        assert_eq!(parsed, with_defaults(&map));
    }

    #[test]
    fn test_json_updates_validation() {
        let updates = updates_from_json(&json!({ "SSH_PORT": 2222, "DEBUG": true, "HOST": "x" })).unwrap();
        assert_eq!(updates.get("SSH_PORT").unwrap(), "2222");
        assert_eq!(updates.get("DEBUG").unwrap(), "true");

        for body in [
            json!({ "BAD KEY": "x" }),
            json!({ "A=B": "x" }),
            json!({ "": "x" }),
            json!({ "KEY": "line\nbreak" }),
            json!({ "KEY": null }),
            json!({ "KEY": [1, 2] }),
            json!(["KEY", "value"]),
            json!({}),
        ] {
            let err = updates_from_json(&body).unwrap_err();
            assert!(err.is_client_error(), "{body} -> {err}");
        }
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.env")).await.unwrap();
        assert!(store.snapshot().is_empty());
        assert!(!store.is_loaded());
        assert_eq!(store.api_port(), None);
    }

    #[tokio::test]
    async fn test_merge_persists_then_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.env");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = ConfigStore::open(&path).await.unwrap();
        assert!(store.is_loaded());

        let mut updates = EnvMap::new();
        updates.insert("REMOTE_HOST".into(), "10.0.0.3".into());
        updates.insert("CUSTOM_FLAG".into(), "on".into());
        let applied = store.merge(updates.clone()).await.unwrap();
        assert_eq!(applied, updates);

        assert_eq!(store.remote_host().as_deref(), Some("10.0.0.3"));
        assert_eq!(store.get("SSH_ALIAS").as_deref(), Some("devbox"));
        assert_eq!(store.api_port(), Some(5001));

        let reopened = ConfigStore::open(&path).await.unwrap();
        assert_eq!(*reopened.snapshot(), *store.snapshot());
        assert_eq!(reopened.get("CUSTOM_FLAG").as_deref(), Some("on"));
        assert!(!dir.path().join(".config.env.tmp").exists());
    }

    #[tokio::test]
    async fn test_merged_values_read_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.env");
        let store = ConfigStore::open(&path).await.unwrap();

        let updates = updates_from_json(&json!({
            "REMOTE_USER": "  alice ",
            "NOTE": "'quoted'",
            "SYNC_EXCLUDE": "\" .git,target\"",
            "PADDED": " ' a b ' ",
        }))
        .unwrap();
        let applied = store.merge(updates).await.unwrap();
        assert_eq!(applied.get("REMOTE_USER").unwrap(), "alice");
        assert_eq!(applied.get("NOTE").unwrap(), "quoted");
        assert_eq!(applied.get("SYNC_EXCLUDE").unwrap(), ".git,target");
        assert_eq!(applied.get("PADDED").unwrap(), "a b");

        let reopened = ConfigStore::open(&path).await.unwrap();
        assert_eq!(*reopened.snapshot(), *store.snapshot());
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("config.env");

        let mut initial = EnvMap::new();
        initial.insert("REMOTE_HOST".into(), "10.0.0.1".into());
        let store = ConfigStore::from_map(&path, initial.clone());

        let mut updates = EnvMap::new();
        updates.insert("REMOTE_HOST".into(), "10.0.0.4".into());
        let err = store.merge(updates).await.unwrap_err();

        assert!(matches!(err, StoreError::Persist { .. }));
        assert_eq!(*store.snapshot(), initial);
    }

    #[tokio::test]
    async fn test_concurrent_merges_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("config.env")).await.unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut updates = EnvMap::new();
                    updates.insert(format!("KEY_{i}"), i.to_string());
                    store.merge(updates).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let on_disk = parse_env(&std::fs::read_to_string(store.path()).unwrap());
        for i in 0..8 {
            assert_eq!(on_disk.get(&format!("KEY_{i}")), Some(&i.to_string()));
        }
        assert_eq!(on_disk, *store.snapshot());
    }
}
