use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque locator of a blob inside a blob store.
///
/// Keys are plain file-name-safe strings. The engine never interprets them;
/// it only stores them on [`FileVersion`](crate::FileVersion) rows and hands
/// them back to the blob store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

/// Longest extension carried over from an original file name.
const MAX_EXTENSION_LEN: usize = 16;

impl StorageKey {
    /// Generate a fresh key: `<unix-millis>-<random>` plus the extension of
    /// `name_hint`, if it has a short alphanumeric one.
    pub fn generate(name_hint: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        match extension_of(name_hint) {
            Some(ext) => Self(format!("{millis}-{suffix}.{ext}")),
            None => Self(format!("{millis}-{suffix}")),
        }
    }

    /// Validate and wrap an existing key.
    pub fn parse(key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("empty")
        } else if key.starts_with('.') {
            Some("leading dot")
        } else if key.contains(['/', '\\', '\0']) {
            Some("path separator")
        } else if key.chars().any(char::is_control) {
            Some("control character")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TypeError::InvalidStorageKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

impl TryFrom<String> for StorageKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
