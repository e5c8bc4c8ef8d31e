//! LXC configuration items.
//!
//! The engine's configuration is an ordered list of `key = value` items, the
//! same shape as an LXC config file. Rendering and parsing are exact inverses
//! so the saved file can be read back without loss.

use std::fmt;
use std::path::Path;

use cradle_common::{CradleError, CradleResult};

/// Configuration keys the shim sets.
pub mod keys {
    /// Root filesystem path.
    pub const ROOTFS_PATH: &str = "lxc.rootfs.path";
    /// Whether LXC owns (and may destroy) the rootfs.
    pub const ROOTFS_MANAGED: &str = "lxc.rootfs.managed";
    /// Mount options for the rootfs.
    pub const ROOTFS_OPTIONS: &str = "lxc.rootfs.options";
    /// One `NAME=value` environment variable.
    pub const ENVIRONMENT: &str = "lxc.environment";
    /// One fstab-formatted mount entry.
    pub const MOUNT_ENTRY: &str = "lxc.mount.entry";
    /// Working directory of the init process.
    pub const INIT_CWD: &str = "lxc.init.cwd";
    /// Hostname.
    pub const UTS_NAME: &str = "lxc.uts.name";
    /// Command line run by `lxc-execute`.
    pub const EXECUTE_CMD: &str = "lxc.execute.cmd";
    /// Hook calling convention.
    pub const HOOK_VERSION: &str = "lxc.hook.version";
    /// Hook run in the host namespaces right before the init is executed.
    pub const HOOK_START_HOST: &str = "lxc.hook.start-host";
    /// Engine log level.
    pub const LOG_LEVEL: &str = "lxc.log.level";
    /// Engine log file.
    pub const LOG_FILE: &str = "lxc.log.file";
}

const SINGLE_VALUED: &[&str] = &[
    keys::ROOTFS_PATH,
    keys::ROOTFS_MANAGED,
    keys::ROOTFS_OPTIONS,
    keys::INIT_CWD,
    keys::UTS_NAME,
    keys::EXECUTE_CMD,
    keys::HOOK_VERSION,
    keys::LOG_LEVEL,
    keys::LOG_FILE,
];

const HOOK_KEYS: &[&str] = &[
    "lxc.hook.pre-start",
    "lxc.hook.pre-mount",
    "lxc.hook.mount",
    "lxc.hook.autodev",
    keys::HOOK_START_HOST,
    "lxc.hook.start",
    "lxc.hook.stop",
    "lxc.hook.post-stop",
    "lxc.hook.clone",
    "lxc.hook.destroy",
];

const LOG_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "NOTICE", "WARN", "ERROR", "CRIT", "ALERT", "FATAL",
];

fn is_multi_valued(key: &str) -> bool {
    key == keys::ENVIRONMENT || key == keys::MOUNT_ENTRY || HOOK_KEYS.contains(&key)
}

/// An ordered set of engine configuration items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    items: Vec<(String, String)>,
}

impl EngineConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration item.
    ///
    /// Single-valued keys replace any previous value; list keys such as
    /// `lxc.environment` append.
    ///
    /// # Errors
    ///
    /// Returns an engine error naming the item if the key is not supported or
    /// the value is not acceptable for it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> CradleResult<()> {
        let value = value.into();
        validate(key, &value)?;

        if is_multi_valued(key) {
            self.items.push((key.to_string(), value));
        } else if let Some(slot) = self.items.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.items.push((key.to_string(), value));
        }

        tracing::trace!(key, "Set engine config item");
        Ok(())
    }

    /// All values of `key`, in insertion order.
    pub fn get<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.items
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The first value of `key`.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all items.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no item is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Parse an LXC config file body.
    ///
    /// Keys are not validated here: a saved file may carry items written by
    /// other tools.
    ///
    /// # Errors
    ///
    /// Returns an engine error for a line that is not a `key = value` item.
    pub fn parse(text: &str) -> CradleResult<Self> {
        let mut items = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CradleError::engine(
                    "parse config",
                    format!("line {}: expected 'key = value', got '{line}'", lineno + 1),
                )
            })?;
            let value = value.strip_prefix(' ').unwrap_or(value);
            items.push((key.trim().to_string(), value.to_string()));
        }
        Ok(Self { items })
    }

    /// Read a saved config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_from(path: &Path) -> CradleResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CradleError::io_at("read engine config", path, e))?;
        Self::parse(&text)
    }

    /// Write the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: &Path) -> CradleResult<()> {
        std::fs::write(path, self.to_string())
            .map_err(|e| CradleError::io_at("save engine config", path, e))?;
        tracing::debug!(path = %path.display(), items = self.len(), "Saved engine config");
        Ok(())
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.items {
            writeln!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}

fn validate(key: &str, value: &str) -> CradleResult<()> {
    let reject = |message: &str| Err(CradleError::engine_item(key, value, message));

    if !SINGLE_VALUED.contains(&key) && !is_multi_valued(key) {
        return reject("unsupported configuration key");
    }
    if value.contains(['\n', '\r', '\0']) {
        return reject("value must be a single line");
    }

    match key {
        keys::ROOTFS_MANAGED | keys::HOOK_VERSION if value != "0" && value != "1" => {
            reject("expected 0 or 1")
        }
        keys::LOG_LEVEL
            if !LOG_LEVELS.contains(&value.to_ascii_uppercase().as_str())
                && !matches!(value.parse::<u8>(), Ok(0..=8)) =>
        {
            reject("unknown log level")
        }
        keys::ROOTFS_PATH | keys::EXECUTE_CMD if value.is_empty() => reject("value must not be empty"),
        keys::ENVIRONMENT if !value.contains('=') => reject("expected NAME=value"),
        _ => Ok(()),
    }
}
