//! Runtime configuration.

use std::path::PathBuf;

use cradle_common::CradlePaths;

/// Engine log options passed through to each container's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineLogging {
    /// Engine log level (`lxc.log.level`).
    pub level: Option<String>,
    /// Engine log file (`lxc.log.file`).
    pub file: Option<PathBuf>,
}

/// Runtime configuration options.
///
/// Built once from the command line and handed to the coordinator, so no
/// lifecycle code reads global flags.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Paths for per-container state.
    pub paths: CradlePaths,
    /// Verbose engine logging and full error reports.
    pub debug: bool,
    /// Engine log options.
    pub engine_log: EngineLogging,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paths: CradlePaths::new(),
            debug: false,
            engine_log: EngineLogging::default(),
        }
    }
}

impl RuntimeConfig {
    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = CradlePaths::with_root(root);
        self
    }

    /// Enable debug mode.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the engine log level.
    #[must_use]
    pub fn with_engine_log_level(mut self, level: impl Into<String>) -> Self {
        self.engine_log.level = Some(level.into());
        self
    }

    /// Set the engine log file.
    #[must_use]
    pub fn with_engine_log_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.engine_log.file = Some(file.into());
        self
    }

    /// The engine log level to configure, if any.
    ///
    /// An explicit level wins; debug mode alone asks for `DEBUG`.
    #[must_use]
    pub fn effective_engine_log_level(&self) -> Option<&str> {
        match (&self.engine_log.level, self.debug) {
            (Some(level), _) => Some(level.as_str()),
            (None, true) => Some("DEBUG"),
            (None, false) => None,
        }
    }
}
