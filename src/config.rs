//! Process-wide engine configuration: the thread-count pin, the debug-mode
//! serialization self-test, and the progress-reporting toggle. Optional —
//! the engine runs with defaults if no config is supplied, matching
//! `spec.md` §6 ("CLI / config: none" at the external-interface layer;
//! this is the internal knob layer the teacher's own pipeline manifests
//! carry, e.g. `crayon-workflow`'s TOML configs).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Host thread count each `PartitionRunner` pins numeric libraries to
    /// for the duration of its run. `None` leaves the ambient setting
    /// untouched.
    #[serde(default)]
    pub thread_limit: Option<usize>,

    /// When set, `Task`s and returned `BufferGroup` tuples are round-
    /// tripped through `bincode` once per partition to catch
    /// non-serialisable user state early. Not required on the hot path.
    #[serde(default)]
    pub debug_serialization_check: bool,

    /// When set, the dispatcher reports progress via `CountingProgress`
    /// instead of `NullProgress` if the caller did not supply its own
    /// `ProgressSink`.
    #[serde(default)]
    pub progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            thread_limit: None,
            debug_serialization_check: false,
            progress: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> crate::error::Result<Self> {
        toml::from_str(input)
            .map_err(|e| crate::error::Error::Config(format!("invalid engine config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = EngineConfig::default();
        assert_eq!(config.thread_limit, None);
        assert!(!config.debug_serialization_check);
        assert!(!config.progress);
    }

    #[test]
    fn parses_partial_toml() {
        let config = EngineConfig::from_toml_str("thread_limit = 4\nprogress = true\n").unwrap();
        assert_eq!(config.thread_limit, Some(4));
        assert!(config.progress);
        assert!(!config.debug_serialization_check);
    }
}
