use serde::{Deserialize, Serialize};

use crate::common::AnyResult;
use crate::constants::DEFAULT_RING_CAPACITY;

/// Decode-session settings, loadable from TOML.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DecoderConfig {
    #[serde(default)]
    pub engines: EngineSelection,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Preferred engine names; unset fields fall back to the registry's
/// priority order.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EngineSelection {
    pub transform: Option<String>,
    pub downmix: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Output ring capacity in slots; must be a power of two.
    pub ring_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl DecoderConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: &str) -> AnyResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&raw)?)
    }
}
