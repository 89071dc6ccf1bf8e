//! Configuration for the tiering controller.

use crate::core::class::PageClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which page temperature classes a tick migrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrateWhat {
    None,
    Hot,
    Cold,
    Both,
}

impl MigrateWhat {
    pub fn includes_hot(self) -> bool {
        matches!(self, MigrateWhat::Hot | MigrateWhat::Both)
    }

    pub fn includes_cold(self) -> bool {
        matches!(self, MigrateWhat::Cold | MigrateWhat::Both)
    }

    fn from_number(n: u32) -> Option<Self> {
        match n {
            0 => Some(MigrateWhat::None),
            1 => Some(MigrateWhat::Hot),
            2 => Some(MigrateWhat::Cold),
            3 => Some(MigrateWhat::Both),
            _ => None,
        }
    }
}

impl fmt::Display for MigrateWhat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrateWhat::None => "none",
            MigrateWhat::Hot => "hot",
            MigrateWhat::Cold => "cold",
            MigrateWhat::Both => "both",
        };
        f.write_str(name)
    }
}

/// Unrecognized migrate mode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMigrateError(pub String);

impl fmt::Display for ParseMigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid migrate type: {}", self.0)
    }
}

impl std::error::Error for ParseMigrateError {}

impl FromStr for MigrateWhat {
    type Err = ParseMigrateError;

    /// Accepts both numeric (`"2"`) and named (`"cold"`) forms; numbers
    /// are range-checked first, then the name table is consulted.
    fn from_str(s: &str) -> Result<Self, ParseMigrateError> {
        if s.starts_with(|c: char| c.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .ok()
                .and_then(MigrateWhat::from_number)
                .ok_or_else(|| ParseMigrateError(s.to_string()));
        }

        match s {
            "none" => Ok(MigrateWhat::None),
            "hot" => Ok(MigrateWhat::Hot),
            "cold" => Ok(MigrateWhat::Cold),
            "both" => Ok(MigrateWhat::Both),
            _ => Err(ParseMigrateError(s.to_string())),
        }
    }
}

/// Pages submitted per `move_pages` call.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Process-wide tiering knobs. Built once at startup, validated, then
/// passed by reference to every core operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Target fraction of pages on the fast node, in percent. Unset means
    /// derive the ratio from current NUMA anon capacity.
    pub dram_percent: Option<u8>,

    /// Forced lower reference bound for accessed classes.
    pub hot_min_refs: Option<u8>,

    /// Forced upper reference bound for idle classes.
    pub cold_max_refs: Option<u8>,

    /// Idle-bit sweeps per scan round; 0 disables rescans and keeps only
    /// the strict hottest band for accessed classes.
    pub nr_walks: u8,

    /// Destination node per class, indexed by `PageClass::index()`.
    pub target_nodes: [u32; 4],

    /// Max pages per kernel migration call.
    pub batch_size: usize,

    /// Which temperature classes to migrate.
    pub migrate_what: MigrateWhat,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig::with_nodes(0, 1)
    }
}

impl TierConfig {
    /// Config targeting `fast_node` for accessed classes and `slow_node`
    /// for idle classes.
    pub fn with_nodes(fast_node: u32, slow_node: u32) -> Self {
        let mut target_nodes = [0; 4];
        for class in PageClass::ALL {
            target_nodes[class.index()] = if class.is_accessed() {
                fast_node
            } else {
                slow_node
            };
        }
        TierConfig {
            dram_percent: None,
            hot_min_refs: None,
            cold_max_refs: None,
            nr_walks: 8,
            target_nodes,
            batch_size: DEFAULT_BATCH_SIZE,
            migrate_what: MigrateWhat::None,
        }
    }

    /// Destination node for a class's migrations.
    pub fn target_node(&self, class: PageClass) -> u32 {
        self.target_nodes[class.index()]
    }

    /// Reject out-of-range knob combinations before the daemon starts.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(percent) = self.dram_percent {
            if percent > 100 {
                return Err(format!("dram_percent {} out of range 0-100", percent));
            }
        }
        if let Some(min) = self.hot_min_refs {
            if min == 0 || min > self.nr_walks.max(1) {
                return Err(format!(
                    "hot_min_refs {} outside 1-{}",
                    min,
                    self.nr_walks.max(1)
                ));
            }
        }
        if let Some(max) = self.cold_max_refs {
            if max > self.nr_walks {
                return Err(format!(
                    "cold_max_refs {} exceeds nr_walks {}",
                    max, self.nr_walks
                ));
            }
        }
        if self.batch_size == 0 {
            return Err("batch_size must be nonzero".to_string());
        }
        Ok(())
    }

    /// Load config from TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
