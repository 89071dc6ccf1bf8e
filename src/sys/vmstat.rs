//! System and per-node virtual memory counters.
//!
//! Reads `/proc/vmstat` for system-wide counters and
//! `/sys/devices/system/node/node<N>/vmstat` for each NUMA node. Counters
//! are in pages. The anon-capacity view feeds the threshold selector when
//! no explicit DRAM percentage is configured.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

const ANON_KEYS: [&str; 3] = ["nr_inactive_anon", "nr_active_anon", "nr_isolated_anon"];

/// Anonymous-page capacity, system-wide and per node. Seam for the
/// threshold selector's capacity-driven ratio.
pub trait AnonCapacity {
    /// Total anon pages across all nodes.
    fn anon_capacity(&self) -> u64;

    /// Anon pages on one node.
    fn anon_capacity_on(&self, node: u32) -> u64;
}

/// Snapshot of `/proc/vmstat` plus every node's vmstat.
#[derive(Debug, Clone, Default)]
pub struct ProcVmstat {
    vmstat: HashMap<String, u64>,
    numa_vmstat: Vec<HashMap<String, u64>>,
}

impl ProcVmstat {
    /// Load system-wide and per-node counters.
    pub fn load() -> io::Result<Self> {
        let vmstat = parse_counters(&fs::read_to_string("/proc/vmstat")?);

        let mut numa_vmstat = Vec::new();
        loop {
            let path = format!(
                "/sys/devices/system/node/node{}/vmstat",
                numa_vmstat.len()
            );
            if !Path::new(&path).exists() {
                break;
            }
            numa_vmstat.push(parse_counters(&fs::read_to_string(&path)?));
        }

        Ok(ProcVmstat { vmstat, numa_vmstat })
    }

    /// Build from already-read counter text; node order follows the slice.
    pub fn from_text(vmstat: &str, nodes: &[&str]) -> Self {
        ProcVmstat {
            vmstat: parse_counters(vmstat),
            numa_vmstat: nodes.iter().map(|s| parse_counters(s)).collect(),
        }
    }

    /// System-wide counter, 0 if absent.
    pub fn vmstat(&self, key: &str) -> u64 {
        self.vmstat.get(key).copied().unwrap_or(0)
    }

    /// Per-node counter, 0 if the node or key is absent.
    pub fn node_vmstat(&self, node: u32, key: &str) -> u64 {
        self.numa_vmstat
            .get(node as usize)
            .and_then(|m| m.get(key))
            .copied()
            .unwrap_or(0)
    }

    pub fn nr_nodes(&self) -> usize {
        self.numa_vmstat.len()
    }

    /// Anon occupancy summary: total KiB plus per-node share.
    pub fn anon_occupancy(&self, page_size: u64) -> AnonOccupancy {
        let total_kb = self.anon_capacity() * page_size >> 10;
        let nodes = (0..self.nr_nodes() as u32)
            .map(|node| {
                let kb = self.anon_capacity_on(node) * page_size >> 10;
                let percent = if total_kb > 0 {
                    (kb * 100 / total_kb) as u32
                } else {
                    0
                };
                (kb, percent)
            })
            .collect();
        AnonOccupancy { total_kb, nodes }
    }
}

impl AnonCapacity for ProcVmstat {
    fn anon_capacity(&self) -> u64 {
        ANON_KEYS.iter().map(|key| self.vmstat(key)).sum()
    }

    fn anon_capacity_on(&self, node: u32) -> u64 {
        ANON_KEYS
            .iter()
            .map(|key| self.node_vmstat(node, key))
            .sum()
    }
}

/// Per-node anon placement, displayable as the occupancy report.
#[derive(Debug, Clone)]
pub struct AnonOccupancy {
    pub total_kb: u64,
    /// `(kb, percent_of_total)` per node.
    pub nodes: Vec<(u64, u32)>,
}

impl fmt::Display for AnonOccupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>15} kB       anon total", self.total_kb)?;
        for (node, (kb, percent)) in self.nodes.iter().enumerate() {
            write!(f, "\n{:>15} kB {:>3}%  anon node {}", kb, percent, node)?;
        }
        Ok(())
    }
}

/// Parse `name value` counter lines; malformed lines are skipped.
fn parse_counters(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let key = fields.next()?;
            let value = fields.next()?.parse().ok()?;
            Some((key.to_string(), value))
        })
        .collect()
}
