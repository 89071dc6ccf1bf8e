//! pagetier
//!
//! A userspace memory-tiering controller for Linux. It samples a target
//! process's page access behavior with idle-bit sweeps, classifies pages
//! hot or cold against a tier capacity target, and migrates them between
//! NUMA nodes through the kernel's move-pages interface.
//!
//! ## How a round works
//!
//! - **Scan**: repeated idle-bit sweeps over the target's anonymous VMAs
//!   build a per-page reference histogram per granularity.
//! - **Thresholds**: a capacity ratio (explicit DRAM percent or current
//!   NUMA anon split) is turned into a reference-count band per class.
//! - **Select**: pages inside the band become a sorted address batch.
//! - **Migrate**: batches go through `move_pages(2)` per destination
//!   node, with per-page result accounting.
//!
//! Cold classes are processed before hot ones so evictions free fast-tier
//! capacity ahead of promotions.
//!
//! ## Safety
//!
//! - Per-page migration failures are statistics, not errors.
//! - A failed syscall ends the round, not the daemon.
//! - The occupancy probe only queries placement; it never moves pages.

pub mod core;
pub mod monitor;
pub mod probe;
pub mod scan;
pub mod sys;

// Re-exports
pub use crate::core::class::PageClass;
pub use crate::core::config::{MigrateWhat, TierConfig};
pub use crate::core::controller::{ClassOutcome, TickReport, TierController};
pub use crate::core::histogram::{ClassHistograms, RefHistogram};
pub use crate::core::migrate::{MigrateError, PageMigrator};
pub use crate::core::selector::select_pages;
pub use crate::core::threshold::{pick_thresholds, ThresholdBand};
pub use crate::monitor::TickHistory;
pub use crate::probe::OccupancyProbe;
pub use crate::scan::IdleScanner;
pub use crate::sys::vmstat::{AnonCapacity, ProcVmstat};
