//! Tick orchestration: thresholds, selection, then migration per class.

use crate::core::class::PageClass;
use crate::core::config::TierConfig;
use crate::core::histogram::ClassHistograms;
use crate::core::migrate::{MigrateError, PageMigrator};
use crate::core::selector::select_pages;
use crate::core::threshold::{pick_thresholds, ThresholdBand};
use crate::sys::vmstat::AnonCapacity;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Outcome of one class's pipeline within a tick.
#[derive(Debug, Clone, Serialize)]
pub struct ClassOutcome {
    pub class: PageClass,
    pub band: ThresholdBand,
    /// Pages submitted for migration; 0 means the class was skipped.
    pub selected: usize,
    pub target_node: u32,
    pub node0_percent: u32,
    pub error_percent: u32,
    /// Per-status counts from the kernel (node id or -errno to pages).
    pub status_counts: HashMap<i32, usize>,
}

/// One tick's migrations across all enabled classes.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub pid: i32,
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub outcomes: Vec<ClassOutcome>,
}

impl TickReport {
    /// Pages submitted across all classes this tick.
    pub fn pages_submitted(&self) -> usize {
        self.outcomes.iter().map(|o| o.selected).sum()
    }
}

/// Sequences the per-class pipeline each tick: cold classes drain the
/// fast tier before hot classes fill it.
pub struct TierController {
    cfg: TierConfig,
    migrator: PageMigrator,
}

impl TierController {
    pub fn new(cfg: TierConfig, pid: i32) -> Self {
        let migrator = PageMigrator::new(pid, cfg.batch_size);
        TierController { cfg, migrator }
    }

    /// Build around an injected migrator (tests, dry runs).
    pub fn with_migrator(cfg: TierConfig, migrator: PageMigrator) -> Self {
        TierController { cfg, migrator }
    }

    pub fn config(&self) -> &TierConfig {
        &self.cfg
    }

    pub fn migrator_mut(&mut self) -> &mut PageMigrator {
        &mut self.migrator
    }

    /// Run one migration round over the scan's histograms.
    ///
    /// The first whole-call syscall failure aborts the remaining classes
    /// and surfaces as the tick's error; the caller decides whether to
    /// try again next round.
    pub fn tick(
        &mut self,
        hists: &ClassHistograms,
        capacity: &dyn AnonCapacity,
    ) -> Result<TickReport, MigrateError> {
        let mut outcomes = Vec::new();

        for class in PageClass::TICK_ORDER {
            let enabled = if class.is_accessed() {
                self.cfg.migrate_what.includes_hot()
            } else {
                self.cfg.migrate_what.includes_cold()
            };
            if !enabled {
                continue;
            }

            match self.run_class(class, hists, capacity) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!("tick aborted at {}: {}", class, err);
                    return Err(err);
                }
            }
        }

        let report = TickReport {
            pid: self.migrator.pid(),
            timestamp: chrono::Local::now(),
            outcomes,
        };
        info!(
            "tick: {} pages submitted across {} classes",
            report.pages_submitted(),
            report.outcomes.len()
        );
        Ok(report)
    }

    fn run_class(
        &mut self,
        class: PageClass,
        hists: &ClassHistograms,
        capacity: &dyn AnonCapacity,
    ) -> Result<ClassOutcome, MigrateError> {
        let hist = hists.hist(class);
        let target_node = self.cfg.target_node(class);
        let band = pick_thresholds(class, hist, &self.cfg, capacity);
        let addrs = select_pages(class, hist, band);

        if addrs.is_empty() {
            debug!("{}: nothing in band {}-{}", class, band.min_refs, band.max_refs);
            return Ok(ClassOutcome {
                class,
                band,
                selected: 0,
                target_node,
                node0_percent: 0,
                error_percent: 0,
                status_counts: HashMap::new(),
            });
        }

        self.migrator.move_to_node(&addrs, target_node)?;

        debug!(
            "{}: {} pages -> node {} ({}% on node0, {}% errors)",
            class,
            addrs.len(),
            target_node,
            self.migrator.node0_percent(),
            self.migrator.error_percent()
        );

        Ok(ClassOutcome {
            class,
            band,
            selected: addrs.len(),
            target_node,
            node0_percent: self.migrator.node0_percent(),
            error_percent: self.migrator.error_percent(),
            status_counts: self.migrator.stats(),
        })
    }
}
