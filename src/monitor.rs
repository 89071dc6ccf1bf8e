//! Rolling history of tick outcomes.

use crate::core::controller::TickReport;

/// Condensed view of one tick kept in the history ring.
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub pages_submitted: usize,
    pub max_error_percent: u32,
}

/// Bounded in-memory history of recent ticks.
pub struct TickHistory {
    snapshots: Vec<TickSnapshot>,
    max_history: usize,
}

impl TickHistory {
    pub fn new(max_history: usize) -> Self {
        TickHistory {
            snapshots: Vec::new(),
            max_history,
        }
    }

    pub fn record(&mut self, report: &TickReport) {
        if self.snapshots.len() >= self.max_history {
            self.snapshots.remove(0);
        }
        self.snapshots.push(TickSnapshot {
            timestamp: report.timestamp,
            pages_submitted: report.pages_submitted(),
            max_error_percent: report
                .outcomes
                .iter()
                .map(|o| o.error_percent)
                .max()
                .unwrap_or(0),
        });
    }

    pub fn last(&self) -> Option<&TickSnapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        if self.snapshots.is_empty() {
            return HistoryStats::default();
        }

        let total: usize = self.snapshots.iter().map(|s| s.pages_submitted).sum();
        let worst_error = self
            .snapshots
            .iter()
            .map(|s| s.max_error_percent)
            .max()
            .unwrap_or(0);
        HistoryStats {
            ticks: self.snapshots.len(),
            total_pages_submitted: total,
            avg_pages_per_tick: total as f64 / self.snapshots.len() as f64,
            worst_error_percent: worst_error,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub ticks: usize,
    pub total_pages_submitted: usize,
    pub avg_pages_per_tick: f64,
    pub worst_error_percent: u32,
}
