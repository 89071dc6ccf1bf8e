//! Batched page migration through `move_pages(2)`.
//!
//! Addresses are submitted in fixed-size batches per destination node;
//! per-page outcomes accumulate in a status vector parallel to the
//! submitted addresses. A failed syscall ends the current operation but
//! per-page failures inside a successful call only feed the statistics.

use crate::sys::move_pages::{KernelMovePages, MovePages, MPOL_MF_MOVE, MPOL_MF_SW_YOUNG};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// `move_pages` returned a whole-call failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateError {
    pub errno: i32,
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "move_pages failed: {}",
            std::io::Error::from_raw_os_error(self.errno)
        )
    }
}

impl std::error::Error for MigrateError {}

/// Batching driver over the move-pages seam.
///
/// Also serves placement queries (no destination vector) for the
/// occupancy probe. The status vector of the most recent operation stays
/// readable until the next one; a whole-call failure leaves the
/// already-written prefix intact.
pub struct PageMigrator {
    pid: i32,
    batch_size: usize,
    api: Box<dyn MovePages>,
    status: Vec<i32>,
    /// Cleared once the running kernel rejects the soft-young hint.
    sw_young: bool,
}

impl PageMigrator {
    pub fn new(pid: i32, batch_size: usize) -> Self {
        Self::with_api(pid, batch_size, Box::new(KernelMovePages))
    }

    /// Inject a move-pages implementation (tests, dry runs).
    pub fn with_api(pid: i32, batch_size: usize, api: Box<dyn MovePages>) -> Self {
        PageMigrator {
            pid,
            batch_size,
            api,
            status: Vec::new(),
            sw_young: true,
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Migrate `addrs` to `node` in batches of at most `batch_size`.
    pub fn move_to_node(&mut self, addrs: &[u64], node: u32) -> Result<(), MigrateError> {
        self.status.clear();
        self.status.resize(addrs.len(), 0);

        let mut nodes = Vec::new();
        let mut start = 0;
        while start < addrs.len() {
            let end = (start + self.batch_size).min(addrs.len());
            nodes.clear();
            nodes.resize(end - start, node as i32);

            self.submit(&addrs[start..end], start, Some(&nodes))?;
            start = end;
        }

        debug!(
            "moved {} pages of pid {} toward node {}",
            addrs.len(),
            self.pid,
            node
        );
        Ok(())
    }

    /// Query current placement of `addrs` without moving anything; the
    /// status vector receives the node each page resides on.
    pub fn query_nodes(&mut self, addrs: &[u64]) -> Result<(), MigrateError> {
        self.status.clear();
        self.status.resize(addrs.len(), 0);

        let mut start = 0;
        while start < addrs.len() {
            let end = (start + self.batch_size).min(addrs.len());
            self.submit(&addrs[start..end], start, None)?;
            start = end;
        }
        Ok(())
    }

    /// One kernel call for `batch`, whose statuses start at `offset`.
    fn submit(
        &mut self,
        batch: &[u64],
        offset: usize,
        nodes: Option<&[i32]>,
    ) -> Result<(), MigrateError> {
        // The soft-young hint only matters when pages actually move.
        let flags = if nodes.is_some() && self.sw_young {
            MPOL_MF_MOVE | MPOL_MF_SW_YOUNG
        } else {
            MPOL_MF_MOVE
        };

        let status = &mut self.status[offset..offset + batch.len()];
        let mut ret = self.api.move_pages(self.pid, batch, nodes, status, flags);

        if ret == -(libc::EINVAL as i64) && flags & MPOL_MF_SW_YOUNG != 0 {
            warn!(
                "kernel rejects MPOL_MF_SW_YOUNG, retrying with MPOL_MF_MOVE only \
                 (hotness signal will not survive migration)"
            );
            self.sw_young = false;
            ret = self
                .api
                .move_pages(self.pid, batch, nodes, status, MPOL_MF_MOVE);
        }

        if ret < 0 {
            let errno = -ret as i32;
            warn!(
                "move_pages: {} (batch of {} at offset {})",
                std::io::Error::from_raw_os_error(errno),
                batch.len(),
                offset
            );
            return Err(MigrateError { errno });
        }
        Ok(())
    }

    /// Per-status counts over the last operation.
    pub fn stats(&self) -> HashMap<i32, usize> {
        let mut stats = HashMap::new();
        for &status in &self.status {
            *stats.entry(status).or_insert(0) += 1;
        }
        stats
    }

    /// Statuses of the last operation, parallel to its addresses.
    pub fn status(&self) -> &[i32] {
        &self.status
    }

    /// Share of the last operation's pages residing on node 0.
    pub fn node0_percent(&self) -> u32 {
        percent(
            self.status.iter().filter(|&&s| s == 0).count(),
            self.status.len(),
        )
    }

    /// Share of the last operation's pages that reported a failure.
    pub fn error_percent(&self) -> u32 {
        percent(
            self.status.iter().filter(|&&s| s < 0).count(),
            self.status.len(),
        )
    }
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        (part * 100 / total) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    struct Call {
        len: usize,
        nodes: Option<Vec<i32>>,
        flags: i32,
    }

    #[derive(Default)]
    struct Script {
        calls: Vec<Call>,
        /// Status vectors handed out per successful call, front first.
        statuses: Vec<Vec<i32>>,
        /// Whole-call failure injected on the nth call (0-based).
        fail_on: Option<(usize, i32)>,
        reject_sw_young: bool,
    }

    /// Scripted move-pages double: records calls, writes statuses from a
    /// queue, and fails whole calls on demand.
    #[derive(Clone, Default)]
    struct ScriptedMoves(Rc<RefCell<Script>>);

    impl ScriptedMoves {
        fn calls(&self) -> Vec<Call> {
            self.0.borrow().calls.clone()
        }
    }

    impl MovePages for ScriptedMoves {
        fn move_pages(
            &self,
            _pid: i32,
            pages: &[u64],
            nodes: Option<&[i32]>,
            status: &mut [i32],
            flags: i32,
        ) -> i64 {
            let mut script = self.0.borrow_mut();
            if script.reject_sw_young && flags & MPOL_MF_SW_YOUNG != 0 {
                return -(libc::EINVAL as i64);
            }

            let nth = script.calls.len();
            script.calls.push(Call {
                len: pages.len(),
                nodes: nodes.map(<[i32]>::to_vec),
                flags,
            });

            if let Some((fail_nth, errno)) = script.fail_on {
                if nth == fail_nth {
                    return -(errno as i64);
                }
            }

            if script.statuses.is_empty() {
                status.fill(0);
            } else {
                status.copy_from_slice(&script.statuses.remove(0));
            }
            0
        }
    }

    fn addrs(n: usize) -> Vec<u64> {
        (0..n as u64).map(|i| i << 12).collect()
    }

    #[test]
    fn test_batching_splits_at_batch_size() {
        let script = ScriptedMoves::default();
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        migrator.move_to_node(&addrs(10_000), 1).unwrap();

        let calls = script.calls();
        let sizes: Vec<usize> = calls.iter().map(|c| c.len).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(migrator.status().len(), 10_000);
        assert!(calls
            .iter()
            .all(|c| c.nodes.as_deref().unwrap().iter().all(|&n| n == 1)));
        assert!(calls
            .iter()
            .all(|c| c.flags == MPOL_MF_MOVE | MPOL_MF_SW_YOUNG));
    }

    #[test]
    fn test_small_batch_single_call() {
        let script = ScriptedMoves::default();
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        migrator.move_to_node(&addrs(5), 2).unwrap();
        assert_eq!(script.calls().len(), 1);
        assert_eq!(migrator.status(), &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_per_page_failures_feed_stats_not_errors() {
        let script = ScriptedMoves::default();
        script.0.borrow_mut().statuses = vec![vec![0, 0, -libc::EBUSY, 0, -libc::EBUSY]];
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script));

        migrator.move_to_node(&addrs(5), 0).unwrap();

        let stats = migrator.stats();
        assert_eq!(stats.get(&0), Some(&3));
        assert_eq!(stats.get(&-libc::EBUSY), Some(&2));
        assert_eq!(migrator.node0_percent(), 60);
        assert_eq!(migrator.error_percent(), 40);
    }

    #[test]
    fn test_syscall_failure_stops_and_keeps_prefix() {
        let script = ScriptedMoves::default();
        {
            let mut s = script.0.borrow_mut();
            s.statuses = vec![vec![7; 4096]];
            s.fail_on = Some((1, libc::ESRCH));
        }
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        let err = migrator.move_to_node(&addrs(10_000), 1).unwrap_err();
        assert_eq!(err.errno, libc::ESRCH);
        // Two calls: the successful first batch, then the failing second;
        // the third batch is never submitted.
        assert_eq!(script.calls().len(), 2);
        assert_eq!(migrator.status().len(), 10_000);
        assert!(migrator.status()[..4096].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_query_mode_passes_null_nodes_and_plain_move() {
        let script = ScriptedMoves::default();
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        migrator.query_nodes(&addrs(100)).unwrap();

        let calls = script.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].nodes.is_none());
        assert_eq!(calls[0].flags, MPOL_MF_MOVE);
    }

    #[test]
    fn test_sw_young_rejected_falls_back_and_sticks() {
        let script = ScriptedMoves::default();
        script.0.borrow_mut().reject_sw_young = true;
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        migrator.move_to_node(&addrs(10), 1).unwrap();
        migrator.move_to_node(&addrs(10), 1).unwrap();

        // The rejected attempt is invisible to the recorder; all recorded
        // calls carry the plain flag, and the hint is not retried.
        let calls = script.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.flags == MPOL_MF_MOVE));
    }

    #[test]
    fn test_empty_input_issues_no_syscall() {
        let script = ScriptedMoves::default();
        let mut migrator = PageMigrator::with_api(1, 4096, Box::new(script.clone()));

        migrator.move_to_node(&[], 1).unwrap();
        assert!(script.calls().is_empty());
        assert!(migrator.status().is_empty());
        assert_eq!(migrator.node0_percent(), 0);
    }
}
