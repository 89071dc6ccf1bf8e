//! NUMA occupancy probe: where do a VMA's pages currently live?
//!
//! Large VMAs are sampled in ten equal slots through the migrator's query
//! mode; each slot reports the share of its pages resident on node 0.
//! A diagnostic path, driven separately from the migration tick.

use crate::core::class::BASE_PAGE_SHIFT;
use crate::core::migrate::{MigrateError, PageMigrator};
use crate::sys::maps::{self, VmaRange};
use std::fmt;
use std::io;
use tracing::debug;

/// Smallest VMA worth sampling.
pub const VMA_PROBE_MIN_BYTES: u64 = 1 << 30;
/// Slots per probed VMA.
pub const NR_SLOTS: usize = 10;

/// Maps enumeration or placement query failed.
#[derive(Debug)]
pub enum ProbeError {
    Io(io::Error),
    Migrate(MigrateError),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Io(err) => write!(f, "reading maps: {}", err),
            ProbeError::Migrate(err) => write!(f, "placement query: {}", err),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        ProbeError::Io(err)
    }
}

impl From<MigrateError> for ProbeError {
    fn from(err: MigrateError) -> Self {
        ProbeError::Migrate(err)
    }
}

/// One slot's placement sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOccupancy {
    pub node0_percent: u32,
    pub error_percent: u32,
}

/// Ten-column occupancy histogram for one VMA.
#[derive(Debug, Clone)]
pub struct VmaOccupancy {
    pub start: u64,
    pub end: u64,
    pub slots: Vec<SlotOccupancy>,
}

impl VmaOccupancy {
    pub fn size_kb(&self) -> u64 {
        (self.end - self.start) >> 10
    }
}

impl fmt::Display for VmaOccupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VMA size: {:>15} kB\nN0 percent:", self.size_kb())?;
        for slot in &self.slots {
            write!(f, " {:>3}", slot.node0_percent)?;
            if slot.error_percent > 0 {
                write!(f, " (-{})", slot.error_percent)?;
            }
        }
        Ok(())
    }
}

/// Samples VMA occupancy through a migrator in query mode.
pub struct OccupancyProbe<'a> {
    migrator: &'a mut PageMigrator,
}

impl<'a> OccupancyProbe<'a> {
    pub fn new(migrator: &'a mut PageMigrator) -> Self {
        OccupancyProbe { migrator }
    }

    /// Sample one VMA; `None` when it is below the size floor.
    pub fn probe_vma(&mut self, vma: &VmaRange) -> Result<Option<VmaOccupancy>, MigrateError> {
        if vma.len() < VMA_PROBE_MIN_BYTES {
            return Ok(None);
        }

        let page_size = 1u64 << BASE_PAGE_SHIFT;
        let nr_pages = vma.len() >> BASE_PAGE_SHIFT;
        let slot_pages = nr_pages / NR_SLOTS as u64;

        let mut slots = Vec::with_capacity(NR_SLOTS);
        let mut addrs = vec![0u64; slot_pages as usize];
        for slot in 0..NR_SLOTS as u64 {
            let base = vma.start + slot * slot_pages * page_size;
            for (i, addr) in addrs.iter_mut().enumerate() {
                *addr = base + i as u64 * page_size;
            }

            self.migrator.query_nodes(&addrs)?;
            slots.push(SlotOccupancy {
                node0_percent: self.migrator.node0_percent(),
                error_percent: self.migrator.error_percent(),
            });
        }

        Ok(Some(VmaOccupancy {
            start: vma.start,
            end: vma.end,
            slots,
        }))
    }

    /// Sample every sufficiently large VMA of the migrator's target.
    pub fn probe_task(&mut self) -> Result<Vec<VmaOccupancy>, ProbeError> {
        let vmas = maps::load(self.migrator.pid())?;
        let mut results = Vec::new();
        for vma in &vmas {
            if let Some(occupancy) = self.probe_vma(vma)? {
                debug!("probed {:x}-{:x}", vma.start, vma.end);
                results.push(occupancy);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::move_pages::MovePages;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Answers every page query with the node derived from the address:
    /// pages in the lower half of each gigabyte sit on node 0.
    #[derive(Clone, Default)]
    struct HalfAndHalf {
        calls: Rc<RefCell<Vec<(u64, usize)>>>,
    }

    impl MovePages for HalfAndHalf {
        fn move_pages(
            &self,
            _pid: i32,
            pages: &[u64],
            nodes: Option<&[i32]>,
            status: &mut [i32],
            _flags: i32,
        ) -> i64 {
            assert!(nodes.is_none());
            self.calls.borrow_mut().push((pages[0], pages.len()));
            for (addr, status) in pages.iter().zip(status.iter_mut()) {
                *status = ((addr >> 29) & 1) as i32;
            }
            0
        }
    }

    fn vma(start: u64, len: u64) -> VmaRange {
        VmaRange {
            start,
            end: start + len,
            perms: "rw-p".to_string(),
            path: None,
        }
    }

    #[test]
    fn test_small_vma_is_skipped() {
        let api = HalfAndHalf::default();
        let mut migrator = PageMigrator::with_api(1, 1 << 16, Box::new(api.clone()));
        let mut probe = OccupancyProbe::new(&mut migrator);

        let result = probe.probe_vma(&vma(0, 512 << 20)).unwrap();
        assert!(result.is_none());
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn test_two_gigabyte_vma_yields_ten_slots() {
        let api = HalfAndHalf::default();
        let mut migrator = PageMigrator::with_api(1, 1 << 20, Box::new(api.clone()));
        let mut probe = OccupancyProbe::new(&mut migrator);

        let occupancy = probe.probe_vma(&vma(0, 2 << 30)).unwrap().unwrap();
        assert_eq!(occupancy.slots.len(), 10);

        // 2 GiB = 524288 pages, 52428 per slot.
        let calls = api.calls.borrow();
        assert!(calls.iter().all(|&(_, len)| len == 52428));
        // Slot bases advance by slot_pages * page_size.
        assert_eq!(calls[0].0, 0);
        assert_eq!(calls[1].0, 52428 * 4096);
    }

    #[test]
    fn test_slot_percentages_follow_placement() {
        let api = HalfAndHalf::default();
        let mut migrator = PageMigrator::with_api(1, 1 << 20, Box::new(api));
        let mut probe = OccupancyProbe::new(&mut migrator);

        let occupancy = probe.probe_vma(&vma(0, 1 << 30)).unwrap().unwrap();
        // First slots fall entirely in the first 512 MiB: node 0.
        assert_eq!(occupancy.slots[0].node0_percent, 100);
        assert_eq!(occupancy.slots[9].node0_percent, 0);
        assert!(occupancy.slots.iter().all(|s| s.error_percent == 0));
    }

    #[test]
    fn test_display_renders_ten_columns() {
        let occupancy = VmaOccupancy {
            start: 0,
            end: 1 << 30,
            slots: vec![
                SlotOccupancy {
                    node0_percent: 97,
                    error_percent: 0
                };
                10
            ],
        };
        let text = occupancy.to_string();
        assert!(text.contains("N0 percent:"));
        assert_eq!(text.matches(" 97").count(), 10);
    }
}
