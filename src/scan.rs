//! Idle-bit scanning: builds the per-granularity reference histograms.
//!
//! Each sweep marks every resident page of the target's anonymous
//! writable VMAs idle, dwells, then samples which idle bits the kernel
//! cleared; a cleared bit is one observed access. Counts accumulate
//! across `nr_walks` sweeps into the histograms the tick consumes.
//!
//! Uses the upstream interfaces: `/proc/<pid>/pagemap` for residency and
//! pfn translation, `/proc/kpageflags` for huge-page classification, and
//! `/sys/kernel/mm/page_idle/bitmap` (root only) for the idle bits.

use crate::core::class::{PageClass, BASE_PAGE_SHIFT, HUGE_PAGE_SHIFT};
use crate::core::histogram::ClassHistograms;
use crate::sys::maps::{self, VmaRange};
use crate::sys::pagemap::{IdleBitmap, KPageFlags, PageMap};
use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Pagemap entries read per request while walking a VMA.
const WALK_CHUNK_PAGES: usize = 1024;

const HUGE_SPAN_PAGES: u64 = 1 << (HUGE_PAGE_SHIFT - BASE_PAGE_SHIFT);

#[derive(Debug)]
pub enum ScanError {
    /// Idle bitmap or pagemap denied access; scanning needs root.
    PermissionDenied(String),
    /// Target process disappeared mid-scan.
    ProcessGone(i32),
    Io(io::Error),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied(what) => {
                write!(f, "permission denied on {} (run as root)", what)
            }
            ScanError::ProcessGone(pid) => write!(f, "process {} exited during scan", pid),
            ScanError::Io(err) => write!(f, "scan I/O: {}", err),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        ScanError::Io(err)
    }
}

/// Sweep scanner for one target process.
pub struct IdleScanner {
    pid: i32,
    nr_walks: u8,
    dwell: Duration,
}

impl IdleScanner {
    /// `dwell` is the time the idle bits are left to age per sweep.
    pub fn new(pid: i32, nr_walks: u8, dwell: Duration) -> Self {
        IdleScanner {
            pid,
            nr_walks,
            dwell,
        }
    }

    /// Run one scan round and return the filled histograms.
    pub fn scan(&mut self) -> Result<ClassHistograms, ScanError> {
        // A disabled scanner still produces a single-sweep observation so
        // the strict-hottest band has something to look at.
        let nr_walks = self.nr_walks.max(1);

        let vmas: Vec<VmaRange> = maps::load(self.pid)
            .map_err(|err| self.classify(err, "maps"))?
            .into_iter()
            .filter(|vma| vma.is_anon() && vma.is_writable())
            .collect();
        for vma in &vmas {
            debug!("scanning {}", vma);
        }

        let mut pagemap = PageMap::open(self.pid).map_err(|err| self.classify(err, "pagemap"))?;
        let mut idle =
            IdleBitmap::open().map_err(|err| self.classify(err, "page_idle bitmap"))?;
        let mut kpageflags = match KPageFlags::open() {
            Ok(flags) => Some(flags),
            Err(err) => {
                warn!("kpageflags unavailable ({}), treating all pages as small", err);
                None
            }
        };

        let mut hists = ClassHistograms::new(nr_walks);

        for walk in 0..nr_walks {
            idle.reset();
            for vma in &vmas {
                self.mark_vma_idle(vma, &mut pagemap, &mut idle)?;
            }

            thread::sleep(self.dwell);

            for vma in &vmas {
                self.sample_vma(vma, &mut pagemap, &mut idle, &mut kpageflags, &mut hists)?;
            }
            debug!(
                "walk {}/{}: {} pages tracked",
                walk + 1,
                nr_walks,
                hists.total_pages()
            );
        }

        Ok(hists)
    }

    /// Set the idle bit for every resident page of the VMA.
    fn mark_vma_idle(
        &self,
        vma: &VmaRange,
        pagemap: &mut PageMap,
        idle: &mut IdleBitmap,
    ) -> Result<(), ScanError> {
        let mut vaddr = vma.start;
        while vaddr < vma.end {
            let count = self.chunk_len(vma, vaddr);
            let entries = match pagemap.read_range(vaddr, count) {
                Ok(entries) => entries,
                // VMAs can shrink under us between maps and pagemap.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(self.classify(err, "pagemap")),
            };

            for entry in &entries {
                if entry.present() {
                    idle.mark_idle(entry.pfn())
                        .map_err(|err| self.classify(err, "page_idle bitmap"))?;
                }
            }
            vaddr += (count as u64) << BASE_PAGE_SHIFT;
        }
        Ok(())
    }

    /// Fold one sweep's idle-bit state into the histograms.
    fn sample_vma(
        &self,
        vma: &VmaRange,
        pagemap: &mut PageMap,
        idle: &mut IdleBitmap,
        kpageflags: &mut Option<KPageFlags>,
        hists: &mut ClassHistograms,
    ) -> Result<(), ScanError> {
        let mut vaddr = vma.start;
        while vaddr < vma.end {
            let count = self.chunk_len(vma, vaddr);
            let entries = match pagemap.read_range(vaddr, count) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(self.classify(err, "pagemap")),
            };

            let mut i = 0usize;
            while i < entries.len() {
                let entry = entries[i];
                let page_vaddr = vaddr + ((i as u64) << BASE_PAGE_SHIFT);
                if !entry.present() {
                    i += 1;
                    continue;
                }

                let huge = match kpageflags {
                    Some(flags) => flags.is_huge(entry.pfn()).unwrap_or(false),
                    None => false,
                };

                let accessed = !idle
                    .is_idle(entry.pfn())
                    .map_err(|err| self.classify(err, "page_idle bitmap"))?;

                if huge {
                    // One observation per 2 MiB region, sampled on the
                    // head page; tail entries carry no independent signal.
                    if page_vaddr % (1 << HUGE_PAGE_SHIFT) == 0 {
                        hists
                            .hist_mut(PageClass::LargeIdle)
                            .observe(page_vaddr >> HUGE_PAGE_SHIFT, accessed);
                    }
                    let to_boundary =
                        HUGE_SPAN_PAGES - (page_vaddr >> BASE_PAGE_SHIFT) % HUGE_SPAN_PAGES;
                    i += to_boundary as usize;
                } else {
                    hists
                        .hist_mut(PageClass::SmallIdle)
                        .observe(page_vaddr >> BASE_PAGE_SHIFT, accessed);
                    i += 1;
                }
            }
            vaddr += (count as u64) << BASE_PAGE_SHIFT;
        }
        Ok(())
    }

    fn chunk_len(&self, vma: &VmaRange, vaddr: u64) -> usize {
        (((vma.end - vaddr) >> BASE_PAGE_SHIFT) as usize).min(WALK_CHUNK_PAGES)
    }

    fn classify(&self, err: io::Error, what: &str) -> ScanError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(what.to_string()),
            io::ErrorKind::NotFound => ScanError::ProcessGone(self.pid),
            _ => ScanError::Io(err),
        }
    }
}
