//! Materializes the migration batch for one class.

use crate::core::class::PageClass;
use crate::core::histogram::RefHistogram;
use crate::core::threshold::ThresholdBand;

/// Byte addresses of the pages whose counts fall inside `band`, sorted
/// ascending. Empty when the histogram is empty or nothing matches; the
/// orchestrator skips the class's migration call in that case.
///
/// The histogram is ordered by page-frame number already, but classes use
/// different page sizes, so batching downstream wants an explicit
/// byte-address sort.
pub fn select_pages(class: PageClass, hist: &RefHistogram, band: ThresholdBand) -> Vec<u64> {
    if hist.is_empty() {
        return Vec::new();
    }

    let shift = class.page_shift();
    let mut addrs: Vec<u64> = hist
        .iter()
        .filter(|&(_, refs)| band.min_refs <= refs && refs <= band.max_refs)
        .map(|(pfn, _)| pfn << shift)
        .collect();

    addrs.sort_unstable();
    addrs
}
