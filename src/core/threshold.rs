//! Reference-count cutoff selection.
//!
//! Maps a tier capacity target into the band of reference counts a class
//! migrates. Accessed classes walk the histogram from the hot end down
//! until the band holds enough pages to fill the fast tier; idle classes
//! walk up from zero and then halve the ceiling, refusing to demote pages
//! with borderline recent activity.

use crate::core::class::PageClass;
use crate::core::config::TierConfig;
use crate::core::histogram::RefHistogram;
use crate::sys::vmstat::AnonCapacity;
use serde::Serialize;
use tracing::debug;

/// Inclusive reference-count band plus the page count it was sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdBand {
    pub min_refs: u8,
    pub max_refs: u8,
    /// Pages the capacity ratio asked for; 0 on the forced paths.
    pub portion: usize,
}

/// Choose the migration band for one class.
///
/// Forced knobs win over the capacity path: a disabled scanner pins
/// accessed classes to the strict hottest count, and explicit
/// `hot_min_refs` / `cold_max_refs` settings bypass the ratio entirely.
pub fn pick_thresholds(
    class: PageClass,
    hist: &RefHistogram,
    cfg: &TierConfig,
    capacity: &dyn AnonCapacity,
) -> ThresholdBand {
    let nr_walks = hist.nr_walks();

    if class.is_accessed() && cfg.nr_walks == 0 {
        return ThresholdBand {
            min_refs: nr_walks,
            max_refs: nr_walks,
            portion: 0,
        };
    }
    if class.is_accessed() {
        if let Some(min_refs) = cfg.hot_min_refs {
            return ThresholdBand {
                min_refs,
                max_refs: nr_walks,
                portion: 0,
            };
        }
    }
    if !class.is_accessed() {
        if let Some(max_refs) = cfg.cold_max_refs {
            return ThresholdBand {
                min_refs: 0,
                max_refs,
                portion: 0,
            };
        }
    }

    let ratio = match cfg.dram_percent {
        Some(percent) if class.is_accessed() => percent as f64 / 100.0,
        Some(percent) => (100 - percent) as f64 / 100.0,
        None => {
            let total = capacity.anon_capacity();
            if total == 0 {
                0.0
            } else {
                capacity.anon_capacity_on(cfg.target_node(class)) as f64 / total as f64
            }
        }
    };

    // One system-wide ratio is applied to every scanned process; processes
    // with skewed hot/cold distributions will over- or under-fill.
    let portion = (hist.len() as f64 * ratio) as usize;
    let mut quota = portion as i64;
    let refs_count = hist.refs_count();

    debug!(
        "migrate ratio: {:.2} = {} / {}",
        ratio,
        portion,
        hist.len()
    );

    let (min_refs, max_refs) = if class.is_accessed() {
        let mut min_refs = nr_walks;
        while min_refs > 1 {
            quota -= refs_count[min_refs as usize] as i64;
            if quota <= 0 {
                break;
            }
            min_refs -= 1;
        }
        // The walk stops one bucket past the quota when it runs dry
        // mid-bucket; stepping back keeps that partial bucket out of the
        // hot band.
        if min_refs < nr_walks {
            min_refs += 1;
        }
        (min_refs, nr_walks)
    } else {
        let mut max_refs: u8 = 0;
        while max_refs < nr_walks / 2 {
            quota -= refs_count[max_refs as usize] as i64;
            if quota <= 0 {
                break;
            }
            max_refs += 1;
        }
        // Halving the ceiling leaves headroom against single-round noise
        // in the idle samples.
        (0, max_refs >> 1)
    };

    debug!("refs range: {}-{}", min_refs, max_refs);

    ThresholdBand {
        min_refs,
        max_refs,
        portion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TierConfig;

    /// Fixed capacity split for the ratio path.
    struct FixedCapacity {
        total: u64,
        per_node: Vec<u64>,
    }

    impl AnonCapacity for FixedCapacity {
        fn anon_capacity(&self) -> u64 {
            self.total
        }

        fn anon_capacity_on(&self, node: u32) -> u64 {
            self.per_node.get(node as usize).copied().unwrap_or(0)
        }
    }

    fn no_capacity() -> FixedCapacity {
        FixedCapacity {
            total: 0,
            per_node: vec![],
        }
    }

    /// Histogram with `refs_count[i] == counts[i]`, pages at consecutive
    /// pfns.
    fn hist_from_counts(nr_walks: u8, counts: &[usize]) -> RefHistogram {
        let mut hist = RefHistogram::new(nr_walks);
        let mut pfn = 0u64;
        for (refs, &n) in counts.iter().enumerate() {
            for _ in 0..n {
                hist.observe(pfn, false);
                for _ in 0..refs {
                    hist.observe(pfn, true);
                }
                pfn += 1;
            }
        }
        hist
    }

    #[test]
    fn test_scanner_disabled_pins_strict_hottest() {
        let hist = hist_from_counts(8, &[10, 10, 10, 10, 10, 10, 10, 10, 10]);
        let mut cfg = TierConfig::default();
        cfg.nr_walks = 0;

        let band = pick_thresholds(PageClass::SmallAccessed, &hist, &cfg, &no_capacity());
        assert_eq!(
            band,
            ThresholdBand {
                min_refs: 8,
                max_refs: 8,
                portion: 0
            }
        );
    }

    #[test]
    fn test_forced_hot_min_refs() {
        let hist = hist_from_counts(8, &[10, 10, 10, 10, 10, 10, 10, 10, 10]);
        let mut cfg = TierConfig::default();
        cfg.hot_min_refs = Some(5);

        let band = pick_thresholds(PageClass::LargeAccessed, &hist, &cfg, &no_capacity());
        assert_eq!(band.min_refs, 5);
        assert_eq!(band.max_refs, 8);
        assert_eq!(band.portion, 0);
    }

    #[test]
    fn test_forced_cold_max_refs() {
        let hist = hist_from_counts(8, &[10, 10, 10, 10, 10, 10, 10, 10, 10]);
        let mut cfg = TierConfig::default();
        cfg.cold_max_refs = Some(0);

        let band = pick_thresholds(PageClass::SmallIdle, &hist, &cfg, &no_capacity());
        assert_eq!(
            band,
            ThresholdBand {
                min_refs: 0,
                max_refs: 0,
                portion: 0
            }
        );
    }

    #[test]
    fn test_hot_selection_at_half_dram() {
        // 1000 pages, walking down from refs=8: 100, 200, 100, 100 pages
        // exhaust the 500-page quota at refs=5; the overshoot correction
        // lands the band at 6-8.
        let hist = hist_from_counts(8, &[100, 100, 100, 100, 100, 100, 100, 200, 100]);
        let mut cfg = TierConfig::default();
        cfg.dram_percent = Some(50);

        let band = pick_thresholds(PageClass::SmallAccessed, &hist, &cfg, &no_capacity());
        assert_eq!(
            band,
            ThresholdBand {
                min_refs: 6,
                max_refs: 8,
                portion: 500
            }
        );
    }

    #[test]
    fn test_hot_band_stays_at_top_when_first_bucket_fills_quota() {
        let hist = hist_from_counts(8, &[0, 0, 0, 0, 0, 0, 0, 0, 10]);
        let mut cfg = TierConfig::default();
        cfg.dram_percent = Some(100);

        let band = pick_thresholds(PageClass::SmallAccessed, &hist, &cfg, &no_capacity());
        // Quota exhausts in the first bucket; min_refs never moves, no
        // correction applies.
        assert_eq!(band.min_refs, 8);
        assert_eq!(band.max_refs, 8);
    }

    #[test]
    fn test_hot_walk_bottoms_out_at_one_and_corrects_to_two() {
        // Every page is stone cold, so the quota never drains; the walk
        // runs to its floor and the correction lifts it one bucket.
        let hist = hist_from_counts(8, &[10, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut cfg = TierConfig::default();
        cfg.dram_percent = Some(100);

        let band = pick_thresholds(PageClass::SmallAccessed, &hist, &cfg, &no_capacity());
        assert_eq!(band.min_refs, 2);
        assert_eq!(band.max_refs, 8);
    }

    #[test]
    fn test_cold_ceiling_is_halved() {
        // portion 60 drains buckets 0..=2 (20+20+20); the walk stops at
        // max_refs=2, halved to 1.
        let hist = hist_from_counts(8, &[20, 20, 20, 20, 20, 0, 0, 0, 0]);
        let mut cfg = TierConfig::default();
        cfg.dram_percent = Some(40);

        let band = pick_thresholds(PageClass::SmallIdle, &hist, &cfg, &no_capacity());
        assert_eq!(band.portion, 60);
        assert_eq!(band.min_refs, 0);
        assert_eq!(band.max_refs, 1);
    }

    #[test]
    fn test_cold_walk_never_passes_half_nr_walks() {
        // Quota larger than the histogram: the walk is capped at
        // nr_walks/2 = 4, halved to 2.
        let hist = hist_from_counts(8, &[1, 1, 1, 1, 1, 1, 1, 1, 1]);
        let mut cfg = TierConfig::default();
        cfg.dram_percent = Some(0);

        let band = pick_thresholds(PageClass::LargeIdle, &hist, &cfg, &no_capacity());
        assert_eq!(band.max_refs, 2);
    }

    #[test]
    fn test_vmstat_ratio_path() {
        // Without dram_percent, the ratio comes from per-node anon
        // capacity: node 1 holds 3/4 of anon, so the idle portion is 750.
        let capacity = FixedCapacity {
            total: 1000,
            per_node: vec![250, 750],
        };
        let hist = hist_from_counts(8, &[100, 100, 100, 100, 100, 100, 100, 200, 100]);
        let cfg = TierConfig::default();

        let band = pick_thresholds(PageClass::SmallIdle, &hist, &cfg, &capacity);
        assert_eq!(band.portion, 750);
    }

    #[test]
    fn test_zero_capacity_selects_nothing_extra() {
        let hist = hist_from_counts(8, &[100, 0, 0, 0, 0, 0, 0, 0, 0]);
        let cfg = TierConfig::default();

        let band = pick_thresholds(PageClass::SmallIdle, &hist, &cfg, &no_capacity());
        assert_eq!(band.portion, 0);
    }

    #[test]
    fn test_band_well_formed_across_dram_sweep() {
        let hist = hist_from_counts(8, &[50, 7, 0, 93, 12, 40, 5, 200, 100]);
        for percent in 0..=100u8 {
            let mut cfg = TierConfig::default();
            cfg.dram_percent = Some(percent);
            for class in PageClass::ALL {
                let band = pick_thresholds(class, &hist, &cfg, &no_capacity());
                assert!(band.min_refs <= band.max_refs, "dram={}", percent);
                assert!(band.max_refs <= hist.nr_walks(), "dram={}", percent);
            }
        }
    }

    #[test]
    fn test_hot_selection_monotonic_in_dram_percent() {
        let hist = hist_from_counts(8, &[50, 7, 0, 93, 12, 40, 5, 200, 100]);
        let mut last = usize::MAX;
        for percent in (0..=100u8).rev() {
            let mut cfg = TierConfig::default();
            cfg.dram_percent = Some(percent);
            let band = pick_thresholds(PageClass::SmallAccessed, &hist, &cfg, &no_capacity());
            let selected = hist
                .iter()
                .filter(|&(_, r)| band.min_refs <= r && r <= band.max_refs)
                .count();
            assert!(selected <= last, "dram={} grew the hot set", percent);
            last = selected;
        }
    }

    #[test]
    fn test_cold_selection_antitonic_in_dram_percent() {
        let hist = hist_from_counts(8, &[50, 7, 0, 93, 12, 40, 5, 200, 100]);
        let mut last = 0usize;
        for percent in (0..=100u8).rev() {
            let mut cfg = TierConfig::default();
            cfg.dram_percent = Some(percent);
            let band = pick_thresholds(PageClass::SmallIdle, &hist, &cfg, &no_capacity());
            let selected = hist
                .iter()
                .filter(|&(_, r)| band.min_refs <= r && r <= band.max_refs)
                .count();
            assert!(selected >= last, "dram={} shrank the cold set", percent);
            last = selected;
        }
    }
}
