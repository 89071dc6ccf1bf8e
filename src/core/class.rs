//! Page classes: granularity crossed with accessed-bit state.

use serde::Serialize;
use std::fmt;

/// Shift for the base 4 KiB page size.
pub const BASE_PAGE_SHIFT: u32 = 12;
/// Shift for transparent huge pages (2 MiB on x86-64).
pub const HUGE_PAGE_SHIFT: u32 = 21;

/// The four page kinds the controller operates on.
///
/// Granularity decides the page shift used when expanding a stored
/// page-frame number back into a byte address; accessed state decides the
/// migration direction (accessed pages promote to the fast node, idle
/// pages demote to the slow node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageClass {
    SmallIdle,
    SmallAccessed,
    LargeIdle,
    LargeAccessed,
}

impl PageClass {
    /// All classes, in index order.
    pub const ALL: [PageClass; 4] = [
        PageClass::SmallIdle,
        PageClass::SmallAccessed,
        PageClass::LargeIdle,
        PageClass::LargeAccessed,
    ];

    /// Processing order within a tick: cold classes first, so evictions
    /// free fast-tier capacity before promotions try to fill it.
    pub const TICK_ORDER: [PageClass; 4] = [
        PageClass::SmallIdle,
        PageClass::LargeIdle,
        PageClass::SmallAccessed,
        PageClass::LargeAccessed,
    ];

    /// Whether the hardware accessed bit was set for pages of this class.
    pub fn is_accessed(self) -> bool {
        matches!(self, PageClass::SmallAccessed | PageClass::LargeAccessed)
    }

    /// Whether this class covers huge-page mappings.
    pub fn is_large(self) -> bool {
        matches!(self, PageClass::LargeIdle | PageClass::LargeAccessed)
    }

    /// Address shift for this class's page size.
    pub fn page_shift(self) -> u32 {
        if self.is_large() {
            HUGE_PAGE_SHIFT
        } else {
            BASE_PAGE_SHIFT
        }
    }

    /// Page size in bytes.
    pub fn page_size(self) -> u64 {
        1u64 << self.page_shift()
    }

    /// Stable index for per-class tables.
    pub fn index(self) -> usize {
        match self {
            PageClass::SmallIdle => 0,
            PageClass::SmallAccessed => 1,
            PageClass::LargeIdle => 2,
            PageClass::LargeAccessed => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageClass::SmallIdle => "small-idle",
            PageClass::SmallAccessed => "small-accessed",
            PageClass::LargeIdle => "large-idle",
            PageClass::LargeAccessed => "large-accessed",
        }
    }
}

impl fmt::Display for PageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
