//! OS interfaces: the move_pages seam, /proc readers, and page-table
//! plumbing.

pub mod maps;
pub mod move_pages;
pub mod pagemap;
pub mod vmstat;

pub use maps::VmaRange;
pub use move_pages::{KernelMovePages, MovePages, MPOL_MF_MOVE, MPOL_MF_SW_YOUNG};
pub use pagemap::{IdleBitmap, KPageFlags, PageMap, PagemapEntry};
pub use vmstat::{AnonCapacity, ProcVmstat};
