//! Seam over the kernel's `move_pages(2)` primitive.
//!
//! The trait keeps the migrator testable without a NUMA machine; the real
//! implementation issues the raw syscall. Status entries follow the kernel
//! convention: non-negative = node the page resides on, negative = -errno
//! for that page.

use std::io;

/// Request page migration as well as placement queries.
pub const MPOL_MF_MOVE: i32 = 1 << 1;

/// Ask the kernel to mark migrated pages freshly accessed so the hotness
/// signal survives the move. Non-upstream extension (bit 7); upstream
/// kernels reject it with `EINVAL`.
pub const MPOL_MF_SW_YOUNG: i32 = 1 << 7;

/// `move_pages(2)`: relocate `pages` of process `pid` to `nodes`, or query
/// current placement when `nodes` is `None`. Per-page results land in
/// `status`. Returns 0 on success, `-errno` on syscall failure.
pub trait MovePages {
    fn move_pages(
        &self,
        pid: i32,
        pages: &[u64],
        nodes: Option<&[i32]>,
        status: &mut [i32],
        flags: i32,
    ) -> i64;
}

/// Real syscall implementation.
pub struct KernelMovePages;

impl MovePages for KernelMovePages {
    #[cfg(target_os = "linux")]
    fn move_pages(
        &self,
        pid: i32,
        pages: &[u64],
        nodes: Option<&[i32]>,
        status: &mut [i32],
        flags: i32,
    ) -> i64 {
        debug_assert_eq!(status.len(), pages.len());
        debug_assert!(nodes.map_or(true, |n| n.len() == pages.len()));

        let nodes_ptr = nodes.map_or(std::ptr::null(), |n| n.as_ptr());
        let ret = unsafe {
            libc::syscall(
                libc::SYS_move_pages,
                pid as libc::c_long,
                pages.len() as libc::c_ulong,
                pages.as_ptr(),
                nodes_ptr,
                status.as_mut_ptr(),
                flags as libc::c_int,
            )
        };

        if ret < 0 {
            -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL) as i64
        } else {
            ret
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn move_pages(
        &self,
        _pid: i32,
        _pages: &[u64],
        _nodes: Option<&[i32]>,
        _status: &mut [i32],
        _flags: i32,
    ) -> i64 {
        -(libc::ENOSYS as i64)
    }
}
