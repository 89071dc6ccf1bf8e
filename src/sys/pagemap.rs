//! Page-table plumbing: pagemap entries, kpageflags, and the page-idle
//! bitmap.
//!
//! - `/proc/<pid>/pagemap`: one u64 per virtual 4 KiB page (present bit,
//!   swap bit, physical pfn).
//! - `/proc/kpageflags`: one u64 of KPF_* flags per physical page.
//! - `/sys/kernel/mm/page_idle/bitmap`: one bit per physical page, 64
//!   pfns per word; writing a set bit marks the page idle, the kernel
//!   clears the bit when the page is accessed. Root only.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

const PM_PRESENT: u64 = 1 << 63;
const PM_SWAP: u64 = 1 << 62;
const PM_PFN_MASK: u64 = (1 << 55) - 1;

const KPF_HUGE: u64 = 1 << 17;
const KPF_THP: u64 = 1 << 22;

/// Decoded `/proc/<pid>/pagemap` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagemapEntry(pub u64);

impl PagemapEntry {
    pub fn present(self) -> bool {
        self.0 & PM_PRESENT != 0
    }

    pub fn swapped(self) -> bool {
        self.0 & PM_SWAP != 0
    }

    /// Physical page-frame number; meaningful only when present.
    pub fn pfn(self) -> u64 {
        self.0 & PM_PFN_MASK
    }
}

/// Reader over `/proc/<pid>/pagemap`.
pub struct PageMap {
    file: File,
}

impl PageMap {
    pub fn open(pid: i32) -> io::Result<Self> {
        let file = File::open(format!("/proc/{}/pagemap", pid))?;
        Ok(PageMap { file })
    }

    /// Entries for `count` consecutive 4 KiB pages starting at `vaddr`.
    pub fn read_range(&mut self, vaddr: u64, count: usize) -> io::Result<Vec<PagemapEntry>> {
        let offset = (vaddr >> 12) * 8;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; count * 8];
        self.file.read_exact(&mut buf)?;

        Ok(buf
            .chunks_exact(8)
            .map(|word| PagemapEntry(u64::from_ne_bytes(word.try_into().unwrap())))
            .collect())
    }
}

/// Reader over `/proc/kpageflags`, keyed by physical pfn.
pub struct KPageFlags {
    file: File,
}

impl KPageFlags {
    pub fn open() -> io::Result<Self> {
        let file = File::open("/proc/kpageflags")?;
        Ok(KPageFlags { file })
    }

    fn flags(&mut self, pfn: u64) -> io::Result<u64> {
        self.file.seek(SeekFrom::Start(pfn * 8))?;
        let mut word = [0u8; 8];
        self.file.read_exact(&mut word)?;
        Ok(u64::from_ne_bytes(word))
    }

    /// Whether the page belongs to a huge mapping (hugetlb or THP).
    pub fn is_huge(&mut self, pfn: u64) -> io::Result<bool> {
        Ok(self.flags(pfn)? & (KPF_HUGE | KPF_THP) != 0)
    }
}

/// Accessor for `/sys/kernel/mm/page_idle/bitmap`.
pub struct IdleBitmap {
    file: File,
    /// Last word marked idle; consecutive pfns share words, so repeated
    /// whole-word writes can be skipped.
    last_marked: Option<u64>,
}

impl IdleBitmap {
    pub fn open() -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/sys/kernel/mm/page_idle/bitmap")?;
        Ok(IdleBitmap {
            file,
            last_marked: None,
        })
    }

    /// Mark the word containing `pfn` idle (whole-word write; bits for
    /// nonexistent pages are ignored by the kernel).
    pub fn mark_idle(&mut self, pfn: u64) -> io::Result<()> {
        let word = pfn / 64;
        if self.last_marked == Some(word) {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(word * 8))?;
        self.file.write_all(&u64::MAX.to_ne_bytes())?;
        self.last_marked = Some(word);
        Ok(())
    }

    /// Whether `pfn` still has its idle bit set. A cleared bit means the
    /// page was accessed since it was marked.
    pub fn is_idle(&mut self, pfn: u64) -> io::Result<bool> {
        let word = pfn / 64;
        self.file.seek(SeekFrom::Start(word * 8))?;
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf) & (1 << (pfn % 64)) != 0)
    }

    /// Forget the write memo before a new marking pass.
    pub fn reset(&mut self) {
        self.last_marked = None;
    }
}
