//! `/proc/<pid>/maps` parsing.

use std::fmt;
use std::fs;
use std::io;

/// One VMA of the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmaRange {
    pub start: u64,
    pub end: u64,
    /// Four-character permission field, e.g. `rw-p`.
    pub perms: String,
    /// Backing path or pseudo-path; `None` for anonymous mappings.
    pub path: Option<String>,
}

impl VmaRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn pages(&self, page_size: u64) -> u64 {
        self.len() / page_size
    }

    pub fn is_writable(&self) -> bool {
        self.perms.as_bytes().get(1) == Some(&b'w')
    }

    /// Anonymous memory: no backing file, or the heap/stack pseudo-VMAs.
    pub fn is_anon(&self) -> bool {
        match self.path.as_deref() {
            None => true,
            Some("[heap]") | Some("[stack]") => true,
            Some(_) => false,
        }
    }
}

impl fmt::Display for VmaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:016x} {} {}",
            self.start,
            self.end,
            self.perms,
            self.path.as_deref().unwrap_or("")
        )
    }
}

/// Enumerate the VMAs of `pid`.
pub fn load(pid: i32) -> io::Result<Vec<VmaRange>> {
    let content = fs::read_to_string(format!("/proc/{}/maps", pid))?;
    Ok(content.lines().filter_map(parse_line).collect())
}

/// Parse one maps line: `start-end perms offset dev inode [path]`.
fn parse_line(line: &str) -> Option<VmaRange> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let _offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next().map(str::to_string);

    let (start, end) = range.split_once('-')?;
    Some(VmaRange {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        perms: perms.to_string(),
        path,
    })
}
