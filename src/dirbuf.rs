//! Directory buffer: a two-region growable buffer that accumulates
//! directory entries during enumeration, sorts them (with `.`/`..` first)
//! after the producer releases, and answers resume-by-marker reads via
//! binary search under a reader/writer lock.
//!
//! Grounded on `src/dll/dirbuf.c` in full. The reference implementation
//! packs everything into one raw byte array (an entry heap growing from
//! the low end, an index of 32-bit offsets growing from the high end) to
//! avoid a second allocation; this port keeps the two-region *role* (entry
//! storage vs. an index into it, capacity doubling, sentinel elision) but
//! represents the entry heap as a typed `Vec<DirEntry>` and the index as a
//! `Vec<u32>` of entry indices, with `u32::MAX` as the sentinel for an
//! invalidated slot, rather than the reference's raw pointer/union tricks.

use parking_lot::RwLock;

const INITIAL_CAPACITY: usize = 512;
const INVALID_SENTINEL: u32 = u32::MAX;

/// One directory entry. `file_info` is left generic over whatever the file
/// system wants to attach (size, attributes, timestamps); the buffer only
/// ever compares by `file_name`.
#[derive(Clone, Debug)]
pub struct DirEntry<F> {
    pub file_name: String,
    pub file_info: F,
}

/// Virtual sort key for a file name: `.` and `..` are mapped to the
/// non-printable prefixes `\x01` / `\x01\x01` so they always sort first,
/// exactly as `FspFileSystemDirectoryBufferFileNameCmp` does by substituting
/// those bytes before comparing.
fn sort_key(name: &str) -> std::borrow::Cow<'_, str> {
    match name {
        "." => std::borrow::Cow::Borrowed("\u{1}"),
        ".." => std::borrow::Cow::Borrowed("\u{1}\u{1}"),
        _ => std::borrow::Cow::Borrowed(name),
    }
}

fn entry_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    sort_key(a).cmp(&sort_key(b))
}

struct Inner<F> {
    entries: Vec<DirEntry<F>>,
    /// Indices into `entries`, or `INVALID_SENTINEL` for an elided slot.
    /// Unsorted while the producer is filling; sorted and sentinel-free
    /// immediately after `release`.
    index: Vec<u32>,
    capacity: usize,
    sorted: bool,
}

impl<F> Inner<F> {
    fn new() -> Self {
        Inner {
            entries: Vec::new(),
            index: Vec::new(),
            capacity: INITIAL_CAPACITY,
            sorted: false,
        }
    }
}

/// Lazily constructed, per-file enumeration buffer.
pub struct DirectoryBuffer<F> {
    inner: RwLock<Option<Inner<F>>>,
}

impl<F> Default for DirectoryBuffer<F> {
    fn default() -> Self {
        DirectoryBuffer {
            inner: RwLock::new(None),
        }
    }
}

impl<F> DirectoryBuffer<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive acquire. First call lazily allocates. If `reset`, the
    /// watermarks are reinitialized (equivalent to `LoMark=0, HiMark=Capacity`)
    /// while retaining the underlying storage for reuse.
    ///
    /// Returns a guard; drop (or explicit [`release`](Self::release)) performs
    /// the sentinel-elision + sort + lock-release sequence `release()`
    /// performs in the reference implementation.
    pub fn acquire(&self, reset: bool) -> DirectoryBufferWriter<'_, F> {
        let mut guard = self.inner.write();
        if guard.is_none() {
            *guard = Some(Inner::new());
        }
        if reset {
            let inner = guard.as_mut().unwrap();
            inner.entries.clear();
            inner.index.clear();
            inner.capacity = INITIAL_CAPACITY;
            inner.sorted = false;
        }
        DirectoryBufferWriter { guard }
    }

    /// Shared read. `marker` resumes after the named entry (binary search
    /// over the sorted index); `None` starts from the beginning. Entries
    /// are handed to `emit` in order until it returns `false` (buffer full
    /// on the caller's side), matching `FspFileSystemReadDirectoryBuffer`'s
    /// "copy until full, then stop" loop. The reference implementation
    /// always appends a zero-size terminator; callers here observe that as
    /// `emit` simply not being called again once entries are exhausted.
    pub fn read(&self, marker: Option<&str>, mut emit: impl FnMut(&DirEntry<F>) -> bool) {
        let guard = self.inner.read();
        let Some(inner) = guard.as_ref() else {
            return;
        };
        debug_assert!(inner.sorted, "read() called before release()");
        let start = match marker {
            None => 0,
            Some(m) => match Self::search(inner, m) {
                Ok(i) => i + 1,
                Err(i) => i,
            },
        };
        for &idx in &inner.index[start..] {
            if !emit(&inner.entries[idx as usize]) {
                break;
            }
        }
    }

    /// Binary search over the sorted index for an exact name match.
    /// `Ok(i)` on an exact hit at index `i`, `Err(i)` for the insertion
    /// point on a miss, mirroring `FspFileSystemSearchDirectoryBuffer`.
    fn search(inner: &Inner<F>, name: &str) -> Result<usize, usize> {
        inner
            .index
            .binary_search_by(|&idx| entry_cmp(&inner.entries[idx as usize].file_name, name))
    }

    pub fn delete(&self) {
        *self.inner.write() = None;
    }
}

/// RAII writer handle returned by [`DirectoryBuffer::acquire`]. Dropping it
/// (or calling [`release`](Self::release) explicitly) performs the
/// sentinel-elision + sort + unlock sequence.
pub struct DirectoryBufferWriter<'a, F> {
    guard: parking_lot::RwLockWriteGuard<'a, Option<Inner<F>>>,
}

impl<'a, F> DirectoryBufferWriter<'a, F> {
    /// Appends `entry`, growing the buffer (doubling capacity) if it no
    /// longer fits, matching `FspFileSystemFillDirectoryBuffer`.
    pub fn fill(&mut self, entry: DirEntry<F>) {
        let inner = self.guard.as_mut().expect("acquired");
        if inner.entries.len() >= inner.capacity {
            inner.capacity *= 2;
        }
        let idx = inner.entries.len() as u32;
        inner.entries.push(entry);
        inner.index.push(idx);
        inner.sorted = false;
    }

    /// Marks the entry at `index` position (its position in fill order,
    /// i.e. its current index-array slot) as invalidated; it is elided on
    /// the next [`release`](Self::release).
    pub fn invalidate(&mut self, position: usize) {
        let inner = self.guard.as_mut().expect("acquired");
        if let Some(slot) = inner.index.get_mut(position) {
            *slot = INVALID_SENTINEL;
        }
    }

    /// Elides invalidated slots, then sorts by file name with `.`/`..`
    /// first, then drops the writer lock (on `Drop`).
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        let inner = self.guard.as_mut().expect("acquired");
        inner.index.retain(|&i| i != INVALID_SENTINEL);
        inner
            .index
            .sort_by(|&a, &b| entry_cmp(&inner.entries[a as usize].file_name, &inner.entries[b as usize].file_name));
        inner.sorted = true;
    }
}

impl<'a, F> Drop for DirectoryBufferWriter<'a, F> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.do_release();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(buf: &DirectoryBuffer<()>) -> Vec<String> {
        let mut out = Vec::new();
        buf.read(None, |e| {
            out.push(e.file_name.clone());
            true
        });
        out
    }

    #[test]
    fn dot_and_dotdot_sort_first() {
        let buf: DirectoryBuffer<()> = DirectoryBuffer::new();
        {
            let mut w = buf.acquire(false);
            for n in [".", "..", "Z", "A", ".git"] {
                w.fill(DirEntry {
                    file_name: n.to_string(),
                    file_info: (),
                });
            }
            w.release();
        }
        assert_eq!(names(&buf), vec![".", "..", ".git", "A", "Z"]);
    }

    #[test]
    fn capacity_doubles_and_retains_entries_across_the_boundary() {
        let buf: DirectoryBuffer<()> = DirectoryBuffer::new();
        {
            let mut w = buf.acquire(false);
            for i in 0..(super::INITIAL_CAPACITY + 10) {
                w.fill(DirEntry {
                    file_name: format!("{i:06}"),
                    file_info: (),
                });
            }
            w.release();
        }
        assert_eq!(names(&buf).len(), super::INITIAL_CAPACITY + 10);
    }

    #[test]
    fn read_resumes_after_marker_via_binary_search() {
        let buf: DirectoryBuffer<()> = DirectoryBuffer::new();
        {
            let mut w = buf.acquire(false);
            for n in ["A", "B", "C", "D"] {
                w.fill(DirEntry {
                    file_name: n.to_string(),
                    file_info: (),
                });
            }
            w.release();
        }
        let mut out = Vec::new();
        buf.read(Some("B"), |e| {
            out.push(e.file_name.clone());
            true
        });
        assert_eq!(out, vec!["C", "D"]);
    }

    #[test]
    fn invalidated_slots_are_elided_on_release() {
        let buf: DirectoryBuffer<()> = DirectoryBuffer::new();
        {
            let mut w = buf.acquire(false);
            for n in ["A", "B", "C"] {
                w.fill(DirEntry {
                    file_name: n.to_string(),
                    file_info: (),
                });
            }
            w.invalidate(1); // retract "B"
            w.release();
        }
        assert_eq!(names(&buf), vec!["A", "C"]);
    }

    #[test]
    fn reset_discards_previous_entries() {
        let buf: DirectoryBuffer<()> = DirectoryBuffer::new();
        {
            let mut w = buf.acquire(false);
            w.fill(DirEntry {
                file_name: "old".to_string(),
                file_info: (),
            });
            w.release();
        }
        {
            let mut w = buf.acquire(true);
            w.fill(DirEntry {
                file_name: "new".to_string(),
                file_info: (),
            });
            w.release();
        }
        assert_eq!(names(&buf), vec!["new"]);
    }
}
