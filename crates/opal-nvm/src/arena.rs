//! Raw arena byte access.
//!
//! The arena is a caller-owned contiguous byte range. This module is the
//! only place that touches those bytes: every header, footer, and link word
//! the allocator reads or writes goes through the offset-addressed
//! accessors here, which bounds-check each access and encode all words
//! little-endian regardless of host byte order.
//!
//! Mutations are additionally reported to an optional [`WriteObserver`],
//! which is the attachment point for layers that need to know which arena
//! regions an operation touched (write-amplification measurement, or a
//! durability layer ordering flushes).

use parking_lot::Mutex;
use std::sync::Arc;

/// Observer invoked on every arena mutation.
///
/// `offset`/`len` describe the mutated region in arena-relative bytes.
/// Observers must be cheap: they run synchronously inside every header,
/// footer, and link write.
pub trait WriteObserver: Send {
    /// Records one mutated region.
    fn record(&mut self, offset: u32, len: u32);
}

/// A [`WriteObserver`] that collects mutated regions and counts writes.
///
/// The log is internally shared: clone it, install one clone on the arena,
/// and keep the other to inspect. Callers typically clear it between
/// operations to measure one operation at a time.
///
/// # Example
///
/// ```rust
/// use opal_nvm::ModificationLog;
///
/// let log = ModificationLog::new();
/// let probe = log.clone();
/// // install `log` via Allocator::set_observer, run an operation, then:
/// assert_eq!(probe.write_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ModificationLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    regions: Vec<(u32, u32)>,
    write_count: u64,
}

impl ModificationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the regions mutated since the last [`clear`](Self::clear).
    #[must_use]
    pub fn regions(&self) -> Vec<(u32, u32)> {
        self.inner.lock().regions.clone()
    }

    /// Returns the total number of recorded writes (not reset by
    /// [`clear`](Self::clear)).
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.lock().write_count
    }

    /// Forgets the recorded regions, keeping the write counter.
    pub fn clear(&self) {
        self.inner.lock().regions.clear();
    }
}

impl WriteObserver for ModificationLog {
    fn record(&mut self, offset: u32, len: u32) {
        let mut inner = self.inner.lock();
        inner.regions.push((offset, len));
        inner.write_count += 1;
    }
}

/// A fixed-length byte range with offset-addressed word access.
///
/// The arena does not own the underlying mapping; the caller keeps it alive
/// for the arena's lifetime and is responsible for mapping and unmapping
/// the storage.
pub struct Arena<'a> {
    bytes: &'a mut [u8],
    observer: Option<Box<dyn WriteObserver>>,
}

impl<'a> Arena<'a> {
    /// Creates an arena over the given byte range.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty or longer than `u32::MAX` bytes
    /// (offsets are 32-bit).
    pub fn new(bytes: &'a mut [u8]) -> Self {
        assert!(!bytes.is_empty(), "empty arena");
        assert!(bytes.len() <= u32::MAX as usize, "arena exceeds 32-bit offsets");
        Self {
            bytes,
            observer: None,
        }
    }

    /// Returns the arena length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Returns true if the arena is empty. Never true for a constructed
    /// arena; present for API completeness.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Installs a write observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: Box<dyn WriteObserver>) {
        self.observer = Some(observer);
    }

    /// Removes and returns the current write observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn WriteObserver>> {
        self.observer.take()
    }

    #[inline]
    fn observe(&mut self, offset: u32, len: u32) {
        if let Some(observer) = self.observer.as_mut() {
            observer.record(offset, len);
        }
    }

    /// Reads a little-endian u32 at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word extends past the arena end.
    #[inline]
    pub(crate) fn read_u32(&self, offset: u32) -> u32 {
        let at = offset as usize;
        let bytes: [u8; 4] = self.bytes[at..at + 4]
            .try_into()
            .expect("word read out of arena bounds");
        u32::from_le_bytes(bytes)
    }

    /// Writes a little-endian u32 at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word extends past the arena end.
    #[inline]
    pub(crate) fn write_u32(&mut self, offset: u32, value: u32) {
        let at = offset as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        self.observe(offset, 4);
    }

    /// Returns `len` bytes starting at `offset`.
    #[inline]
    pub(crate) fn read_bytes(&self, offset: u32, len: u32) -> &[u8] {
        let at = offset as usize;
        &self.bytes[at..at + len as usize]
    }

    /// Copies `data` into the arena at `offset`.
    #[inline]
    pub(crate) fn write_bytes(&mut self, offset: u32, data: &[u8]) {
        let at = offset as usize;
        self.bytes[at..at + data.len()].copy_from_slice(data);
        self.observe(offset, data.len() as u32);
    }

    /// Fills `len` bytes starting at `offset` with `value`, recorded as a
    /// single mutation.
    pub(crate) fn fill(&mut self, offset: u32, len: u32, value: u8) {
        let at = offset as usize;
        self.bytes[at..at + len as usize].fill(value);
        self.observe(offset, len);
    }
}

impl std::fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.bytes.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}
