//! Anonymous `mmap` backing for slabs.
//!
//! The mapping is private, zero-filled and page aligned. It is only ever
//! viewed as `AtomicU64` words, which share `u64`'s size and alignment.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

use crate::error::SlabError;
use crate::region::RawRegion;
use crate::slab::WORD_SIZE;

/// Region backed by an anonymous memory mapping.
pub struct MmapRegion {
    base: NonNull<AtomicU64>,
    word_count: usize,
    mapped_len: usize,
}

// SAFETY: the mapping is owned exclusively by this value and all access goes
// through atomic words.
unsafe impl Send for MmapRegion {}
// SAFETY: as above; shared access only hands out `&[AtomicU64]`.
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Maps `len` bytes of anonymous memory. `len` must be a positive multiple
    /// of the word size.
    pub fn map(len: usize) -> Result<Self, SlabError> {
        if len == 0 {
            return Err(SlabError::ZeroLength);
        }
        if len % WORD_SIZE != 0 {
            return Err(SlabError::Misaligned {
                len,
                word: WORD_SIZE,
            });
        }

        // SAFETY: anonymous private mapping with no fixed address and no file
        // descriptor; the kernel picks a fresh, page-aligned range.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(SlabError::MapFailed {
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        let Some(base) = NonNull::new(ptr.cast::<AtomicU64>()) else {
            return Err(SlabError::MapFailed {
                len,
                source: std::io::Error::other("mmap returned a null mapping"),
            });
        };

        log::debug!("mapped {len}-byte slab region at {:p}", base.as_ptr());
        Ok(Self {
            base,
            word_count: len / WORD_SIZE,
            mapped_len: len,
        })
    }
}

impl RawRegion for MmapRegion {
    fn words(&self) -> &[AtomicU64] {
        // SAFETY: `base` points to `mapped_len` readable+writable, zero-filled,
        // page-aligned bytes that stay mapped until `self` is dropped.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.word_count) }
    }

    fn backing(&self) -> &'static str {
        "mmap"
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`mapped_len` describe exactly the mapping created in
        // `map`, and no borrow of `words()` can outlive `self`.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.mapped_len) };
        if rc != 0 {
            log::error!(
                "munmap of {}-byte slab region failed: {}",
                self.mapped_len,
                std::io::Error::last_os_error()
            );
        }
    }
}
