//! Striped free list for one size class.
//!
//! Each class keeps `free_list_count` independent stripes, each behind its
//! own `parking_lot::Mutex`. A thread pushes and pops on its home stripe and
//! only scans the others when its home stripe is empty. An atomic length lets
//! an empty class miss without touching any lock.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::chunk::ChunkAddress;

/// A free chunk waiting for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeChunk {
    pub address: ChunkAddress,
    pub total_size: usize,
}

static NEXT_HOME: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static HOME: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Stripe affinity seed for the current thread, assigned round-robin the
/// first time a thread touches any free list.
#[must_use]
pub fn home_stripe() -> usize {
    HOME.with(|home| match home.get() {
        Some(seed) => seed,
        None => {
            let seed = NEXT_HOME.fetch_add(1, Ordering::Relaxed);
            home.set(Some(seed));
            seed
        }
    })
}

/// Unordered pool of free chunks of one size class.
pub struct FreeList {
    stripes: Box<[Mutex<Vec<FreeChunk>>]>,
    len: AtomicUsize,
}

impl FreeList {
    /// Creates an empty list with `stripe_count` stripes (at least one).
    #[must_use]
    pub fn new(stripe_count: usize) -> Self {
        let stripes: Vec<Mutex<Vec<FreeChunk>>> = (0..stripe_count.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            stripes: stripes.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Chunks currently in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes one chunk onto stripe `seed % stripe_count`.
    pub fn push(&self, seed: usize, chunk: FreeChunk) {
        let mut stripe = self.stripes[seed % self.stripes.len()].lock();
        stripe.push(chunk);
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Pushes a freshly carved batch onto one stripe under a single lock.
    pub fn push_batch(&self, seed: usize, chunks: impl IntoIterator<Item = FreeChunk>) {
        let mut stripe = self.stripes[seed % self.stripes.len()].lock();
        let before = stripe.len();
        stripe.extend(chunks);
        let added = stripe.len() - before;
        if added > 0 {
            self.len.fetch_add(added, Ordering::AcqRel);
        }
    }

    /// Pops any chunk, home stripe first.
    pub fn pop(&self, seed: usize) -> Option<FreeChunk> {
        self.take(seed, |stripe| stripe.len().checked_sub(1))
    }

    /// Pops the smallest chunk whose total size is at least `min_total`.
    pub fn pop_fit(&self, seed: usize, min_total: usize) -> Option<FreeChunk> {
        self.take(seed, |stripe| {
            stripe
                .iter()
                .enumerate()
                .filter(|(_, c)| c.total_size >= min_total)
                .min_by_key(|(_, c)| c.total_size)
                .map(|(i, _)| i)
        })
    }

    fn take<F>(&self, seed: usize, pick: F) -> Option<FreeChunk>
    where
        F: Fn(&[FreeChunk]) -> Option<usize>,
    {
        if self.is_empty() {
            return None;
        }
        let count = self.stripes.len();
        let home = seed % count;
        for step in 0..count {
            let mut stripe = self.stripes[(home + step) % count].lock();
            if let Some(index) = pick(&stripe) {
                let chunk = stripe.swap_remove(index);
                self.len.fetch_sub(1, Ordering::AcqRel);
                return Some(chunk);
            }
        }
        None
    }

    /// Chunk count and byte total, stripe by stripe.
    #[must_use]
    pub fn totals(&self) -> (usize, usize) {
        self.stripes.iter().fold((0, 0), |(count, bytes), stripe| {
            let stripe = stripe.lock();
            (
                count + stripe.len(),
                bytes + stripe.iter().map(|c| c.total_size).sum::<usize>(),
            )
        })
    }
}

impl std::fmt::Debug for FreeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeList")
            .field("stripes", &self.stripes.len())
            .field("len", &self.len())
            .finish()
    }
}
