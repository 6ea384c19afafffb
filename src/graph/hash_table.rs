//! Open-addressed kmer hash table.
//!
//! Linear-probed table of fixed capacity, keyed by canonical kmers and
//! yielding stable integer handles (bucket indices). The table is sized
//! once at allocation and never rehashes, so handles stay valid for the
//! lifetime of the graph; inserting past the load ceiling fails with
//! [`CtxError::CapacityExceeded`].
//!
//! Concurrent inserts claim a bucket by CAS on its most-significant key
//! word. A kmer size is always odd, so the top word of a valid key has
//! its two highest used bits clear — that leaves room for the reserved
//! `EMPTY`, `BUSY` and `TOMBSTONE` markers, which no valid key can
//! collide with. Multi-word keys are published by writing the low words
//! first and releasing the top word last; readers that observe a real
//! top word therefore see a complete key, never a torn one.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CtxError;
use crate::graph::kmer::BinaryKmer;

/// Bucket marker: never written by an insert.
const EMPTY: u64 = u64::MAX;
/// Bucket marker: insert in progress, low words not yet published.
const BUSY: u64 = u64::MAX - 1;
/// Bucket marker: key removed by cleaning; probes skip over it.
const TOMBSTONE: u64 = u64::MAX - 2;

/// Sentinel handle for "not found".
pub const NO_HANDLE: u64 = u64::MAX;

/// Default load-factor ceiling.
pub const MAX_LOAD_FACTOR: f64 = 0.75;

// Fixed seeds keep bucket order deterministic across runs, which the
// graph writer's "bucket order" output contract depends on.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9ae1_6a3b_2f90_404f,
    0x5851_f42d_4c95_7f2d,
    0x1405_7b7e_f767_814f,
    0x8141_4161_08ce_5c9f,
);

/// Open-addressed, linear-probed store of canonical kmers.
pub struct KmerHashTable<const W: usize> {
    /// `capacity * W` atomic words; bucket `h` owns `[h*W, h*W + W)`,
    /// most-significant word first.
    keys: Box<[AtomicU64]>,
    capacity: u64,
    /// `ceil(MAX_LOAD_FACTOR * capacity)` — inserts beyond this fail.
    limit: u64,
    occupied: AtomicU64,
    hasher: ahash::RandomState,
}

impl<const W: usize> KmerHashTable<W> {
    /// Allocate a table with `capacity` buckets in one monolithic block.
    pub fn new(capacity: u64) -> Result<Self, CtxError> {
        if capacity == 0 {
            return Err(CtxError::InvalidInput(
                "hash table capacity must be non-zero".to_string(),
            ));
        }
        let nwords = (capacity as usize)
            .checked_mul(W)
            .ok_or(CtxError::CapacityExceeded)?;
        let mut keys = Vec::new();
        if keys.try_reserve_exact(nwords).is_err() {
            return Err(CtxError::CapacityExceeded);
        }
        for i in 0..nwords {
            keys.push(AtomicU64::new(if i % W == 0 { EMPTY } else { 0 }));
        }
        Ok(Self {
            keys: keys.into_boxed_slice(),
            capacity,
            limit: (capacity * 3).div_ceil(4),
            occupied: AtomicU64::new(0),
            hasher: ahash::RandomState::with_seeds(
                HASH_SEEDS.0,
                HASH_SEEDS.1,
                HASH_SEEDS.2,
                HASH_SEEDS.3,
            ),
        })
    }

    /// Number of buckets.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of live keys.
    #[inline]
    pub fn num_kmers(&self) -> u64 {
        self.occupied.load(Ordering::Relaxed)
    }

    /// Insert ceiling implied by the load-factor policy.
    #[inline]
    pub fn insert_limit(&self) -> u64 {
        self.limit
    }

    #[inline]
    fn start_bucket(&self, kmer: &BinaryKmer<W>) -> u64 {
        self.hasher.hash_one(kmer.words()) % self.capacity
    }

    /// Load the top word of a bucket, spinning past in-flight inserts.
    #[inline]
    fn settled_top_word(&self, bucket: u64) -> u64 {
        let slot = &self.keys[(bucket as usize) * W];
        loop {
            let w = slot.load(Ordering::Acquire);
            if w != BUSY {
                return w;
            }
            std::hint::spin_loop();
        }
    }

    /// Compare a settled bucket against `kmer` (top word already matched).
    #[inline]
    fn rest_matches(&self, bucket: u64, kmer: &BinaryKmer<W>) -> bool {
        let base = (bucket as usize) * W;
        for j in 1..W {
            if self.keys[base + j].load(Ordering::Acquire) != kmer.words()[j] {
                return false;
            }
        }
        true
    }

    /// Look up a canonical kmer. O(1) expected.
    pub fn find(&self, kmer: &BinaryKmer<W>) -> Option<u64> {
        let start = self.start_bucket(kmer);
        for probe in 0..self.capacity {
            let bucket = (start + probe) % self.capacity;
            let w0 = self.settled_top_word(bucket);
            match w0 {
                EMPTY => return None,
                TOMBSTONE => continue,
                _ => {
                    if w0 == kmer.words()[0] && self.rest_matches(bucket, kmer) {
                        return Some(bucket);
                    }
                }
            }
        }
        None
    }

    /// Look up a canonical kmer, inserting it if absent.
    ///
    /// Returns the handle and whether the key was newly inserted. Safe
    /// under concurrent insertion. Tombstoned buckets are reused, but
    /// only after the probe chain has been scanned for the key; cleaning
    /// and concurrent building never overlap, so a reused bucket cannot
    /// race a duplicate insert of the same key.
    pub fn find_or_insert(&self, kmer: &BinaryKmer<W>) -> Result<(u64, bool), CtxError> {
        let start = self.start_bucket(kmer);
        'restart: loop {
            let mut claim_at: Option<(u64, u64)> = None; // (bucket, observed marker)
            for probe in 0..self.capacity {
                let bucket = (start + probe) % self.capacity;
                let w0 = self.settled_top_word(bucket);
                match w0 {
                    EMPTY => {
                        let target = claim_at.unwrap_or((bucket, EMPTY));
                        match self.try_claim(target.0, target.1, kmer) {
                            ClaimOutcome::Inserted => return Ok((target.0, true)),
                            ClaimOutcome::FoundExisting => return Ok((target.0, false)),
                            ClaimOutcome::Lost => continue 'restart,
                            ClaimOutcome::Full => return Err(CtxError::CapacityExceeded),
                        }
                    }
                    TOMBSTONE => {
                        if claim_at.is_none() {
                            claim_at = Some((bucket, TOMBSTONE));
                        }
                    }
                    _ => {
                        if w0 == kmer.words()[0] && self.rest_matches(bucket, kmer) {
                            return Ok((bucket, false));
                        }
                    }
                }
            }
            // Probed every bucket without finding the key or a free slot.
            if let Some((bucket, marker)) = claim_at {
                match self.try_claim(bucket, marker, kmer) {
                    ClaimOutcome::Inserted => return Ok((bucket, true)),
                    ClaimOutcome::FoundExisting => return Ok((bucket, false)),
                    ClaimOutcome::Lost => continue 'restart,
                    ClaimOutcome::Full => return Err(CtxError::CapacityExceeded),
                }
            }
            return Err(CtxError::CapacityExceeded);
        }
    }

    fn try_claim(&self, bucket: u64, expect: u64, kmer: &BinaryKmer<W>) -> ClaimOutcome {
        // Reserve a slot against the ceiling before touching the bucket.
        if self.occupied.fetch_add(1, Ordering::AcqRel) >= self.limit {
            self.occupied.fetch_sub(1, Ordering::AcqRel);
            return ClaimOutcome::Full;
        }
        let base = (bucket as usize) * W;
        match self.keys[base].compare_exchange(
            expect,
            BUSY,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                for j in 1..W {
                    self.keys[base + j].store(kmer.words()[j], Ordering::Release);
                }
                self.keys[base].store(kmer.words()[0], Ordering::Release);
                ClaimOutcome::Inserted
            }
            Err(_) => {
                self.occupied.fetch_sub(1, Ordering::AcqRel);
                // Another thread won the bucket; it may have inserted the
                // very key we carry.
                let w0 = self.settled_top_word(bucket);
                if w0 == kmer.words()[0] && self.rest_matches(bucket, kmer) {
                    ClaimOutcome::FoundExisting
                } else {
                    ClaimOutcome::Lost
                }
            }
        }
    }

    /// Whether a bucket currently holds a live key.
    #[inline]
    pub fn is_occupied(&self, handle: u64) -> bool {
        let w0 = self.keys[(handle as usize) * W].load(Ordering::Acquire);
        w0 != EMPTY && w0 != TOMBSTONE && w0 != BUSY
    }

    /// Read the key stored at `handle`. The bucket must be occupied.
    #[inline]
    pub fn kmer_at(&self, handle: u64) -> BinaryKmer<W> {
        let base = (handle as usize) * W;
        let mut words = [0u64; W];
        for j in 0..W {
            words[j] = self.keys[base + j].load(Ordering::Acquire);
        }
        debug_assert!(words[0] < TOMBSTONE, "bucket {handle} is not occupied");
        BinaryKmer::from_words(words)
    }

    /// Tombstone a bucket, reclaiming its slot. Not safe to run
    /// concurrently with inserts; the cleaner runs in its own phase.
    pub fn remove(&self, handle: u64) {
        let base = (handle as usize) * W;
        debug_assert!(self.is_occupied(handle));
        self.keys[base].store(TOMBSTONE, Ordering::Release);
        for j in 1..W {
            self.keys[base + j].store(0, Ordering::Release);
        }
        self.occupied.fetch_sub(1, Ordering::AcqRel);
    }

    /// Iterate the live buckets in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, BinaryKmer<W>)> + '_ {
        (0..self.capacity).filter_map(move |h| {
            if self.is_occupied(h) {
                Some((h, self.kmer_at(h)))
            } else {
                None
            }
        })
    }
}

enum ClaimOutcome {
    Inserted,
    FoundExisting,
    Lost,
    Full,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
