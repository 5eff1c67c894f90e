//! Sync tag allocation.
//!
//! A tag is the only identity a record has across replicas. Tags are drawn
//! at random from a 26^20 space and checked against every tag this process
//! has issued or observed, never against remote state.

use crate::Tag;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Length of every allocated tag.
pub const TAG_LEN: usize = 20;

/// Issues unique sync tags for one run.
#[derive(Debug, Clone)]
pub struct TagAllocator {
    rng: StdRng,
    issued: HashSet<Tag>,
}

impl TagAllocator {
    /// Allocator seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic allocator, the same seed yields the same tag sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            issued: HashSet::new(),
        }
    }

    /// Register tags that already exist so they are never reissued.
    pub fn observe<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>) {
        self.issued.extend(tags.into_iter().cloned());
    }

    /// Draw a tag that has not been issued or observed in this run.
    pub fn allocate(&mut self) -> Tag {
        loop {
            let tag = self.draw();
            if self.issued.insert(tag.clone()) {
                return tag;
            }
        }
    }

    /// Number of tags issued or observed so far.
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    fn draw(&mut self) -> Tag {
        (0..TAG_LEN)
            .map(|_| char::from(self.rng.gen_range(b'a'..=b'z')))
            .collect()
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}
