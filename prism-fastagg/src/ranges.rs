//! Type agnostic representation of the ranges of a bucket aggregation.
//!
//! Bridges translate their own bucket definitions into this sorted list of
//! `[lower, upper)` byte intervals. All bounds share one width and compare as
//! unsigned big-endian integers.

use crate::error::{Error, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranges {
    lowers: Vec<Vec<u8>>, // inclusive
    uppers: Vec<Vec<u8>>, // exclusive
    byte_len: usize,
}

impl Ranges {
    /// Build ranges from parallel bound arrays.
    ///
    /// Ascending order and non-overlap are the caller's responsibility; only
    /// the shape of the input is checked here.
    pub fn new(lowers: Vec<Vec<u8>>, uppers: Vec<Vec<u8>>) -> Result<Self> {
        if lowers.len() != uppers.len() {
            return Err(Error::InvalidRanges(format!(
                "{} lower bounds but {} upper bounds",
                lowers.len(),
                uppers.len()
            )));
        }
        let byte_len = match lowers.first() {
            Some(first) => first.len(),
            None => return Err(Error::InvalidRanges("no ranges".to_string())),
        };
        if lowers
            .iter()
            .chain(uppers.iter())
            .any(|bound| bound.len() != byte_len)
        {
            return Err(Error::InvalidRanges(format!(
                "every bound must be {byte_len} bytes wide"
            )));
        }
        Ok(Self {
            lowers,
            uppers,
            byte_len,
        })
    }

    pub fn len(&self) -> usize {
        self.lowers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lowers.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn lower(&self, idx: usize) -> &[u8] {
        &self.lowers[idx]
    }

    pub fn upper(&self, idx: usize) -> &[u8] {
        &self.uppers[idx]
    }

    /// Unsigned lexicographic comparison over the first `byte_len` bytes.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a[..self.byte_len].cmp(&b[..self.byte_len])
    }

    pub fn within_lower_bound(&self, value: &[u8], idx: usize) -> bool {
        self.compare(value, &self.lowers[idx]) != Ordering::Less
    }

    pub fn within_upper_bound(&self, value: &[u8], idx: usize) -> bool {
        self.compare(value, &self.uppers[idx]) == Ordering::Less
    }

    pub fn within_range(&self, value: &[u8], idx: usize) -> bool {
        self.within_lower_bound(value, idx) && self.within_upper_bound(value, idx)
    }

    /// Index of the first range that can hold a value in `[global_min, global_max]`.
    ///
    /// Returns `None` when the first range starts above `global_max` or every
    /// range ends at or below `global_min`.
    pub fn first_range_index(&self, global_min: &[u8], global_max: &[u8]) -> Option<usize> {
        if self.compare(&self.lowers[0], global_max) == Ordering::Greater {
            return None;
        }
        (0..self.len()).find(|&i| self.compare(&self.uppers[i], global_min) == Ordering::Greater)
    }

    /// Index of the range holding `value`, by binary search.
    pub fn range_index_of(&self, value: &[u8]) -> Option<usize> {
        let idx = self
            .uppers
            .partition_point(|upper| self.compare(upper, value) != Ordering::Greater);
        (idx < self.len() && self.within_lower_bound(value, idx)).then_some(idx)
    }
}
