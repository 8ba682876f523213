//! Compact sets of instance numbers
//!
//! An [`ImageRange`] keeps sorted, disjoint, non-adjacent intervals and
//! renders as `1-5,7-9`. Merging is always a set union, so no previously
//! recorded instance can be lost.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRangeError {
    #[error("Invalid instance number {0:?}")]
    InvalidNumber(String),

    #[error("Descending interval {0}-{1}")]
    Descending(u32, u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImageRange {
    intervals: Vec<(u32, u32)>,
}

impl ImageRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(instance: u32) -> Self {
        Self {
            intervals: vec![(instance, instance)],
        }
    }

    /// Parses `1-5,7-9` style text; whitespace is ignored and the empty
    /// string is the empty range
    pub fn parse(text: &str) -> Result<Self, ImageRangeError> {
        let mut intervals = Vec::new();
        for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (low, high) = match part.split_once('-') {
                Some((low, high)) => (parse_number(low)?, parse_number(high)?),
                None => {
                    let number = parse_number(part)?;
                    (number, number)
                }
            };
            if low > high {
                return Err(ImageRangeError::Descending(low, high));
            }
            intervals.push((low, high));
        }
        Ok(Self::normalized(intervals))
    }

    /// Adds an instance; returns `false` if it was already present
    pub fn insert(&mut self, instance: u32) -> bool {
        if self.contains(instance) {
            return false;
        }
        let mut intervals = std::mem::take(&mut self.intervals);
        intervals.push((instance, instance));
        *self = Self::normalized(intervals);
        true
    }

    pub fn union(&self, other: &ImageRange) -> ImageRange {
        let intervals = self
            .intervals
            .iter()
            .chain(other.intervals.iter())
            .copied()
            .collect();
        Self::normalized(intervals)
    }

    pub fn contains(&self, instance: u32) -> bool {
        self.intervals
            .binary_search_by(|&(low, high)| {
                if high < instance {
                    std::cmp::Ordering::Less
                } else if low > instance {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Number of instances in the range
    pub fn len(&self) -> usize {
        self.intervals
            .iter()
            .map(|&(low, high)| (high - low) as usize + 1)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn first(&self) -> Option<u32> {
        self.intervals.first().map(|&(low, _)| low)
    }

    pub fn last(&self) -> Option<u32> {
        self.intervals.last().map(|&(_, high)| high)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.intervals.iter().flat_map(|&(low, high)| low..=high)
    }

    fn normalized(mut intervals: Vec<(u32, u32)>) -> Self {
        intervals.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(intervals.len());
        for (low, high) in intervals {
            match merged.last_mut() {
                Some(last) if low <= last.1.saturating_add(1) => last.1 = last.1.max(high),
                _ => merged.push((low, high)),
            }
        }
        Self { intervals: merged }
    }
}

fn parse_number(text: &str) -> Result<u32, ImageRangeError> {
    text.trim()
        .parse()
        .map_err(|_| ImageRangeError::InvalidNumber(text.to_string()))
}

impl fmt::Display for ImageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(low, high)) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if low == high {
                write!(f, "{low}")?;
            } else {
                write!(f, "{low}-{high}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ImageRange {
    type Err = ImageRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromIterator<u32> for ImageRange {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::normalized(iter.into_iter().map(|n| (n, n)).collect())
    }
}

impl Serialize for ImageRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
