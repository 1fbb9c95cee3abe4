//! Bucketed sliding window for one `(rule, scope key)` pair.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::model::Address;

use super::{Dimension, RateLimitRule};

/// One `precision`-wide counter bucket.
#[derive(Debug)]
struct Bucket {
    index: u64,
    count: u64,
    total_size: u64,
    /// Recipients first observed in this bucket (window-distinct).
    recipients: HashSet<Address>,
}

impl Bucket {
    fn new(index: u64) -> Self {
        Self {
            index,
            count: 0,
            total_size: 0,
            recipients: HashSet::new(),
        }
    }
}

/// Ring of buckets covering the trailing `duration` of one scope key.
#[derive(Debug, Default)]
pub(super) struct Window {
    buckets: VecDeque<Bucket>,
}

impl Window {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn bucket_index(elapsed: Duration, precision: Duration) -> u64 {
        (elapsed.as_millis() / precision.as_millis().max(1)) as u64
    }

    /// Drop buckets that have slid out of the window ending now.
    pub(super) fn evict(&mut self, elapsed: Duration, rule: &RateLimitRule) {
        let current = Self::bucket_index(elapsed, rule.precision);
        let width = (rule.duration.as_millis() / rule.precision.as_millis().max(1)) as u64;
        while let Some(front) = self.buckets.front() {
            if front.index + width <= current {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// First dimension the projected post-increment sums would exceed, if
    /// any. Call after [`Self::evict`]; reads only, so a violation leaves
    /// every counter untouched.
    pub(super) fn first_violation(
        &self,
        rule: &RateLimitRule,
        message_size: u64,
        recipients: &[Address],
    ) -> Option<Dimension> {
        if let Some(cap) = rule.size
            && message_size > cap
        {
            return Some(Dimension::Size);
        }
        if let Some(cap) = rule.count {
            let in_window: u64 = self.buckets.iter().map(|b| b.count).sum();
            if in_window + 1 > cap {
                return Some(Dimension::Count);
            }
        }
        if let Some(cap) = rule.total_size {
            let in_window: u64 = self.buckets.iter().map(|b| b.total_size).sum();
            if in_window + message_size > cap {
                return Some(Dimension::TotalSize);
            }
        }
        if let Some(cap) = rule.recipients {
            let mut distinct: HashSet<&Address> =
                self.buckets.iter().flat_map(|b| &b.recipients).collect();
            distinct.extend(recipients);
            if distinct.len() as u64 > cap {
                return Some(Dimension::Recipients);
            }
        }
        None
    }

    /// Record an admitted call in the current bucket.
    pub(super) fn commit(
        &mut self,
        elapsed: Duration,
        rule: &RateLimitRule,
        message_size: u64,
        recipients: &[Address],
    ) {
        let index = Self::bucket_index(elapsed, rule.precision);
        if self.buckets.back().map_or(true, |b| b.index != index) {
            self.buckets.push_back(Bucket::new(index));
        }
        let fresh: Vec<Address> = recipients
            .iter()
            .filter(|r| !self.buckets.iter().any(|b| b.recipients.contains(*r)))
            .cloned()
            .collect();

        if let Some(bucket) = self.buckets.back_mut() {
            bucket.count += 1;
            bucket.total_size += message_size;
            bucket.recipients.extend(fresh);
        }
    }
}
