// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! [`PositionSource`] — a standalone ordered-string generator for callers
//! that do not want to keep a [`crate::order::BunchTree`] at all. It trades
//! the tree's O(depth) bookkeeping for a flat, append-mostly string format:
//! each "waypoint" (an `(id, counter)` pair, the flat analog of a bunch) is
//! reused for monotonic forward runs exactly as `BunchTree`'s reuse
//! exception reuses a bunch.

use crate::lex::{decode_offset, encode_offset, DEFAULT_BASE};

/// Less than every string this generator (or any other replica's) ever
/// produces.
pub const FIRST: &str = "";
/// Greater than every string this generator (or any other replica's) ever
/// produces.
pub const LAST: &str = "~";

/// A lightweight generator of totally ordered strings, independent of any
/// [`crate::order::BunchTree`]. See the module docs for the trade-off this
/// makes relative to keeping a full tree.
pub struct PositionSource {
    id: String,
    last_value_indices: Vec<u32>,
}

impl PositionSource {
    pub const FIRST: &'static str = FIRST;
    pub const LAST: &'static str = LAST;

    /// Creates a generator identified by `id`. Distinct replicas must use
    /// distinct ids for [`create_between`](Self::create_between) to
    /// produce a consistent total order.
    pub fn new(id: impl Into<String>) -> Self {
        PositionSource {
            id: id.into(),
            last_value_indices: Vec::new(),
        }
    }

    /// Returns a new string that sorts strictly between `left` and `right`.
    ///
    /// Reuses the waypoint at the end of `left` (advancing its counter)
    /// when `left` was this generator's own most recent output there,
    /// which is what keeps monotonic forward runs from this replica short.
    pub fn create_between(&mut self, left: &str, right: &str) -> String {
        if right != LAST && (left == FIRST || right.starts_with(left)) {
            let truncated = &right[..right.len() - 1];
            return format!("{truncated}l{}", self.new_waypoint());
        }
        if left == FIRST {
            return self.new_waypoint();
        }
        if let Some(reused) = self.try_reuse(left) {
            return reused;
        }
        format!("{left},{}", self.new_waypoint())
    }

    /// Allocates a fresh waypoint: `{id},{encode(counter)},0r`. The leading
    /// separator that joins it to an existing prefix is the caller's
    /// responsibility, since a bare waypoint is itself a valid (and
    /// shortest) output when `left == FIRST`.
    fn new_waypoint(&mut self) -> String {
        let counter = self.last_value_indices.len() as u32;
        self.last_value_indices.push(0);
        format!("{},{},0r", self.id, encode_offset(counter, DEFAULT_BASE))
    }

    /// If `left` ends in a waypoint triple this generator itself minted,
    /// and that waypoint's value index is still at the value this
    /// generator last left it at, advances the counter and returns the
    /// extended string. Otherwise returns `None`.
    fn try_reuse(&mut self, left: &str) -> Option<String> {
        let mut parts = left.rsplitn(4, ',');
        let tail = parts.next()?;
        let counter_enc = parts.next()?;
        let sender_id = parts.next()?;
        if sender_id != self.id {
            return None;
        }
        if tail.len() < 2 {
            return None;
        }
        let side = tail.as_bytes()[tail.len() - 1];
        if side != b'l' && side != b'r' {
            return None;
        }
        let value_index_enc = &tail[..tail.len() - 1];
        let counter = decode_offset(counter_enc, DEFAULT_BASE).ok()? as usize;
        let value_index = decode_offset(value_index_enc, DEFAULT_BASE).ok()?;
        if self.last_value_indices.get(counter) != Some(&value_index) {
            return None;
        }
        let successor = value_index + 1;
        self.last_value_indices[counter] = successor;
        let kept = left.len() - tail.len();
        Some(format!("{}{}r", &left[..kept], encode_offset(successor, DEFAULT_BASE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_sequential_append_reuses_the_waypoint() {
        let mut source = PositionSource::new("A");
        let p1 = source.create_between(FIRST, LAST);
        assert_eq!(p1, "A,0,0r");
        let p2 = source.create_between(&p1, LAST);
        assert_eq!(p2, "A,0,1r");
        let p3 = source.create_between(&p2, LAST);
        assert_eq!(p3, "A,0,2r");
        assert!(p1 < p2);
        assert!(p2 < p3);
    }

    #[test]
    fn s2_concurrent_insertion_orders_by_id() {
        let mut a = PositionSource::new("A");
        let mut b = PositionSource::new("B");
        let pa = a.create_between(FIRST, LAST);
        let pb = b.create_between(FIRST, LAST);
        assert_eq!(pa, "A,0,0r");
        assert_eq!(pb, "B,0,0r");
        assert!(pa < pb);
    }

    #[test]
    fn s3_concurrent_runs_do_not_interleave() {
        let mut a = PositionSource::new("A");
        let mut b = PositionSource::new("B");
        let mut a_positions = Vec::new();
        let mut prev = FIRST.to_string();
        for _ in 0..3 {
            let next = a.create_between(&prev, LAST);
            a_positions.push(next.clone());
            prev = next;
        }
        let mut b_positions = Vec::new();
        let mut prev = FIRST.to_string();
        for _ in 0..3 {
            let next = b.create_between(&prev, LAST);
            b_positions.push(next.clone());
            prev = next;
        }

        let mut merged: Vec<(String, char)> = a_positions
            .iter()
            .map(|s| (s.clone(), 'A'))
            .chain(b_positions.iter().map(|s| (s.clone(), 'B')))
            .collect();
        merged.sort();
        let run: Vec<char> = merged.iter().map(|(_, tag)| *tag).collect();
        let first = run[0];
        assert!(run.iter().take_while(|&&t| t == first).count() == 3, "runs interleaved: {run:?}");
    }

    #[test]
    fn create_between_always_sorts_strictly_between() {
        let mut source = PositionSource::new("R");
        let mut left = FIRST.to_string();
        for _ in 0..10 {
            let mid = source.create_between(&left, LAST);
            assert!(mid.as_str() > left.as_str());
            assert!(mid.as_str() < LAST);
            left = mid;
        }
    }
}
