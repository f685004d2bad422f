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

//! [`ItemList`] and [`Outline`] — the per-replica indexed presence view over
//! a [`BunchTree`]. Each tracked bunch carries a run-length-compressed
//! presence map plus a `total` augmentation (own present count, and every
//! descendant bunch's present count), which is what lets `index_of_position`
//! and `position_at` run in time proportional to tree depth instead of list
//! length.
//!
//! A single `BunchTree` may be shared by several `ItemList`s (the module's
//! concurrency model requires the host to serialize `BunchTree` mutation
//! against `ItemList` reads itself), so the tree is held behind `Rc<RefCell<_>>`
//! — the same interior-mutability idiom `jj-lib` uses for its shared
//! `MutableRepo`/`Store` handles.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{PositionError, Result};
use crate::order::{Bunch, BunchMeta, BunchTree};
use crate::position::{Position, MAX_POSITION, MIN_POSITION, ROOT};

/// Which side of a deleted slot an index lookup should stick to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Fail (return `-1`) if the position is absent.
    None,
    /// Return the index of the nearest present value to the left.
    Left,
    /// Return the index of the nearest present value to the right.
    Right,
}

/// A [`Position`] paired with a [`Direction`], so that repeated lookups
/// against a position that has since been deleted keep resolving to a
/// sensible nearby index instead of erroring every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub position: Position,
    pub dir: Direction,
}

/// One run in a bunch's alternating presence array.
#[derive(Debug, Clone)]
enum RunSlot<T> {
    Present(Vec<T>),
    Gap(u32),
}

impl<T> RunSlot<T> {
    fn len(&self) -> u32 {
        match self {
            RunSlot::Present(values) => values.len() as u32,
            RunSlot::Gap(n) => *n,
        }
    }

    fn is_present(&self) -> bool {
        matches!(self, RunSlot::Present(_))
    }
}

/// The wire shape of one run: a `T[]` (present) or a bare count (deleted),
/// matching spec.md's `[T[] | u32, ...]` convention. `#[serde(untagged)]`
/// discriminates on JSON shape (array vs. number), not on a tag field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunWire<T> {
    Present(Vec<T>),
    Gap(u32),
}

/// Expands a bunch's runs into one slot per inner index, `None` for gaps.
fn expand<T: Clone>(runs: &[RunSlot<T>]) -> Vec<Option<T>> {
    let mut out = Vec::new();
    for run in runs {
        match run {
            RunSlot::Present(values) => out.extend(values.iter().cloned().map(Some)),
            RunSlot::Gap(n) => out.extend(std::iter::repeat(None).take(*n as usize)),
        }
    }
    out
}

/// Recompresses a dense slot array back into alternating runs: a leading
/// empty `Present` run if the array starts with a gap (keeping the
/// "present first" wire convention even when the bunch's first slot isn't),
/// and no trailing `Gap` run.
fn compress<T>(slots: Vec<Option<T>>) -> SmallVec<[RunSlot<T>; 4]> {
    let mut out: SmallVec<[RunSlot<T>; 4]> = SmallVec::new();
    if matches!(slots.first(), Some(None)) {
        out.push(RunSlot::Present(Vec::new()));
    }
    for (present, group) in &slots.into_iter().chunk_by(|slot| slot.is_some()) {
        if present {
            out.push(RunSlot::Present(group.map(|slot| slot.unwrap()).collect()));
        } else {
            out.push(RunSlot::Gap(group.count() as u32));
        }
    }
    if matches!(out.last(), Some(RunSlot::Gap(_))) {
        out.pop();
    }
    out
}

/// One bunch's presence runs plus its subtree-augmented total.
#[derive(Debug, Clone)]
struct BunchEntry<T> {
    runs: SmallVec<[RunSlot<T>; 4]>,
    total: u32,
}

impl<T> Default for BunchEntry<T> {
    fn default() -> Self {
        BunchEntry { runs: SmallVec::new(), total: 0 }
    }
}

impl<T: Clone> BunchEntry<T> {
    /// Sets `inner_index`, returning `true` if that slot was previously
    /// absent (the caller must then propagate `+1` to ancestor totals).
    fn set(&mut self, inner_index: u32, value: T) -> bool {
        let mut slots = expand(&self.runs);
        let idx = inner_index as usize;
        if idx >= slots.len() {
            slots.resize_with(idx + 1, || None);
        }
        let was_absent = slots[idx].is_none();
        slots[idx] = Some(value);
        self.runs = compress(slots);
        was_absent
    }

    /// Clears `inner_index`, returning `true` if it was previously present.
    fn delete(&mut self, inner_index: u32) -> bool {
        let mut slots = expand(&self.runs);
        let idx = inner_index as usize;
        if idx >= slots.len() {
            return false;
        }
        let was_present = slots[idx].is_some();
        slots[idx] = None;
        self.runs = compress(slots);
        was_present
    }

    fn get(&self, inner_index: u32) -> Option<&T> {
        let mut offset = 0u32;
        for run in &self.runs {
            let len = run.len();
            if inner_index < offset + len {
                return match run {
                    RunSlot::Present(values) => values.get((inner_index - offset) as usize),
                    RunSlot::Gap(_) => None,
                };
            }
            offset += len;
        }
        None
    }
}

/// One emitted element of a bunch's `values_and_children` sequence: either
/// one of its own slots, or a whole child subtree (skipped entirely when
/// its `total` is `0`, per spec.md §4.3).
#[derive(Debug, Clone)]
enum Span<T> {
    Value { position: Position, value: Option<T> },
    Child { bunch_id: String, total: u32 },
}

/// Per-replica mapping `bunch_id -> sparse_presence_array`, augmented with
/// subtree totals for O(depth) index <-> position translation. See the
/// module docs for the `Rc<RefCell<BunchTree>>` sharing model.
pub struct ItemList<T> {
    order: Rc<RefCell<BunchTree>>,
    entries: BTreeMap<String, BunchEntry<T>>,
    length: u32,
    generation: u64,
}

impl<T> ItemList<T> {
    /// Creates an empty list over `order`, which may already have bunches
    /// installed (e.g. shared with another `ItemList`).
    pub fn new(order: Rc<RefCell<BunchTree>>) -> Self {
        ItemList {
            order,
            entries: BTreeMap::new(),
            length: 0,
            generation: 0,
        }
    }

    /// The number of present values.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Drops all presence state. The underlying `Order` is untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.length = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn cursor_at(&self, position: Position, dir: Direction) -> Cursor {
        Cursor { position, dir }
    }
}

impl<T: Clone> ItemList<T> {
    fn reject_sentinel(&self, pos: &Position) -> Result<()> {
        if *pos == *MIN_POSITION || *pos == *MAX_POSITION {
            return Err(PositionError::InvalidPosition {
                position: pos.clone(),
                reason: "MIN_POSITION/MAX_POSITION are sentinels and cannot be stored".to_string(),
            });
        }
        Ok(())
    }

    fn subtree_total(&self, bunch_id: &str) -> u32 {
        self.entries.get(bunch_id).map(|e| e.total).unwrap_or(0)
    }

    /// Adds `delta` (`1` or `-1`) to `start_bunch_id`'s total and every
    /// ancestor's, up to (but excluding) the root, then adjusts `length` by
    /// the same amount. Entries whose total falls to `0` are dropped, per
    /// the "empty bunches are not stored" rule.
    fn propagate(&mut self, start_bunch_id: &str, delta: i64) -> Result<()> {
        let mut current_id = start_bunch_id.to_string();
        loop {
            let entry = self.entries.entry(current_id.clone()).or_default();
            entry.total = (entry.total as i64 + delta) as u32;
            if entry.total == 0 {
                self.entries.remove(&current_id);
            }
            let order = self.order.borrow();
            let bunch = order
                .get_node(&current_id)
                .ok_or_else(|| PositionError::UnknownBunch { bunch_id: current_id.clone() })?;
            if bunch.parent_id == ROOT {
                self.length = (self.length as i64 + delta) as u32;
                return Ok(());
            }
            let parent_id = bunch.parent_id.clone();
            drop(order);
            current_id = parent_id;
        }
    }

    /// Marks `pos` present with `value`. `O(items in bunch + depth)`.
    pub fn set(&mut self, pos: &Position, value: T) -> Result<()> {
        self.reject_sentinel(pos)?;
        self.order.borrow().get_node_for(pos)?;
        self.generation = self.generation.wrapping_add(1);
        let became_present = self.entries.entry(pos.bunch_id.clone()).or_default().set(pos.inner_index, value);
        if became_present {
            self.propagate(&pos.bunch_id, 1)?;
        }
        Ok(())
    }

    /// Clears `pos`. A no-op if it was already absent or never tracked.
    pub fn delete(&mut self, pos: &Position) -> Result<()> {
        self.reject_sentinel(pos)?;
        self.order.borrow().get_node_for(pos)?;
        self.generation = self.generation.wrapping_add(1);
        let became_absent = match self.entries.get_mut(&pos.bunch_id) {
            Some(entry) => entry.delete(pos.inner_index),
            None => false,
        };
        if became_absent {
            self.propagate(&pos.bunch_id, -1)?;
        }
        Ok(())
    }

    pub fn has(&self, pos: &Position) -> Result<bool> {
        self.order.borrow().get_node_for(pos)?;
        Ok(self.entries.get(&pos.bunch_id).and_then(|e| e.get(pos.inner_index)).is_some())
    }

    pub fn get(&self, pos: &Position) -> Result<Option<T>> {
        self.order.borrow().get_node_for(pos)?;
        Ok(self.entries.get(&pos.bunch_id).and_then(|e| e.get(pos.inner_index)).cloned())
    }

    pub fn get_at(&self, index: u32) -> Result<T> {
        let pos = self.position_at(index)?;
        self.get(&pos)?.ok_or(PositionError::IndexOutOfBounds {
            index: index as i64,
            length: self.length as usize,
        })
    }

    /// `values_and_children(bunch)`: this bunch's own slots interleaved
    /// with its children, each child placed immediately before the value
    /// slot at its `parent_inner_index` (`(offset + 1) >> 1`, the same
    /// formula `BunchTree::compare` uses). Children with `total == 0` are
    /// omitted; children past the last tracked slot are appended at the end.
    fn bunch_spans(&self, order: &BunchTree, bunch_id: &str) -> Vec<Span<T>> {
        let children: Vec<(u32, String)> = order
            .get_node(bunch_id)
            .map(|b| b.children_with_offsets().map(|(o, id)| (o, id.to_string())).collect())
            .unwrap_or_default();
        let slots: Vec<Option<T>> = self.entries.get(bunch_id).map(|e| expand(&e.runs)).unwrap_or_default();

        let mut spans = Vec::new();
        let mut children = children.into_iter().peekable();
        for (k, value) in slots.into_iter().enumerate() {
            while let Some((offset, _)) = children.peek() {
                if ((*offset as usize) + 1) >> 1 != k {
                    break;
                }
                let (_, id) = children.next().expect("peeked");
                let total = self.subtree_total(&id);
                if total > 0 {
                    spans.push(Span::Child { bunch_id: id, total });
                }
            }
            spans.push(Span::Value {
                position: Position::new(bunch_id.to_string(), k as u32),
                value,
            });
        }
        for (_, id) in children {
            let total = self.subtree_total(&id);
            if total > 0 {
                spans.push(Span::Child { bunch_id: id, total });
            }
        }
        spans
    }

    /// See spec.md §4.3: locate `pos` within its bunch, add left children,
    /// then walk to the root adding ancestor present-counts and
    /// earlier-sorting-sibling totals.
    pub fn index_of_position(&self, pos: &Position, dir: Direction) -> Result<i64> {
        if *pos == *MIN_POSITION {
            return Ok(match dir {
                Direction::Right => 0,
                _ => -1,
            });
        }
        if *pos == *MAX_POSITION {
            return Ok(match dir {
                Direction::Left => self.length as i64 - 1,
                Direction::Right => self.length as i64,
                Direction::None => -1,
            });
        }

        let order = self.order.borrow();
        order.get_node_for(pos)?;

        let mut acc: i64 = 0;
        let mut is_present = false;
        for span in self.bunch_spans(&order, &pos.bunch_id) {
            match span {
                Span::Value { position, value } if position.inner_index == pos.inner_index => {
                    is_present = value.is_some();
                    break;
                }
                Span::Value { value, .. } => {
                    if value.is_some() {
                        acc += 1;
                    }
                }
                Span::Child { total, .. } => acc += total as i64,
            }
        }

        let mut bunch_id = pos.bunch_id.clone();
        loop {
            let bunch = order.get_node(&bunch_id).expect("bunch is installed");
            if bunch.parent_id == ROOT {
                break;
            }
            let parent_id = bunch.parent_id.clone();
            for span in self.bunch_spans(&order, &parent_id) {
                match span {
                    Span::Value { value, .. } => {
                        if value.is_some() {
                            acc += 1;
                        }
                    }
                    Span::Child { bunch_id: child_id, total } => {
                        if child_id == bunch_id {
                            break;
                        }
                        acc += total as i64;
                    }
                }
            }
            bunch_id = parent_id;
        }

        Ok(if is_present {
            acc
        } else {
            match dir {
                Direction::None => -1,
                Direction::Left => acc - 1,
                Direction::Right => acc,
            }
        })
    }

    /// Descends from the root following `values_and_children`, debiting
    /// `index` by each emitted span until it lands inside a present value
    /// (the answer) or a child subtree (recurse).
    pub fn position_at(&self, index: u32) -> Result<Position> {
        if index >= self.length {
            return Err(PositionError::IndexOutOfBounds {
                index: index as i64,
                length: self.length as usize,
            });
        }
        let order = self.order.borrow();
        let mut bunch_id = ROOT.to_string();
        let mut residual = index;
        loop {
            let mut next_bunch = None;
            let mut answer = None;
            for span in self.bunch_spans(&order, &bunch_id) {
                match span {
                    Span::Value { position, value } => {
                        if value.is_some() {
                            if residual == 0 {
                                answer = Some(position);
                                break;
                            }
                            residual -= 1;
                        }
                    }
                    Span::Child { bunch_id: child_id, total } => {
                        if residual < total {
                            next_bunch = Some(child_id);
                            break;
                        }
                        residual -= total;
                    }
                }
            }
            if let Some(pos) = answer {
                return Ok(pos);
            }
            match next_bunch {
                Some(child_id) => bunch_id = child_id,
                None => {
                    return Err(PositionError::IndexOutOfBounds {
                        index: index as i64,
                        length: self.length as usize,
                    })
                }
            }
        }
    }

    /// Inserts `values` starting at `index`, minting adjacent positions via
    /// `BunchTree::create_position`. Returns the new positions (in order)
    /// and, if a bunch had to be minted, its meta to broadcast.
    pub fn insert_at(&mut self, index: u32, values: Vec<T>) -> Result<(Vec<Position>, Option<BunchMeta>)> {
        let count = values.len() as u32;
        if count == 0 {
            return Ok((Vec::new(), None));
        }
        if index > self.length {
            return Err(PositionError::IndexOutOfBounds {
                index: index as i64,
                length: self.length as usize,
            });
        }
        let prev_pos = if index == 0 { MIN_POSITION.clone() } else { self.position_at(index - 1)? };
        let next_pos = if index < self.length { self.position_at(index)? } else { MAX_POSITION.clone() };
        let (start, meta) = self.order.borrow_mut().create_position(&prev_pos, &next_pos, count)?;

        let mut positions = Vec::with_capacity(count as usize);
        for (i, value) in values.into_iter().enumerate() {
            let pos = Position::new(start.bunch_id.clone(), start.inner_index + i as u32);
            self.set(&pos, value)?;
            positions.push(pos);
        }
        Ok((positions, meta))
    }

    pub fn index_of_cursor(&self, cursor: &Cursor) -> Result<i64> {
        self.index_of_position(&cursor.position, cursor.dir)
    }

    /// The present values at indices `range`, in order.
    pub fn slice(&self, range: Range<u32>) -> Result<Vec<(Position, T)>> {
        let mut out = Vec::with_capacity(range.len());
        for index in range {
            let pos = self.position_at(index)?;
            if let Some(value) = self.get(&pos)? {
                out.push((pos, value));
            }
        }
        Ok(out)
    }

    /// Explicit-stack DFS over `values_and_children`, rooted at `ROOT`.
    pub fn entries(&self) -> Entries<'_, T> {
        let order = self.order.borrow();
        let root_spans = self.bunch_spans(&order, ROOT);
        drop(order);
        Entries {
            list: self,
            generation: self.generation,
            stack: vec![(root_spans, 0)],
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Result<T>> + '_ {
        self.entries().map(|r| r.map(|(_, v)| v))
    }

    pub fn positions(&self) -> impl Iterator<Item = Result<Position>> + '_ {
        self.entries().map(|r| r.map(|(p, _)| p))
    }

    /// Save shape: `{bunch_id -> [T[] | u32, ...]}`. `entries` is a
    /// `BTreeMap`, so iteration is already lexicographically sorted by
    /// `bunch_id`, satisfying the stable-serialization requirement for free.
    pub fn save(&self) -> BTreeMap<String, Vec<RunWire<T>>> {
        self.entries
            .iter()
            .map(|(id, entry)| {
                let wire = entry
                    .runs
                    .iter()
                    .map(|run| match run {
                        RunSlot::Present(values) => RunWire::Present(values.clone()),
                        RunSlot::Gap(n) => RunWire::Gap(*n),
                    })
                    .collect();
                (id.clone(), wire)
            })
            .collect()
    }

    /// JSON-encodes [`save`](Self::save), for hosts that persist or
    /// transmit `List save` as the JSON wire format described in spec.md §6.
    pub fn save_json(&self) -> Result<String>
    where
        T: Serialize,
    {
        serde_json::to_string(&self.save()).map_err(|e| PositionError::Serialization(e.to_string()))
    }

    /// Inverse of [`save_json`](Self::save_json); equivalent to `load` over
    /// the decoded save shape.
    pub fn load_json(&mut self, json: &str) -> Result<()>
    where
        T: for<'de> Deserialize<'de>,
    {
        let saved: BTreeMap<String, Vec<RunWire<T>>> =
            serde_json::from_str(json).map_err(|e| PositionError::Serialization(e.to_string()))?;
        self.load(saved)
    }

    /// Wholly replaces presence state. Every named bunch must already be
    /// installed in the associated `Order`.
    pub fn load(&mut self, saved: BTreeMap<String, Vec<RunWire<T>>>) -> Result<()> {
        let runs_by_bunch = saved
            .into_iter()
            .map(|(id, wire)| {
                let runs: SmallVec<[RunSlot<T>; 4]> = wire
                    .into_iter()
                    .map(|w| match w {
                        RunWire::Present(values) => RunSlot::Present(values),
                        RunWire::Gap(n) => RunSlot::Gap(n),
                    })
                    .collect();
                (id, runs)
            })
            .collect();
        self.load_runs(runs_by_bunch)
    }

    fn load_runs(&mut self, runs_by_bunch: BTreeMap<String, SmallVec<[RunSlot<T>; 4]>>) -> Result<()> {
        self.entries.clear();
        self.generation = self.generation.wrapping_add(1);
        for (bunch_id, runs) in runs_by_bunch {
            {
                let order = self.order.borrow();
                order.get_node(&bunch_id).ok_or_else(|| PositionError::UnknownBunch { bunch_id: bunch_id.clone() })?;
            }
            self.entries.insert(bunch_id, BunchEntry { runs, total: 0 });
        }
        self.recompute_totals()
    }

    /// Recomputes every tracked (and pass-through ancestor) bunch's
    /// augmented `total` bottom-up from each bunch's own run lengths, then
    /// `length` from the root's children. Needed after [`load`](Self::load),
    /// since the wire format only carries own-presence, not the aggregate.
    fn recompute_totals(&mut self) -> Result<()> {
        let order = self.order.borrow();
        let mut own: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for (id, entry) in &self.entries {
            let count: u32 = entry.runs.iter().map(|r| if r.is_present() { r.len() } else { 0 }).sum();
            own.insert(id.clone(), count);
        }

        let mut bunches: Vec<&Bunch> = order.nodes().collect();
        bunches.sort_by_key(|b| std::cmp::Reverse(b.depth));

        let mut totals: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for bunch in &bunches {
            let own_count = own.get(&bunch.bunch_id).copied().unwrap_or(0);
            let children_total: u32 = bunch.children().filter_map(|c| totals.get(c)).sum();
            let total = own_count + children_total;
            if total > 0 {
                totals.insert(bunch.bunch_id.clone(), total);
            }
        }

        self.length = bunches
            .iter()
            .filter(|b| b.parent_id == ROOT)
            .filter_map(|b| totals.get(&b.bunch_id))
            .sum();

        for (id, entry) in self.entries.iter_mut() {
            entry.total = totals.get(id).copied().unwrap_or(0);
        }
        for (id, total) in &totals {
            if !self.entries.contains_key(id) {
                self.entries.insert(
                    id.clone(),
                    BunchEntry {
                        runs: SmallVec::new(),
                        total: *total,
                    },
                );
            }
        }
        Ok(())
    }
}

/// Explicit-stack DFS iterator over an [`ItemList`]'s present `(Position, T)`
/// pairs, in list order. Detects concurrent mutation on a best-effort basis
/// via a generation counter and yields [`PositionError::ConcurrentModification`]
/// once, rather than silently producing a stale or inconsistent traversal.
pub struct Entries<'a, T> {
    list: &'a ItemList<T>,
    generation: u64,
    stack: Vec<(Vec<Span<T>>, usize)>,
}

impl<'a, T: Clone> Iterator for Entries<'a, T> {
    type Item = Result<(Position, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.list.generation != self.generation {
                return Some(Err(PositionError::ConcurrentModification));
            }
            let (spans, idx) = self.stack.last_mut()?;
            if *idx >= spans.len() {
                self.stack.pop();
                continue;
            }
            let span = spans[*idx].clone();
            *idx += 1;
            match span {
                Span::Value { position, value: Some(value) } => return Some(Ok((position, value))),
                Span::Value { value: None, .. } => continue,
                Span::Child { bunch_id, .. } => {
                    let order = self.list.order.borrow();
                    let child_spans = self.list.bunch_spans(&order, &bunch_id);
                    drop(order);
                    self.stack.push((child_spans, 0));
                }
            }
        }
    }
}

/// A presence-only specialization of [`ItemList`]: tracks which positions
/// exist without storing a value for them, for callers that only need
/// cardinality (e.g. a cursor that must stay anchored to an index without
/// caring what the underlying text is). Internally just an `ItemList<()>`;
/// `save`/`load` use the compact `[u32, ...]` count-only wire shape instead
/// of `ItemList`'s `[T[] | u32, ...]`, since every run's "values" are units.
pub struct Outline(ItemList<()>);

impl Outline {
    pub fn new(order: Rc<RefCell<BunchTree>>) -> Self {
        Outline(ItemList::new(order))
    }

    pub fn set(&mut self, pos: &Position) -> Result<()> {
        self.0.set(pos, ())
    }

    pub fn delete(&mut self, pos: &Position) -> Result<()> {
        self.0.delete(pos)
    }

    pub fn has(&self, pos: &Position) -> Result<bool> {
        self.0.has(pos)
    }

    pub fn length(&self) -> u32 {
        self.0.length()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn index_of_position(&self, pos: &Position, dir: Direction) -> Result<i64> {
        self.0.index_of_position(pos, dir)
    }

    pub fn position_at(&self, index: u32) -> Result<Position> {
        self.0.position_at(index)
    }

    pub fn insert_at(&mut self, index: u32, count: u32) -> Result<(Vec<Position>, Option<BunchMeta>)> {
        self.0.insert_at(index, vec![(); count as usize])
    }

    pub fn cursor_at(&self, position: Position, dir: Direction) -> Cursor {
        self.0.cursor_at(position, dir)
    }

    pub fn index_of_cursor(&self, cursor: &Cursor) -> Result<i64> {
        self.0.index_of_cursor(cursor)
    }

    pub fn positions(&self) -> impl Iterator<Item = Result<Position>> + '_ {
        self.0.positions()
    }

    pub fn save(&self) -> BTreeMap<String, Vec<u32>> {
        self.0
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.runs.iter().map(|r| r.len()).collect()))
            .collect()
    }

    pub fn load(&mut self, saved: BTreeMap<String, Vec<u32>>) -> Result<()> {
        let runs_by_bunch = saved
            .into_iter()
            .map(|(id, counts)| {
                let mut present = true;
                let runs: SmallVec<[RunSlot<()>; 4]> = counts
                    .into_iter()
                    .map(|n| {
                        let run = if present { RunSlot::Present(vec![(); n as usize]) } else { RunSlot::Gap(n) };
                        present = !present;
                        run
                    })
                    .collect();
                (id, runs)
            })
            .collect();
        self.0.load_runs(runs_by_bunch)
    }

    /// JSON-encodes [`save`](Self::save), for hosts that persist or
    /// transmit `Outline save` as the JSON wire format described in
    /// spec.md §6.
    pub fn save_json(&self) -> Result<String> {
        serde_json::to_string(&self.save()).map_err(|e| PositionError::Serialization(e.to_string()))
    }

    /// Inverse of [`save_json`](Self::save_json); equivalent to `load` over
    /// the decoded save shape.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let saved: BTreeMap<String, Vec<u32>> =
            serde_json::from_str(json).map_err(|e| PositionError::Serialization(e.to_string()))?;
        self.load(saved)
    }
}
