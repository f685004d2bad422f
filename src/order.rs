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

//! [`BunchTree`] — the authoritative per-replica tree of bunches.
//!
//! A bunch is a node in the position tree; it owns an unbounded contiguous
//! inner-index space. Comparing and creating positions is entirely a
//! function of this tree, which is why it is the dependency root for
//! [`crate::list`] and the reason [`crate::lex`] is specified against it.

use std::cmp::Ordering;

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PositionError, Result};
use crate::lex::LexUtils;
use crate::position::{Position, MAX_POSITION, MIN_POSITION, ROOT};

/// The wire shape of a non-root bunch: the unit of metadata exchange
/// between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunchMeta {
    pub bunch_id: String,
    pub parent_id: String,
    pub offset: u32,
}

/// A node in the position tree.
///
/// `children` is kept in sibling order (offset ascending, then `bunch_id`
/// with an appended `,` to match how the lex encoding terminates an id
/// field). `created_children` records, for bunches this replica minted,
/// which locally-minted child already occupies a given offset, enforcing
/// the create-position "reuse exception".
#[derive(Debug, Clone)]
pub struct Bunch {
    pub bunch_id: String,
    pub parent_id: String,
    pub offset: u32,
    pub depth: u32,
    children: Vec<(u32, String)>,
    created_counter: Option<u32>,
    created_children: IndexMap<u32, String>,
}

impl Bunch {
    fn root() -> Self {
        Bunch {
            bunch_id: ROOT.to_string(),
            parent_id: String::new(),
            offset: 0,
            depth: 0,
            children: Vec::new(),
            created_counter: None,
            created_children: IndexMap::new(),
        }
    }

    /// Child bunch ids in sibling order.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(_, id)| id.as_str())
    }

    /// Child `(offset, bunch_id)` pairs in sibling order, the form
    /// [`crate::list::ItemList`] needs to interleave children with its own
    /// run-length value slots.
    pub fn children_with_offsets(&self) -> impl Iterator<Item = (u32, &str)> {
        self.children.iter().map(|(o, id)| (*o, id.as_str()))
    }

    /// `true` for bunches this replica itself minted (via
    /// [`BunchTree::create_position`]), as opposed to ones installed via
    /// [`BunchTree::receive`].
    pub fn is_locally_minted(&self) -> bool {
        self.created_counter.is_some()
    }
}

/// Orders two `(offset, bunch_id)` siblings: offset ascending, then
/// `bunch_id` with an appended `,` sentinel so a shorter id that is a
/// prefix of a longer one sorts less, matching the lex encoding.
fn sibling_key(offset: u32, bunch_id: &str) -> (u32, String) {
    let mut padded = String::with_capacity(bunch_id.len() + 1);
    padded.push_str(bunch_id);
    padded.push(',');
    (offset, padded)
}

fn sibling_order(a: (u32, &str), b: (u32, &str)) -> Ordering {
    sibling_key(a.0, a.1).cmp(&sibling_key(b.0, b.1))
}

fn validate_bunch_id(bunch_id: &str) -> Result<()> {
    if bunch_id == ROOT {
        return Err(PositionError::InvalidRoot);
    }
    if bunch_id.is_empty() {
        return Err(PositionError::InvalidId {
            bunch_id: bunch_id.to_string(),
            reason: "bunch id must not be empty".to_string(),
        });
    }
    if let Some(first) = bunch_id.chars().next() {
        if first >= '~' {
            return Err(PositionError::InvalidId {
                bunch_id: bunch_id.to_string(),
                reason: "first character must sort below '~'".to_string(),
            });
        }
    }
    if bunch_id.contains(',') || bunch_id.contains('.') {
        return Err(PositionError::InvalidId {
            bunch_id: bunch_id.to_string(),
            reason: "bunch id must not contain ',' or '.'".to_string(),
        });
    }
    Ok(())
}

fn random_bunch_id() -> String {
    format!("{:x}", rand::random::<u128>())
}

/// The authoritative per-replica tree of bunches: position comparison,
/// position creation, and bunch metadata receive/install.
///
/// Single-threaded and cooperative, per the module's concurrency model: no
/// operation suspends, and a shared `BunchTree` must be externally
/// serialized by the host if it is used from more than one place (see
/// [`crate::list::ItemList`], which commonly does).
pub struct BunchTree {
    nodes: HashMap<String, Bunch>,
    new_node_id: Box<dyn FnMut() -> String>,
    on_create_node: Option<Box<dyn FnMut(&Bunch)>>,
}

impl Default for BunchTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BunchTree {
    /// Creates a fresh `Order` whose root has no children yet, using a
    /// random id generator for locally-minted bunches.
    pub fn new() -> Self {
        Self::with_id_generator(Box::new(random_bunch_id))
    }

    /// Like [`new`](Self::new), but with a caller-supplied `bunch_id`
    /// generator. Useful for deterministic tests, or to embed
    /// replica-identifying information in minted ids.
    pub fn with_id_generator(new_node_id: Box<dyn FnMut() -> String>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Bunch::root());
        BunchTree {
            nodes,
            new_node_id,
            on_create_node: None,
        }
    }

    /// Registers a callback invoked with the new [`Bunch`] whenever
    /// [`create_position`](Self::create_position) mints one.
    pub fn on_create_node(&mut self, callback: Box<dyn FnMut(&Bunch)>) {
        self.on_create_node = Some(callback);
    }

    /// Looks up a bunch by id, `ROOT` included.
    pub fn get_node(&self, bunch_id: &str) -> Option<&Bunch> {
        self.nodes.get(bunch_id)
    }

    /// Looks up the bunch owning `position`, validating that its
    /// `inner_index` is legal (only `0`/`1` are legal on the root bunch).
    pub fn get_node_for(&self, position: &Position) -> Result<&Bunch> {
        if position.bunch_id == ROOT && position.inner_index > 1 {
            return Err(PositionError::InvalidPosition {
                position: position.clone(),
                reason: "root bunch only supports inner_index 0 or 1".to_string(),
            });
        }
        self.nodes.get(&position.bunch_id).ok_or_else(|| PositionError::UnknownBunch {
            bunch_id: position.bunch_id.clone(),
        })
    }

    /// Installs new bunches from `metas`, atomically: either every new
    /// bunch installs or none do. Already-installed bunches that exactly
    /// match a meta in the batch are treated as idempotent no-ops.
    pub fn receive(&mut self, metas: impl IntoIterator<Item = BunchMeta>) -> Result<()> {
        let mut batch: IndexMap<String, BunchMeta> = IndexMap::new();
        for meta in metas {
            if meta.bunch_id == ROOT {
                return Err(PositionError::InvalidRoot);
            }
            validate_bunch_id(&meta.bunch_id)?;
            if let Some(existing) = self.nodes.get(&meta.bunch_id) {
                if existing.parent_id != meta.parent_id || existing.offset != meta.offset {
                    return Err(PositionError::Conflict {
                        bunch_id: meta.bunch_id,
                        parent_id: existing.parent_id.clone(),
                        offset: existing.offset,
                    });
                }
                continue;
            }
            if let Some(prior) = batch.get(&meta.bunch_id) {
                if prior.parent_id != meta.parent_id || prior.offset != meta.offset {
                    return Err(PositionError::Conflict {
                        bunch_id: meta.bunch_id,
                        parent_id: prior.parent_id.clone(),
                        offset: prior.offset,
                    });
                }
                continue;
            }
            batch.insert(meta.bunch_id.clone(), meta);
        }

        for meta in batch.values() {
            if meta.parent_id != ROOT && !self.nodes.contains_key(&meta.parent_id) && !batch.contains_key(&meta.parent_id) {
                return Err(PositionError::UnknownParent {
                    bunch_id: meta.bunch_id.clone(),
                    parent_id: meta.parent_id.clone(),
                });
            }
        }

        let mut available: std::collections::HashSet<String> = self.nodes.keys().cloned().collect();
        let mut pending = batch;
        let mut ordered: Vec<BunchMeta> = Vec::new();
        loop {
            let ready: Vec<String> = pending
                .values()
                .filter(|meta| available.contains(&meta.parent_id))
                .map(|meta| meta.bunch_id.clone())
                .collect();
            if ready.is_empty() {
                break;
            }
            for bunch_id in ready {
                let meta = pending.shift_remove(&bunch_id).expect("id came from pending");
                available.insert(bunch_id);
                ordered.push(meta);
            }
        }
        if let Some((bunch_id, _)) = pending.into_iter().next() {
            return Err(PositionError::Cycle { bunch_id });
        }

        for meta in ordered {
            self.install(meta);
        }
        Ok(())
    }

    fn install(&mut self, meta: BunchMeta) {
        let depth = self.nodes[&meta.parent_id].depth + 1;
        let bunch = Bunch {
            bunch_id: meta.bunch_id.clone(),
            parent_id: meta.parent_id.clone(),
            offset: meta.offset,
            depth,
            children: Vec::new(),
            created_counter: None,
            created_children: IndexMap::new(),
        };
        self.insert_sorted_child(&meta.parent_id, meta.offset, meta.bunch_id.clone());
        self.nodes.insert(meta.bunch_id, bunch);
    }

    fn insert_sorted_child(&mut self, parent_id: &str, offset: u32, child_id: String) {
        let parent = self.nodes.get_mut(parent_id).expect("parent bunch is installed");
        let at = parent
            .children
            .partition_point(|(o, id)| sibling_order((*o, id), (offset, &child_id)) == Ordering::Less);
        parent.children.insert(at, (offset, child_id));
    }

    fn compare_siblings(&self, a_id: &str, b_id: &str) -> Ordering {
        let a = self.nodes.get(a_id).expect("sibling bunch is installed");
        let b = self.nodes.get(b_id).expect("sibling bunch is installed");
        sibling_order((a.offset, a.bunch_id.as_str()), (b.offset, b.bunch_id.as_str()))
    }

    /// Strict total order over all positions this `Order` knows about.
    pub fn compare(&self, a: &Position, b: &Position) -> Result<Ordering> {
        if a.bunch_id == b.bunch_id {
            return Ok(a.inner_index.cmp(&b.inner_index));
        }
        let a_node = self.get_node_for(a)?;
        let b_node = self.get_node_for(b)?;

        let mut a_anc = a_node.bunch_id.clone();
        let mut a_depth = a_node.depth;
        let mut b_anc = b_node.bunch_id.clone();
        let mut b_depth = b_node.depth;

        while a_depth > b_depth {
            let anc = self.nodes.get(&a_anc).expect("bunch is installed");
            if anc.parent_id == b_node.bunch_id {
                return Ok(Self::resolve_against(anc.offset, b.inner_index));
            }
            a_anc = anc.parent_id.clone();
            a_depth -= 1;
        }
        while b_depth > a_depth {
            let anc = self.nodes.get(&b_anc).expect("bunch is installed");
            if anc.parent_id == a_node.bunch_id {
                return Ok(Self::resolve_against(anc.offset, a.inner_index).reverse());
            }
            b_anc = anc.parent_id.clone();
            b_depth -= 1;
        }

        loop {
            if a_anc == b_anc {
                // Only reachable if the tree is malformed; distinct leaf
                // bunches always diverge at or before the root's children.
                unreachable!("distinct bunches must diverge before converging");
            }
            let a_node = self.nodes.get(&a_anc).expect("bunch is installed");
            let b_node = self.nodes.get(&b_anc).expect("bunch is installed");
            if a_node.parent_id == b_node.parent_id {
                return Ok(self.compare_siblings(&a_anc, &b_anc));
            }
            a_anc = a_node.parent_id.clone();
            b_anc = b_node.parent_id.clone();
        }
    }

    /// `(offset + 1) >> 1`, compared against `other_inner_index + 1`: see
    /// the module-level algorithm notes in `spec.md` §4.1. Equality means
    /// the ancestor's whole subtree sits strictly between `other` and its
    /// successor, which sorts greater than `other`.
    fn resolve_against(offset: u32, other_inner_index: u32) -> Ordering {
        let lhs = (offset + 1) >> 1;
        let rhs = other_inner_index + 1;
        if lhs == rhs {
            Ordering::Greater
        } else {
            lhs.cmp(&rhs)
        }
    }

    /// `true` iff `a`'s bunch descends from `b`'s bunch at or after `b`'s
    /// inner index, i.e. `a` sits in the "rightward chain" under `b`.
    ///
    /// Ancestry is a cross-bunch relation: a bunch's own inner-index space
    /// is a flat run with no internal tree structure, so two positions
    /// sharing a bunch are never each other's descendant through this
    /// relation (this is also what gives the root's first-ever child its
    /// conventional `offset = 1`: bootstrapping `create_position(MIN_POSITION,
    /// MAX_POSITION)` must take the "not an ancestor" branch rather than
    /// treating the two root sentinels as tree-related).
    fn is_descendant(&self, a: &Position, b: &Position) -> Result<bool> {
        let a_node = self.get_node_for(a)?;
        let b_node = self.get_node_for(b)?;
        if a_node.bunch_id == b_node.bunch_id {
            return Ok(false);
        }
        if a_node.depth < b_node.depth {
            return Ok(false);
        }
        let mut cur_id = a_node.bunch_id.clone();
        let mut cur_inner_index = a.inner_index;
        let mut depth = a_node.depth;
        while depth > b_node.depth {
            let node = self.nodes.get(&cur_id).expect("bunch is installed");
            cur_inner_index = node.offset >> 1;
            cur_id = node.parent_id.clone();
            depth -= 1;
        }
        Ok(cur_id == b_node.bunch_id && cur_inner_index >= b.inner_index)
    }

    /// Mints (or reuses) `count` adjacent positions strictly between `prev`
    /// and `next`. Returns the run's start position and, if a new bunch had
    /// to be minted, the [`BunchMeta`] to broadcast.
    pub fn create_position(&mut self, prev: &Position, next: &Position, count: u32) -> Result<(Position, Option<BunchMeta>)> {
        if count < 1 {
            return Err(PositionError::Inversion);
        }
        if self.compare(prev, next)? != Ordering::Less {
            return Err(PositionError::Inversion);
        }

        let prev_is_ancestor_of_next = self.is_descendant(next, prev)?;
        let (parent_id, offset) = if !prev_is_ancestor_of_next {
            let prev_node = self.get_node_for(prev)?;
            // Only safe to extend prev's own bunch in place when prev is the
            // *last* position allocated in it; otherwise prev has content
            // after it in the same bunch (possibly `next` itself), and
            // blindly extending the counter would mint a position after
            // that content instead of strictly between `prev` and `next`.
            let prev_is_bunch_tail = prev_node
                .is_locally_minted()
                && prev.inner_index + 1 == prev_node.created_counter.expect("locally minted bunch has a counter");
            if prev_is_bunch_tail {
                let start = self.allocate_locally(&prev.bunch_id, count);
                let new_pos = Position::new(prev.bunch_id.clone(), start);
                #[cfg(debug_assertions)]
                {
                    debug_assert_eq!(self.compare(prev, &new_pos).unwrap(), Ordering::Less);
                    debug_assert_eq!(self.compare(&new_pos, next).unwrap(), Ordering::Less);
                }
                return Ok((new_pos, None));
            }
            (prev.bunch_id.clone(), 2 * prev.inner_index + 1)
        } else {
            (next.bunch_id.clone(), 2 * next.inner_index)
        };

        let existing_child = self
            .nodes
            .get(&parent_id)
            .ok_or_else(|| PositionError::UnknownBunch {
                bunch_id: parent_id.clone(),
            })?
            .created_children
            .get(&offset)
            .cloned();
        if let Some(child_id) = existing_child {
            let start = self.allocate_locally(&child_id, count);
            let new_pos = Position::new(child_id, start);
            #[cfg(debug_assertions)]
            {
                debug_assert_eq!(self.compare(prev, &new_pos).unwrap(), Ordering::Less);
                debug_assert_eq!(self.compare(&new_pos, next).unwrap(), Ordering::Less);
            }
            return Ok((new_pos, None));
        }

        let new_id = (self.new_node_id)();
        if new_id == ROOT || self.nodes.contains_key(&new_id) {
            return Err(PositionError::IdCollision { bunch_id: new_id });
        }
        validate_bunch_id(&new_id)?;

        let parent_depth = self.nodes[&parent_id].depth;
        let bunch = Bunch {
            bunch_id: new_id.clone(),
            parent_id: parent_id.clone(),
            offset,
            depth: parent_depth + 1,
            children: Vec::new(),
            created_counter: Some(count),
            created_children: IndexMap::new(),
        };
        self.insert_sorted_child(&parent_id, offset, new_id.clone());
        self.nodes.insert(new_id.clone(), bunch);
        self.nodes
            .get_mut(&parent_id)
            .expect("parent bunch is installed")
            .created_children
            .insert(offset, new_id.clone());

        let new_bunch = self.nodes.get(&new_id).expect("just inserted");
        if let Some(callback) = self.on_create_node.as_mut() {
            callback(new_bunch);
        }
        let meta = BunchMeta {
            bunch_id: new_id.clone(),
            parent_id,
            offset,
        };
        let new_pos = Position::new(new_id, 0);

        #[cfg(debug_assertions)]
        {
            debug_assert_eq!(self.compare(prev, &new_pos).unwrap(), Ordering::Less);
            debug_assert_eq!(self.compare(&new_pos, next).unwrap(), Ordering::Less);
        }

        Ok((new_pos, Some(meta)))
    }

    fn allocate_locally(&mut self, bunch_id: &str, count: u32) -> u32 {
        let bunch = self.nodes.get_mut(bunch_id).expect("locally-minted bunch is installed");
        let counter = bunch.created_counter.as_mut().expect("bunch has a local counter");
        let start = *counter;
        *counter = counter.checked_add(count).expect("inner index space exhausted");
        start
    }

    /// All installed bunches, `ROOT` excluded.
    pub fn nodes(&self) -> impl Iterator<Item = &Bunch> {
        self.nodes.values().filter(|bunch| bunch.bunch_id != ROOT)
    }

    /// The wire-format metadata for every installed bunch, `ROOT` excluded.
    pub fn node_metas(&self) -> impl Iterator<Item = BunchMeta> + '_ {
        self.nodes().map(|bunch| BunchMeta {
            bunch_id: bunch.bunch_id.clone(),
            parent_id: bunch.parent_id.clone(),
            offset: bunch.offset,
        })
    }

    /// Saves every installed bunch (`ROOT` excluded) for later [`load`](Self::load).
    pub fn save(&self) -> Vec<BunchMeta> {
        self.node_metas().collect()
    }

    /// Replaces the saved bunches. Equivalent to `receive`, since bunches
    /// are never destroyed and a fresh `Order` has nothing to conflict with.
    pub fn load(&mut self, metas: impl IntoIterator<Item = BunchMeta>) -> Result<()> {
        self.receive(metas)
    }

    /// JSON-encodes [`save`](Self::save), for hosts that persist or transmit
    /// `Order save` as the JSON wire format described in spec.md §6.
    pub fn save_json(&self) -> Result<String> {
        serde_json::to_string(&self.save()).map_err(|e| PositionError::Serialization(e.to_string()))
    }

    /// Inverse of [`save_json`](Self::save_json); equivalent to `load` over
    /// the decoded metas.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let metas: Vec<BunchMeta> = serde_json::from_str(json).map_err(|e| PositionError::Serialization(e.to_string()))?;
        self.load(metas)
    }

    /// Encodes a position as a self-contained, byte-lexicographically
    /// ordered string.
    pub fn lex(&self, position: &Position) -> Result<String> {
        if position.bunch_id == ROOT {
            return match position.inner_index {
                0 => Ok(crate::lex::MIN_LEX_POSITION.to_string()),
                1 => Ok(crate::lex::MAX_LEX_POSITION.to_string()),
                _ => Err(PositionError::InvalidPosition {
                    position: position.clone(),
                    reason: "root bunch only supports inner_index 0 or 1".to_string(),
                }),
            };
        }
        let bunch = self.get_node_for(position)?;
        let mut chain = Vec::new();
        let mut cur = bunch;
        loop {
            chain.push(BunchMeta {
                bunch_id: cur.bunch_id.clone(),
                parent_id: cur.parent_id.clone(),
                offset: cur.offset,
            });
            if cur.parent_id == ROOT {
                break;
            }
            cur = self.nodes.get(&cur.parent_id).expect("bunch is installed");
        }
        chain.reverse();
        let prefix = LexUtils::combine_node_prefix(&chain);
        Ok(LexUtils::combine_pos(&prefix, position.inner_index))
    }

    /// Decodes a lex position back into a [`Position`], installing any
    /// bunches named along its path that are not yet known locally.
    pub fn unlex(&mut self, s: &str) -> Result<Position> {
        if s == crate::lex::MIN_LEX_POSITION {
            return Ok(MIN_POSITION.clone());
        }
        if s == crate::lex::MAX_LEX_POSITION {
            return Ok(MAX_POSITION.clone());
        }
        let (prefix, inner_index) = LexUtils::split_pos(s)?;
        let metas = LexUtils::split_node_prefix(&prefix)?;
        let bunch_id = metas.last().map(|m| m.bunch_id.clone()).unwrap_or_else(|| ROOT.to_string());
        self.receive(metas)?;
        Ok(Position::new(bunch_id, inner_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_ids() -> Box<dyn FnMut() -> String> {
        let mut n = 0u32;
        Box::new(move || {
            n += 1;
            format!("b{n}")
        })
    }

    #[test]
    fn create_position_between_sentinels_mints_one_bunch() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (pos, meta) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        assert_eq!(pos, Position::new("b1", 0));
        assert!(meta.is_some());
        assert_eq!(order.compare(&MIN_POSITION, &pos).unwrap(), Ordering::Less);
        assert_eq!(order.compare(&pos, &MAX_POSITION).unwrap(), Ordering::Less);
    }

    #[test]
    fn forward_runs_share_a_bunch() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (p1, _) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        let (p2, meta2) = order.create_position(&p1, &MAX_POSITION, 1).unwrap();
        let (p3, meta3) = order.create_position(&p2, &MAX_POSITION, 1).unwrap();
        assert!(meta2.is_none());
        assert!(meta3.is_none());
        assert_eq!(p1.bunch_id, p2.bunch_id);
        assert_eq!(p2.bunch_id, p3.bunch_id);
        assert_eq!([p1.inner_index, p2.inner_index, p3.inner_index], [0, 1, 2]);
    }

    #[test]
    fn insert_between_non_adjacent_positions_of_the_same_bunch_stays_ordered() {
        // Regression test: "ac" typed as a forward run (bunch `b1`, indices
        // 0 and 1), then "b" inserted between them. `prev` (the "a" position)
        // is not the tail of `b1` (the "c" position already occupies the
        // next slot), so the insertion must NOT extend `b1`'s counter: doing
        // so would mint `(b1, 2)`, which sorts after "c" instead of between
        // "a" and "c".
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (a, _) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        let (c, meta_c) = order.create_position(&a, &MAX_POSITION, 1).unwrap();
        assert!(meta_c.is_none(), "c should share a's bunch as a forward run");

        let (b, _) = order.create_position(&a, &c, 1).unwrap();
        assert_eq!(order.compare(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(order.compare(&b, &c).unwrap(), Ordering::Less);
    }

    #[test]
    fn reuse_exception_shares_a_bunch_across_delete_and_retype() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (p1, meta1) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        // p1 is "deleted" at the presence layer; re-inserting at the same
        // spot in the Order is still `create_position(MIN, MAX)`.
        let (p2, meta2) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        assert!(meta1.is_some());
        assert!(meta2.is_none(), "second insertion at the same spot must reuse the bunch");
        assert_eq!(p1.bunch_id, p2.bunch_id);
        assert_eq!((p1.inner_index, p2.inner_index), (0, 1));
    }

    #[test]
    fn receive_installs_out_of_order_metas() {
        let mut order = BunchTree::new();
        order
            .receive(vec![
                BunchMeta { bunch_id: "c".into(), parent_id: "b".into(), offset: 1 },
                BunchMeta { bunch_id: "b".into(), parent_id: "a".into(), offset: 1 },
                BunchMeta { bunch_id: "a".into(), parent_id: ROOT.into(), offset: 1 },
            ])
            .unwrap();
        assert!(order.get_node("a").is_some());
        assert!(order.get_node("b").is_some());
        assert!(order.get_node("c").is_some());
        assert_eq!(order.get_node("c").unwrap().depth, 3);
    }

    #[test]
    fn receive_detects_cycles() {
        let mut order = BunchTree::new();
        let err = order
            .receive(vec![
                BunchMeta { bunch_id: "x".into(), parent_id: "y".into(), offset: 1 },
                BunchMeta { bunch_id: "y".into(), parent_id: "x".into(), offset: 1 },
            ])
            .unwrap_err();
        assert!(matches!(err, PositionError::Cycle { .. }));
    }

    #[test]
    fn receive_rejects_redefining_root() {
        let mut order = BunchTree::new();
        let err = order
            .receive(vec![BunchMeta { bunch_id: ROOT.into(), parent_id: ROOT.into(), offset: 1 }])
            .unwrap_err();
        assert!(matches!(err, PositionError::InvalidRoot));
    }

    #[test]
    fn receive_rejects_conflicting_meta() {
        let mut order = BunchTree::new();
        order
            .receive(vec![BunchMeta { bunch_id: "a".into(), parent_id: ROOT.into(), offset: 1 }])
            .unwrap();
        let err = order
            .receive(vec![BunchMeta { bunch_id: "a".into(), parent_id: ROOT.into(), offset: 3 }])
            .unwrap_err();
        assert!(matches!(err, PositionError::Conflict { .. }));
    }

    #[test]
    fn receive_rejects_unknown_parent() {
        let mut order = BunchTree::new();
        let err = order
            .receive(vec![BunchMeta { bunch_id: "a".into(), parent_id: "ghost".into(), offset: 1 }])
            .unwrap_err();
        assert!(matches!(err, PositionError::UnknownParent { .. }));
    }

    #[test]
    fn create_position_rejects_inverted_arguments() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (p1, _) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        let err = order.create_position(&p1, &MIN_POSITION, 1).unwrap_err();
        assert!(matches!(err, PositionError::Inversion));
    }

    #[test]
    fn lex_and_unlex_round_trip_through_a_fresh_order() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let (p1, _) = order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        let (p2, _) = order.create_position(&p1, &MAX_POSITION, 1).unwrap();
        let lex1 = order.lex(&p1).unwrap();
        let lex2 = order.lex(&p2).unwrap();
        assert!(lex1 < lex2);

        let mut fresh = BunchTree::new();
        let decoded2 = fresh.unlex(&lex2).unwrap();
        assert_eq!(decoded2.bunch_id, p2.bunch_id);
        assert_eq!(decoded2.inner_index, p2.inner_index);
    }

    #[test]
    fn save_json_and_load_json_round_trip() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        order.create_position(&MIN_POSITION, &MAX_POSITION, 1).unwrap();
        let json = order.save_json().unwrap();

        let mut reloaded = BunchTree::new();
        reloaded.load_json(&json).unwrap();
        assert_eq!(reloaded.get_node("b1").unwrap().parent_id, ROOT);
    }

    #[test]
    fn load_json_rejects_malformed_json() {
        let mut order = BunchTree::new();
        let err = order.load_json("not json").unwrap_err();
        assert!(matches!(err, PositionError::Serialization(_)));
    }

    #[test]
    fn lex_agrees_with_compare_across_concurrent_runs() {
        let mut order = BunchTree::with_id_generator(sequential_ids());
        let mut positions = vec![MIN_POSITION.clone()];
        for _ in 0..20 {
            let (pos, _) = order.create_position(positions.last().unwrap(), &MAX_POSITION, 1).unwrap();
            positions.push(pos);
        }
        let lexed: Vec<String> = positions[1..].iter().map(|p| order.lex(p).unwrap()).collect();
        for i in 0..lexed.len() {
            for j in 0..lexed.len() {
                let by_compare = order.compare(&positions[i + 1], &positions[j + 1]).unwrap();
                let by_lex = lexed[i].cmp(&lexed[j]);
                assert_eq!(by_compare, by_lex, "i={i} j={j}");
            }
        }
    }
}
