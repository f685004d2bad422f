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

//! Cross-replica properties: two independent `BunchTree`s that end up with
//! the same installed metadata must agree on every comparison (spec.md §8,
//! property 6), and concurrent runs from different replicas must not
//! interleave in the merged order (property 7).

use std::cmp::Ordering;

use list_positions::{BunchMeta, BunchTree, Position, MAX_POSITION, MIN_POSITION, ROOT};

fn sequential_ids(prefix: &'static str) -> Box<dyn FnMut() -> String> {
    let mut n = 0u32;
    Box::new(move || {
        n += 1;
        format!("{prefix}{n}")
    })
}

#[test]
fn s5_receive_installs_metas_delivered_out_of_order() {
    let mut order = BunchTree::new();
    order
        .receive(vec![
            BunchMeta { bunch_id: "c".into(), parent_id: "b".into(), offset: 1 },
            BunchMeta { bunch_id: "b".into(), parent_id: "a".into(), offset: 1 },
            BunchMeta { bunch_id: "a".into(), parent_id: ROOT.into(), offset: 1 },
        ])
        .unwrap();
    assert_eq!(order.get_node("a").unwrap().depth, 1);
    assert_eq!(order.get_node("b").unwrap().depth, 2);
    assert_eq!(order.get_node("c").unwrap().depth, 3);
}

#[test]
fn s6_receive_detects_a_two_node_cycle() {
    let mut order = BunchTree::new();
    let err = order
        .receive(vec![
            BunchMeta { bunch_id: "x".into(), parent_id: "y".into(), offset: 1 },
            BunchMeta { bunch_id: "y".into(), parent_id: "x".into(), offset: 1 },
        ])
        .unwrap_err();
    assert!(matches!(err, list_positions::PositionError::Cycle { .. }));
    // The batch must not have partially installed either node.
    assert!(order.get_node("x").is_none());
    assert!(order.get_node("y").is_none());
}

/// Replica A mints a handful of bunches via `create_position`; replica B
/// starts empty and receives A's broadcast `BunchMeta`s in an arbitrary
/// (here: reversed) order. Both must then compute identical `compare`
/// results for every pair among the positions A created.
#[test]
fn independent_replicas_converge_given_the_same_metas() {
    let mut replica_a = BunchTree::with_id_generator(sequential_ids("a"));
    let mut positions = vec![MIN_POSITION.clone()];
    let mut broadcast = Vec::new();
    for _ in 0..6 {
        let (pos, meta) = replica_a.create_position(positions.last().unwrap(), &MAX_POSITION, 1).unwrap();
        if let Some(meta) = meta {
            broadcast.push(meta);
        }
        positions.push(pos);
    }
    // Fork another run from MIN_POSITION directly, so replica B also needs
    // more than one root-level bunch before converging.
    let (branch_pos, branch_meta) = replica_a.create_position(&MIN_POSITION, &positions[1], 1).unwrap();
    if let Some(meta) = branch_meta {
        broadcast.push(meta);
    }
    positions.push(branch_pos);

    let mut replica_b = BunchTree::new();
    let mut reversed = broadcast.clone();
    reversed.reverse();
    replica_b.receive(reversed).unwrap();

    for a in &positions {
        for b in &positions {
            let via_a = replica_a.compare(a, b).unwrap();
            let via_b = replica_b.compare(a, b).unwrap();
            assert_eq!(via_a, via_b, "disagreement comparing {a:?} vs {b:?}");
        }
    }
}

/// Property 7: a single replica's forward run (all minted against the same
/// `next` anchor) forms a contiguous block in the merged order against a
/// concurrent replica's forward run from the same anchors.
#[test]
fn s3_forward_runs_from_two_replicas_do_not_interleave() {
    let mut a = BunchTree::with_id_generator(sequential_ids("a"));
    let mut b = BunchTree::with_id_generator(sequential_ids("b"));

    let mut a_positions = Vec::new();
    let mut prev = MIN_POSITION.clone();
    let mut a_metas = Vec::new();
    for _ in 0..4 {
        let (pos, meta) = a.create_position(&prev, &MAX_POSITION, 1).unwrap();
        if let Some(meta) = meta {
            a_metas.push(meta);
        }
        prev = pos.clone();
        a_positions.push(pos);
    }

    let mut b_positions = Vec::new();
    let mut prev = MIN_POSITION.clone();
    let mut b_metas = Vec::new();
    for _ in 0..4 {
        let (pos, meta) = b.create_position(&prev, &MAX_POSITION, 1).unwrap();
        if let Some(meta) = meta {
            b_metas.push(meta);
        }
        prev = pos.clone();
        b_positions.push(pos);
    }

    // Merge everything into one observer replica that has seen both sides.
    let mut observer = BunchTree::new();
    observer.receive(a_metas).unwrap();
    observer.receive(b_metas).unwrap();

    let mut tagged: Vec<(Position, char)> = a_positions
        .iter()
        .cloned()
        .map(|p| (p, 'A'))
        .chain(b_positions.iter().cloned().map(|p| (p, 'B')))
        .collect();
    tagged.sort_by(|(p1, _), (p2, _)| observer.compare(p1, p2).unwrap());

    let run: Vec<char> = tagged.iter().map(|(_, tag)| *tag).collect();
    let first = run[0];
    let first_run_len = run.iter().take_while(|&&t| t == first).count();
    assert_eq!(first_run_len, 4, "runs interleaved: {run:?}");
}

#[test]
fn property_1_compare_is_a_strict_total_order() {
    let mut order = BunchTree::with_id_generator(sequential_ids("n"));
    let mut positions = vec![MIN_POSITION.clone()];
    for _ in 0..8 {
        let prev = positions.last().unwrap().clone();
        let (pos, _) = order.create_position(&prev, &MAX_POSITION, 1).unwrap();
        positions.push(pos);
    }
    positions.push(MAX_POSITION.clone());

    for p in &positions {
        assert_eq!(order.compare(p, p).unwrap(), Ordering::Equal, "irreflexive violated");
    }
    for a in &positions {
        for b in &positions {
            let ab = order.compare(a, b).unwrap();
            let ba = order.compare(b, a).unwrap();
            assert_eq!(ab, ba.reverse(), "antisymmetry violated for {a:?}/{b:?}");
        }
    }
    for a in &positions {
        for b in &positions {
            for c in &positions {
                let ab = order.compare(a, b).unwrap();
                let bc = order.compare(b, c).unwrap();
                if ab == Ordering::Less && bc == Ordering::Less {
                    assert_eq!(order.compare(a, c).unwrap(), Ordering::Less, "transitivity violated");
                }
            }
        }
    }
}

/// Property 8: a monotonic forward run from one replica stays inside a
/// single bunch, so its lex-encoded length grows with the digit width of the
/// inner index (logarithmic in the run length) rather than with the run
/// length itself.
#[test]
fn property_8_forward_runs_grow_the_lex_encoding_logarithmically() {
    let mut order = BunchTree::with_id_generator(sequential_ids("n"));
    let mut prev = MIN_POSITION.clone();
    let mut lex_lengths = Vec::new();
    for _ in 0..2000 {
        let (pos, _) = order.create_position(&prev, &MAX_POSITION, 1).unwrap();
        lex_lengths.push(order.lex(&pos).unwrap().len());
        prev = pos;
    }
    let growth = lex_lengths.last().unwrap() - lex_lengths.first().unwrap();
    // 2000 sequential inner indices need only a few extra base-36 digits,
    // nowhere close to linear in the run length.
    assert!(growth <= 4, "lex length grew by {growth} over 2000 forward insertions");
}
