//! Balancing: master evacuation and single-turn peak shaving.
//!
//! Both planners work against a mutable histogram so that every pick sees
//! the counts left behind by earlier picks. They emit ordered move lists;
//! the caller decides whether the moves require data movement (master and
//! first-replica turns) or are pure map rewrites (deeper turns).

use crate::map::Histogram;
use crate::types::{Move, NodeId, VbMap};
use std::collections::BTreeSet;

/// Stop shaving a turn once the fullest and emptiest node differ by no
/// more than this many vbuckets. Perfect balance is not required.
pub const DEFAULT_BALANCE_GAP: usize = 1;

/// Plan replacement masters for every vbucket whose master is empty or
/// sits on a node in `evacuate`.
///
/// Each pick takes the least-loaded node from the turn-0 histogram
/// (first-encountered on ties) and immediately updates the histogram so
/// later picks spread across the remaining capacity. There is no
/// forbidden set for master picks.
#[must_use]
pub fn master_moves(
    map: &VbMap,
    evacuate: &BTreeSet<NodeId>,
    hist: &mut Histogram,
) -> Vec<Move> {
    let no_forbidden = BTreeSet::new();
    let mut moves = Vec::new();
    for (vbucket, chain) in map.chains().iter().enumerate() {
        let master = chain.master();
        let must_move = master.map_or(true, |m| evacuate.contains(m));
        if !must_move {
            continue;
        }
        let Some(new) = hist.least_loaded(&no_forbidden) else {
            break;
        };
        if let Some(old) = master {
            hist.decrement(old);
        }
        hist.increment(&new);
        moves.push(Move::new(vbucket, master.cloned(), new));
    }
    moves
}

/// Plan reassignments that relieve imbalance on a single turn.
///
/// Repeatedly moves one vbucket from the fullest node to the emptiest
/// node whose chain prefix (slots before `turn`) does not already contain
/// the target, until the histogram spread drops to `gap` or no legal
/// donor vbucket remains. Tie-breaks follow histogram candidate order,
/// which keeps the plan reproducible.
#[must_use]
pub fn balance_nodes(map: &VbMap, hist: &mut Histogram, turn: usize, gap: usize) -> Vec<Move> {
    // (vbucket, current occupant, nodes earlier in the chain)
    let mut working: Vec<(usize, Option<NodeId>, BTreeSet<NodeId>)> = map
        .chains()
        .iter()
        .enumerate()
        .map(|(vbucket, chain)| {
            let current = chain.node_at(turn).cloned();
            let forbidden = chain
                .slots()
                .iter()
                .take(turn)
                .filter_map(|s| s.clone())
                .collect();
            (vbucket, current, forbidden)
        })
        .collect();

    let mut moves = Vec::new();
    while hist.spread() > gap {
        let Some((hi, _)) = hist.max_node() else {
            break;
        };
        let Some((lo, _)) = hist.min_node() else {
            break;
        };
        let candidate = working.iter_mut().find(|(_, current, forbidden)| {
            current.as_ref() == Some(&hi) && !forbidden.contains(&lo)
        });
        let Some((vbucket, current, _)) = candidate else {
            break;
        };
        *current = Some(lo.clone());
        moves.push(Move::new(*vbucket, Some(hi.clone()), lo.clone()));
        hist.decrement(&hi);
        hist.increment(&lo);
    }
    moves
}
