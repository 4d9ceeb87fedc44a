//! Reference-aware upload ordering.
//!
//! A record that another pending record points at is uploaded first, so
//! the server never sees a reference to something it does not hold yet.
//! The order is a stable topological sort over the reference index:
//! among records that are ready, the one read first goes first, and a
//! reference cycle is broken at its earliest member.

use crate::upload::generator::PendingUpload;
use caresync_core::RecordStore;
use std::collections::{BTreeSet, HashMap};

/// Reorders pending uploads so referenced records precede their referrers.
pub fn order_by_references(store: &RecordStore, pending: Vec<PendingUpload>) -> Vec<PendingUpload> {
    let position: HashMap<String, usize> = pending
        .iter()
        .enumerate()
        .map(|(index, item)| (item.reference(), index))
        .collect();

    // depends_on[i] = pending items that item i references.
    let depends_on: Vec<BTreeSet<usize>> = pending
        .iter()
        .enumerate()
        .map(|(index, item)| {
            store
                .references_of(item.record_uuid)
                .into_iter()
                .filter_map(|(_, target)| position.get(&target).copied())
                .filter(|&target| target != index)
                .collect()
        })
        .collect();

    let order = stable_topological_order(&depends_on);
    let mut slots: Vec<Option<PendingUpload>> = pending.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

fn stable_topological_order(depends_on: &[BTreeSet<usize>]) -> Vec<usize> {
    let len = depends_on.len();
    let mut waiting_on: Vec<usize> = depends_on.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); len];
    for (item, deps) in depends_on.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(item);
        }
    }

    let mut ready: BTreeSet<usize> = (0..len).filter(|&i| waiting_on[i] == 0).collect();
    let mut emitted = vec![false; len];
    let mut earliest = 0;
    let mut order = Vec::with_capacity(len);

    while order.len() < len {
        let next = match ready.pop_first() {
            Some(i) => i,
            // No ready item means a cycle; take the earliest remaining one.
            None => {
                while emitted[earliest] {
                    earliest += 1;
                }
                earliest
            }
        };
        emitted[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            waiting_on[dependent] -= 1;
            if waiting_on[dependent] == 0 && !emitted[dependent] {
                ready.insert(dependent);
            }
        }
    }
    order
}
