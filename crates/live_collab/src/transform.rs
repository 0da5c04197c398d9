//! Operational transformation for concurrent text edits.
//!
//! A submission authored against an older version must be rebased across every
//! operation committed since, in commit order, before it can be applied to the
//! current document. The functions here are pure and deterministic.
//!
//! # Transformation rules
//!
//! `transform(op, applied)` rewrites `op` so it applies after `applied`:
//!
//! - **Insert vs. insert**: `op` shifts right by the inserted length when
//!   `applied` is at or before it. On a tie the earlier-committed insert keeps the
//!   lower position.
//! - **Insert vs. delete**: `op` shifts left when the deleted range lies before it.
//!   An insert inside the deleted range is retargeted to the range start.
//! - **Delete vs. insert**: the range shifts right past an insert at or before its
//!   start. A delete that strictly contains the insert splits into two deletes
//!   so the inserted text survives, mirroring the retargeting rule above.
//! - **Delete vs. delete**: the part already removed is subtracted. A delete fully
//!   covered by `applied` becomes a zero-length delete rather than an error.
//!
//! Because a delete can split, results are sequences of operations to be applied
//! in order. [`rebase`] handles sequences on both sides.

use crate::operation::{Operation, OperationKind};

/// Rebase `op` over an earlier-committed `applied`. `applied` wins insert ties.
pub fn transform(op: &Operation, applied: &Operation) -> Vec<Operation> {
    transform_with_priority(op, applied, true)
}

/// Rebase `op` over `applied`, choosing which side keeps the lower position when
/// both insert at the same offset.
pub fn transform_with_priority(
    op: &Operation,
    applied: &Operation,
    applied_wins_ties: bool,
) -> Vec<Operation> {
    let p = op.position;
    let a = applied.position;

    match (&op.kind, &applied.kind) {
        (OperationKind::Insert { .. }, OperationKind::Insert { .. }) => {
            let shift = a < p || (a == p && applied_wins_ties);
            let position = if shift { p.saturating_add(applied.inserted_len()) } else { p };
            vec![moved(op, position)]
        }
        (OperationKind::Insert { .. }, OperationKind::Delete { length }) => {
            let end = a.saturating_add(*length);
            let position = if p <= a {
                p
            } else if p >= end {
                p.saturating_sub(*length)
            } else {
                a
            };
            vec![moved(op, position)]
        }
        (OperationKind::Delete { length }, OperationKind::Insert { .. }) => {
            let n = applied.inserted_len();
            let end = p.saturating_add(*length);
            if a <= p {
                vec![Operation::delete(p.saturating_add(n), *length)]
            } else if a >= end {
                vec![op.clone()]
            } else {
                vec![
                    Operation::delete(p, a - p),
                    Operation::delete(p.saturating_add(n), end - a),
                ]
            }
        }
        (OperationKind::Delete { length }, OperationKind::Delete { length: removed }) => {
            let end = p.saturating_add(*length);
            let applied_end = a.saturating_add(*removed);
            let removed_before = if a < p { applied_end.min(p) - a } else { 0 };
            let overlap = end.min(applied_end).saturating_sub(p.max(a));
            vec![Operation::delete(p - removed_before, length - overlap)]
        }
    }
}

fn moved(op: &Operation, position: usize) -> Operation {
    Operation {
        kind: op.kind.clone(),
        position,
    }
}

/// Rebase the sequence `ops` over the sequence `against`.
///
/// Both sequences are defined on the same starting document and apply in order.
/// The result applies to the document produced by `against`.
pub fn rebase(ops: &[Operation], against: &[Operation], against_wins_ties: bool) -> Vec<Operation> {
    let mut current = ops.to_vec();
    for applied in against {
        current = rebase_over(current, applied, against_wins_ties);
    }
    current
}

/// Rebase `ops` over a single operation, carrying `applied` forward past each
/// piece so later pieces see it in their own coordinate space.
fn rebase_over(ops: Vec<Operation>, applied: &Operation, applied_wins_ties: bool) -> Vec<Operation> {
    let last = ops.len().saturating_sub(1);
    let mut out = Vec::with_capacity(ops.len());
    let mut applied_now = vec![applied.clone()];

    for (i, op) in ops.into_iter().enumerate() {
        let rebased = match applied_now.as_slice() {
            [single] => transform_with_priority(&op, single, applied_wins_ties),
            many => rebase(std::slice::from_ref(&op), many, applied_wins_ties),
        };
        if i < last {
            applied_now = rebase(&applied_now, std::slice::from_ref(&op), !applied_wins_ties);
        }
        out.extend(rebased);
    }

    out
}

/// Transform two concurrent operations against each other.
///
/// Returns `(earlier', later')` such that applying `earlier` then `later'`
/// yields the same document as applying `later` then `earlier'`. `earlier` is
/// the one committed first and wins insert ties.
pub fn transform_pair(earlier: &Operation, later: &Operation) -> (Vec<Operation>, Vec<Operation>) {
    let later_rebased = transform_with_priority(later, earlier, true);
    let earlier_rebased = transform_with_priority(earlier, later, false);
    (earlier_rebased, later_rebased)
}
