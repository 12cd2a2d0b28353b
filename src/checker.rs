//! Wing-Gong Linearizability (WGL) checker
//!
//! Implements the WGL algorithm for checking linearizability of concurrent
//! read/write/cas operations on a single register. Operations with an
//! ambiguous (info) outcome may or may not have taken effect — they are
//! treated as optional in the linearization search.

use crate::history::{History, OpKind, OpResult, Operation, Timestamp};
use crate::model::Register;

/// Outcome of a linearizability check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// A valid linearization exists; operation IDs in linearization order
    Linearizable { order: Vec<u64> },
    /// No valid linearization exists
    NotLinearizable {
        /// Earliest operation at the deepest point the search reached that
        /// no candidate continuation could accommodate
        op_id: u64,
        /// The observed value that every continuation rejected
        value: String,
        /// Human-readable description
        reason: String,
    },
}

impl Verdict {
    pub fn is_linearizable(&self) -> bool {
        matches!(self, Verdict::Linearizable { .. })
    }

    /// Linearization order, if one was found
    pub fn order(&self) -> Option<&[u64]> {
        match self {
            Verdict::Linearizable { order } => Some(order),
            Verdict::NotLinearizable { .. } => None,
        }
    }
}

/// Earliest blocked operation at the deepest search prefix
struct Diagnosis {
    best_depth: usize,
    blocked: Option<(u64, String)>,
}

impl Diagnosis {
    fn record(&mut self, depth: usize, remaining: &[usize], ops: &[&Operation]) {
        if self.blocked.is_some() && depth < self.best_depth {
            return;
        }
        let earliest = remaining
            .iter()
            .map(|&i| ops[i])
            .min_by_key(|op| (op.invoke_ts, op.id));
        if let Some(op) = earliest {
            self.best_depth = depth;
            self.blocked = Some((op.id, observed_value(op)));
        }
    }
}

/// Value an operation claims to have observed or installed
fn observed_value(op: &Operation) -> String {
    match (&op.kind, &op.result) {
        (_, OpResult::ReadOk(Some(v))) => v.clone(),
        (_, OpResult::ReadOk(None)) => "nil".to_string(),
        (OpKind::Write { value }, _) => value.clone(),
        (OpKind::Cas { old, new }, OpResult::CasOk(true)) => format!("{} -> {}", old, new),
        (OpKind::Cas { old, .. }, _) => format!("!= {}", old),
        (OpKind::Read, _) => "nil".to_string(),
    }
}

/// WGL linearizability checker
pub struct LinearizabilityChecker;

impl LinearizabilityChecker {
    /// Check whether a history is linearizable under register semantics.
    ///
    /// Operations are split three ways:
    /// - definite ok outcomes are *required*: every linearization must place them;
    /// - info (ambiguous) writes and cas are *optional*: the search tries both
    ///   placing them at any legal point and skipping them entirely;
    /// - failed operations and info reads are provably without effect and are
    ///   excluded.
    ///
    /// Deterministic: repeated calls on the same history yield the same verdict.
    pub fn check(history: &History) -> Verdict {
        let confirmed: Vec<&Operation> = history
            .ops()
            .iter()
            .filter(|op| op.result.is_ok())
            .collect();

        let indeterminate: Vec<&Operation> = history
            .ops()
            .iter()
            .filter(|op| {
                matches!(op.result, OpResult::Info(_))
                    && matches!(op.kind, OpKind::Write { .. } | OpKind::Cas { .. })
            })
            .collect();

        if confirmed.is_empty() && indeterminate.is_empty() {
            return Verdict::Linearizable { order: vec![] };
        }

        if let Some(verdict) = Self::fast_checks(&confirmed, &indeterminate) {
            return verdict;
        }

        // Indeterminate mutations could have committed at any point after
        // their invocation, so extend their interval to the end of the run.
        let max_ts = confirmed
            .iter()
            .chain(indeterminate.iter())
            .map(|op| op.complete_ts.0)
            .max()
            .unwrap_or(0);

        let extended: Vec<Operation> = indeterminate
            .iter()
            .map(|op| {
                Operation::new(
                    op.id,
                    op.process,
                    op.kind.clone(),
                    op.invoke_ts,
                    Timestamp(max_ts),
                    op.result.clone(),
                )
            })
            .collect();

        let confirmed_count = confirmed.len();
        let mut all_ops: Vec<&Operation> = confirmed;
        for op in &extended {
            all_ops.push(op);
        }

        let required: Vec<usize> = (0..confirmed_count).collect();
        let optional: Vec<usize> = (confirmed_count..all_ops.len()).collect();

        let mut linearization = Vec::new();
        let mut diagnosis = Diagnosis {
            best_depth: 0,
            blocked: None,
        };

        if Self::search(
            &all_ops,
            required,
            optional,
            Register::new(),
            0,
            &mut linearization,
            &mut diagnosis,
        ) {
            Verdict::Linearizable {
                order: linearization,
            }
        } else {
            let (op_id, value) = diagnosis.blocked.unwrap_or((all_ops[0].id, String::new()));
            let reason = format!(
                "no ordering of operations satisfies register semantics; \
                 op {} observing {:?} cannot be placed in any continuation",
                op_id, value
            );
            Verdict::NotLinearizable {
                op_id,
                value,
                reason,
            }
        }
    }

    /// Cheap screens that catch common violations before the search:
    /// reads of never-written values, and reads of the initial state after
    /// a confirmed mutation has completed.
    fn fast_checks(
        confirmed: &[&Operation],
        indeterminate: &[&Operation],
    ) -> Option<Verdict> {
        use std::collections::HashSet;

        // Every value a read could legally observe: the initial state plus
        // anything a write or cas (confirmed or possibly-committed) installed.
        let mut writable: HashSet<Option<String>> = HashSet::new();
        writable.insert(None);
        for op in confirmed.iter().chain(indeterminate.iter()) {
            match &op.kind {
                OpKind::Write { value } => {
                    writable.insert(Some(value.clone()));
                }
                OpKind::Cas { new, .. } => {
                    writable.insert(Some(new.clone()));
                }
                OpKind::Read => {}
            }
        }

        for op in confirmed {
            if let (OpKind::Read, OpResult::ReadOk(observed)) = (&op.kind, &op.result) {
                if !writable.contains(observed) {
                    return Some(Verdict::NotLinearizable {
                        op_id: op.id,
                        value: observed.clone().unwrap_or_else(|| "nil".to_string()),
                        reason: format!(
                            "read returned {:?}, which no write or cas ever installed",
                            observed
                        ),
                    });
                }
            }
        }

        // A read of the initial state invoked after a confirmed mutation
        // completed is stale. Indeterminate mutations are skipped here: they
        // may never have committed.
        for read_op in confirmed {
            if let (OpKind::Read, OpResult::ReadOk(None)) = (&read_op.kind, &read_op.result) {
                for mutation in confirmed {
                    let confirmed_effect = matches!(
                        (&mutation.kind, &mutation.result),
                        (OpKind::Write { .. }, OpResult::WriteOk)
                            | (OpKind::Cas { .. }, OpResult::CasOk(true))
                    );
                    if confirmed_effect && mutation.complete_ts.0 < read_op.invoke_ts.0 {
                        return Some(Verdict::NotLinearizable {
                            op_id: read_op.id,
                            value: "nil".to_string(),
                            reason: format!(
                                "stale read: op {} invoked at {} observed the initial state, \
                                 but op {} completed a mutation at {}",
                                read_op.id,
                                read_op.invoke_ts.0,
                                mutation.id,
                                mutation.complete_ts.0
                            ),
                        });
                    }
                }
            }
        }

        None
    }

    /// Recursive WGL search with optional operations.
    ///
    /// `frontier` is the earliest time at which the next operation may
    /// linearize; it only advances, which prunes orderings that would
    /// violate real-time precedence. `required` operations must all be
    /// placed; `optional` ones may be placed or skipped.
    #[allow(clippy::too_many_arguments)]
    fn search(
        ops: &[&Operation],
        required: Vec<usize>,
        optional: Vec<usize>,
        model: Register,
        frontier: u64,
        linearization: &mut Vec<u64>,
        diagnosis: &mut Diagnosis,
    ) -> bool {
        if required.is_empty() {
            return true;
        }

        // Some required operation must linearize no later than the earliest
        // remaining completion, so only ops invoked before that deadline are
        // candidates.
        let min_complete = required
            .iter()
            .map(|&i| ops[i].complete_ts.0)
            .min()
            .unwrap_or(u64::MAX);

        let mut candidates: Vec<(usize, bool)> = Vec::new(); // (index, is_optional)
        for &i in &required {
            if ops[i].invoke_ts.0 <= min_complete && ops[i].complete_ts.0 >= frontier {
                candidates.push((i, false));
            }
        }
        for &i in &optional {
            if ops[i].invoke_ts.0 <= min_complete && ops[i].complete_ts.0 >= frontier {
                candidates.push((i, true));
            }
        }

        if candidates.is_empty() {
            diagnosis.record(linearization.len(), &required, ops);
            return false;
        }

        // Try earlier invocations first, and mutations before reads
        candidates.sort_by(|&(a, _), &(b, _)| {
            let a_mutates = !matches!(ops[a].kind, OpKind::Read);
            let b_mutates = !matches!(ops[b].kind, OpKind::Read);
            ops[a]
                .invoke_ts
                .cmp(&ops[b].invoke_ts)
                .then_with(|| b_mutates.cmp(&a_mutates))
        });

        for (candidate_idx, is_optional) in candidates {
            let op = ops[candidate_idx];

            let applied = if is_optional {
                Some(Self::apply_possible(op, &model))
            } else {
                Self::try_apply(op, &model)
            };

            if let Some(new_model) = applied {
                let new_required: Vec<usize> = if is_optional {
                    required.clone()
                } else {
                    required
                        .iter()
                        .copied()
                        .filter(|&i| i != candidate_idx)
                        .collect()
                };
                let new_optional: Vec<usize> = if is_optional {
                    optional
                        .iter()
                        .copied()
                        .filter(|&i| i != candidate_idx)
                        .collect()
                } else {
                    optional.clone()
                };

                linearization.push(op.id);
                let new_frontier = frontier.max(op.invoke_ts.0);

                if Self::search(
                    ops,
                    new_required,
                    new_optional,
                    new_model,
                    new_frontier,
                    linearization,
                    diagnosis,
                ) {
                    return true;
                }

                linearization.pop();
            }
        }

        diagnosis.record(linearization.len(), &required, ops);
        false
    }

    /// Apply a confirmed operation to the model, returning the successor
    /// state when the claimed result is consistent with it.
    fn try_apply(op: &Operation, model: &Register) -> Option<Register> {
        match (&op.kind, &op.result) {
            (OpKind::Write { value }, OpResult::WriteOk) => {
                let mut next = model.clone();
                next.apply_write(value);
                Some(next)
            }
            (OpKind::Read, OpResult::ReadOk(observed)) => {
                model.check_read(observed).then(|| model.clone())
            }
            (OpKind::Cas { old, new }, OpResult::CasOk(applied)) => {
                let mut next = model.clone();
                next.check_cas(old, new, *applied).then_some(next)
            }
            // Fail/info outcomes never reach here
            _ => None,
        }
    }

    /// Apply an indeterminate mutation as if it executed here. A write takes
    /// effect unconditionally; a cas takes effect only if its comparison
    /// succeeds in this state. Either way the placement is legal, since
    /// skipping the op covers the never-executed branch.
    fn apply_possible(op: &Operation, model: &Register) -> Register {
        let mut next = model.clone();
        match &op.kind {
            OpKind::Write { value } => next.apply_write(value),
            OpKind::Cas { old, new } => {
                next.apply_cas_unconditional(old, new);
            }
            OpKind::Read => {}
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{History, OpKind, OpResult, Operation, ProcessId, Timestamp};

    fn write_op(id: u64, value: &str, invoke: u64, complete: u64) -> Operation {
        Operation::new(
            id,
            ProcessId(1),
            OpKind::Write {
                value: value.to_string(),
            },
            Timestamp(invoke),
            Timestamp(complete),
            OpResult::WriteOk,
        )
    }

    fn read_op(id: u64, value: Option<&str>, invoke: u64, complete: u64) -> Operation {
        Operation::new(
            id,
            ProcessId(1),
            OpKind::Read,
            Timestamp(invoke),
            Timestamp(complete),
            OpResult::ReadOk(value.map(|s| s.to_string())),
        )
    }

    fn cas_op(id: u64, old: &str, new: &str, applied: bool, invoke: u64, complete: u64) -> Operation {
        Operation::new(
            id,
            ProcessId(1),
            OpKind::Cas {
                old: old.to_string(),
                new: new.to_string(),
            },
            Timestamp(invoke),
            Timestamp(complete),
            OpResult::CasOk(applied),
        )
    }

    fn info_write_op(id: u64, value: &str, invoke: u64, complete: u64) -> Operation {
        Operation::new(
            id,
            ProcessId(1),
            OpKind::Write {
                value: value.to_string(),
            },
            Timestamp(invoke),
            Timestamp(complete),
            OpResult::Info("connection lost".to_string()),
        )
    }

    #[test]
    fn test_empty_history() {
        let history = History::new();
        let verdict = LinearizabilityChecker::check(&history);
        assert_eq!(verdict, Verdict::Linearizable { order: vec![] });
    }

    #[test]
    fn test_sequential_ops_linearizable() {
        // W(a)[0,100] --> R(a)[200,300]
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(read_op(2, Some("a"), 200, 300));

        let verdict = LinearizabilityChecker::check(&history);
        assert_eq!(verdict.order(), Some(&[1, 2][..]));
    }

    #[test]
    fn test_concurrent_ops_valid_linearization() {
        // W(a)[0,200] overlaps R(a)[100,300]; write must order first
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 200));
        history.add(read_op(2, Some("a"), 100, 300));

        let verdict = LinearizabilityChecker::check(&history);
        assert_eq!(verdict.order(), Some(&[1, 2][..]));
    }

    #[test]
    fn test_read_initial_state() {
        let mut history = History::new();
        history.add(read_op(1, None, 0, 100));
        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_stale_read_not_linearizable() {
        // W(a)[0,100] --> R(nil)[200,300]
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(read_op(2, None, 200, 300));

        match LinearizabilityChecker::check(&history) {
            Verdict::NotLinearizable { op_id, value, .. } => {
                assert_eq!(op_id, 2);
                assert_eq!(value, "nil");
            }
            v => panic!("expected not-linearizable, got {:?}", v),
        }
    }

    #[test]
    fn test_concurrent_writes_either_order() {
        // W(a)[0,200] and W(b)[100,300]; read sees "a" so W(b) must order first
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 200));
        history.add(write_op(2, "b", 100, 300));
        history.add(read_op(3, Some("a"), 400, 500));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_impossible_read_value_names_the_read() {
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(write_op(2, "b", 200, 300));
        history.add(read_op(3, Some("c"), 400, 500));

        match LinearizabilityChecker::check(&history) {
            Verdict::NotLinearizable { op_id, value, .. } => {
                assert_eq!(op_id, 3);
                assert_eq!(value, "c");
            }
            v => panic!("expected not-linearizable, got {:?}", v),
        }
    }

    #[test]
    fn test_read_during_write_sees_either_value() {
        // W(a)[0,300] overlaps R[100,200]; both old and new are acceptable
        let mut old = History::new();
        old.add(write_op(1, "a", 0, 300));
        old.add(read_op(2, None, 100, 200));
        assert!(LinearizabilityChecker::check(&old).is_linearizable());

        let mut new = History::new();
        new.add(write_op(1, "a", 0, 300));
        new.add(read_op(2, Some("a"), 100, 200));
        assert!(LinearizabilityChecker::check(&new).is_linearizable());
    }

    #[test]
    fn test_failed_reads_excluded() {
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(Operation::new(
            2,
            ProcessId(1),
            OpKind::Read,
            Timestamp(200),
            Timestamp(300),
            OpResult::Fail("connection refused".to_string()),
        ));
        history.add(read_op(3, Some("a"), 400, 500));

        let verdict = LinearizabilityChecker::check(&history);
        let order = verdict.order().expect("linearizable");
        assert_eq!(order, &[1, 3]);
    }

    // Cas semantics

    #[test]
    fn test_cas_chain() {
        // W(0), cas(0 -> 1) applied, R(1)
        let mut history = History::new();
        history.add(write_op(1, "0", 0, 100));
        history.add(cas_op(2, "0", "1", true, 200, 300));
        history.add(read_op(3, Some("1"), 400, 500));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_cas_false_leaves_value() {
        // W(2), cas(0 -> 1) not applied, R(2)
        let mut history = History::new();
        history.add(write_op(1, "2", 0, 100));
        history.add(cas_op(2, "0", "1", false, 200, 300));
        history.add(read_op(3, Some("2"), 400, 500));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_cas_claiming_false_after_matching_write_is_invalid() {
        // Sequential W(0) then cas(0 -> 1) reporting ok(false): the
        // comparison must have succeeded, so the history is invalid.
        let mut history = History::new();
        history.add(write_op(1, "0", 0, 100));
        history.add(cas_op(2, "0", "1", false, 200, 300));

        assert!(!LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_concurrent_cas_at_most_one_applies() {
        // Both cas(0 -> 1) and cas(0 -> 2) claim ok(true) with no
        // intervening write of "0": impossible.
        let mut history = History::new();
        history.add(write_op(1, "0", 0, 100));
        history.add(cas_op(2, "0", "1", true, 200, 400));
        history.add(cas_op(3, "0", "2", true, 250, 450));

        assert!(!LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_concurrent_cas_one_wins_one_loses() {
        let mut history = History::new();
        history.add(write_op(1, "0", 0, 100));
        history.add(cas_op(2, "0", "1", true, 200, 400));
        history.add(cas_op(3, "0", "2", false, 250, 450));
        history.add(read_op(4, Some("1"), 500, 600));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    // Indeterminate (info) outcomes

    #[test]
    fn test_info_write_may_have_happened() {
        let mut history = History::new();
        history.add(info_write_op(1, "a", 0, 100));
        history.add(read_op(2, Some("a"), 200, 300));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_info_write_may_not_have_happened() {
        let mut history = History::new();
        history.add(info_write_op(1, "a", 0, 100));
        history.add(read_op(2, None, 200, 300));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_info_write_can_commit_late() {
        // Confirmed W(a), info W(b), then R(b): the ambiguous write may have
        // committed after the confirmed one.
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(info_write_op(2, "b", 200, 300));
        history.add(read_op(3, Some("b"), 400, 500));

        assert!(LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_info_cas_both_branches() {
        let mut history = History::new();
        history.add(write_op(1, "0", 0, 100));
        history.add(Operation::new(
            2,
            ProcessId(2),
            OpKind::Cas {
                old: "0".to_string(),
                new: "1".to_string(),
            },
            Timestamp(200),
            Timestamp(300),
            OpResult::Info("timeout".to_string()),
        ));
        // Either continuation must be accepted
        let mut took_effect = history.clone();
        took_effect.add(read_op(3, Some("1"), 400, 500));
        assert!(LinearizabilityChecker::check(&took_effect).is_linearizable());

        let mut no_effect = history.clone();
        no_effect.add(read_op(3, Some("0"), 400, 500));
        assert!(LinearizabilityChecker::check(&no_effect).is_linearizable());
    }

    #[test]
    fn test_info_write_does_not_excuse_impossible_read() {
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 100));
        history.add(info_write_op(2, "b", 200, 300));
        history.add(read_op(3, Some("c"), 400, 500));

        assert!(!LinearizabilityChecker::check(&history).is_linearizable());
    }

    #[test]
    fn test_checker_is_idempotent() {
        let mut history = History::new();
        history.add(write_op(1, "a", 0, 200));
        history.add(write_op(2, "b", 100, 300));
        history.add(info_write_op(3, "c", 150, 250));
        history.add(read_op(4, Some("b"), 400, 500));

        let first = LinearizabilityChecker::check(&history);
        for _ in 0..5 {
            assert_eq!(LinearizabilityChecker::check(&history), first);
        }
    }
}
