//! History types for recording concurrent operations
//!
//! Tracks the timing and results of concurrent register operations during a
//! linearizability test run. Each completed operation carries its invocation
//! and completion timestamps, which together form the invoke/terminal event
//! pair the checker reasons about.

use std::time::Instant;

/// Microsecond timestamp relative to test start
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Get the value in microseconds
    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

/// Logical process (worker) identifier, 0..N-1
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// Create a new process ID
    pub fn new(id: u64) -> Self {
        ProcessId(id)
    }
}

/// Operation type for the single-register cell
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Read the current value
    Read,
    /// Unconditionally set the value
    Write { value: String },
    /// Compare against `old` and conditionally set to `new`
    Cas { old: String, new: String },
}

impl OpKind {
    /// Short name used in logs and perf buckets
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::Write { .. } => "write",
            OpKind::Cas { .. } => "cas",
        }
    }
}

/// Terminal outcome of an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpResult {
    /// Read returned this value (None = register never written)
    ReadOk(Option<String>),
    /// Write acknowledged
    WriteOk,
    /// Cas answered definitively: true = applied, false = comparison failed
    CasOk(bool),
    /// Operation provably never took effect
    Fail(String),
    /// Outcome unknown: the operation may or may not have taken effect.
    /// The checker must consider both possibilities.
    Info(String),
}

impl OpResult {
    /// True for ReadOk/WriteOk/CasOk
    pub fn is_ok(&self) -> bool {
        !matches!(self, OpResult::Fail(_) | OpResult::Info(_))
    }
}

/// A completed operation with its timing interval
#[derive(Clone, Debug)]
pub struct Operation {
    /// Unique operation ID
    pub id: u64,
    /// Process that performed the operation
    pub process: ProcessId,
    /// What was requested
    pub kind: OpKind,
    /// When the operation was invoked
    pub invoke_ts: Timestamp,
    /// When the terminal event was recorded
    pub complete_ts: Timestamp,
    /// What came back
    pub result: OpResult,
}

impl Operation {
    pub fn new(
        id: u64,
        process: ProcessId,
        kind: OpKind,
        invoke_ts: Timestamp,
        complete_ts: Timestamp,
        result: OpResult,
    ) -> Self {
        Operation {
            id,
            process,
            kind,
            invoke_ts,
            complete_ts,
            result,
        }
    }

    /// Check if this operation overlaps with another in time
    pub fn overlaps(&self, other: &Operation) -> bool {
        // Two intervals [a, b] and [c, d] overlap if a <= d and c <= b
        self.invoke_ts.0 <= other.complete_ts.0 && other.invoke_ts.0 <= self.complete_ts.0
    }

    /// Latency of the operation in microseconds
    pub fn latency_micros(&self) -> u64 {
        self.complete_ts.0.saturating_sub(self.invoke_ts.0)
    }
}

/// The nodes on each side of a partition, plus when it was active
#[derive(Clone, Debug)]
pub struct FaultInterval {
    pub start: Timestamp,
    pub end: Timestamp,
    pub half_a: Vec<String>,
    pub half_b: Vec<String>,
}

/// Append-only record of a test run's operations
#[derive(Clone, Debug)]
pub struct History {
    ops: Vec<Operation>,
    /// Test start time for relative timestamps
    start_time: Instant,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    /// Create a new empty history; timestamps are relative to this moment
    pub fn new() -> Self {
        History {
            ops: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Get current time relative to test start as a Timestamp
    pub fn now(&self) -> Timestamp {
        let elapsed = self.start_time.elapsed();
        Timestamp(elapsed.as_micros() as u64)
    }

    /// Append a completed operation
    pub fn add(&mut self, op: Operation) {
        self.ops.push(op);
    }

    /// Get all operations
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Get number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if history is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sort the record deterministically by (invoke time, id).
    ///
    /// Workers append concurrently, so arrival order is nondeterministic;
    /// the checker and perf analyzer both consume the sorted form.
    pub fn finalize(&mut self) {
        self.ops.sort_by_key(|op| (op.invoke_ts, op.id));
    }

    /// Get operations that reached a definite ok outcome
    pub fn successful_ops(&self) -> Vec<&Operation> {
        self.ops.iter().filter(|op| op.result.is_ok()).collect()
    }

    /// Get operations with an ambiguous (info) outcome
    pub fn info_ops(&self) -> Vec<&Operation> {
        self.ops
            .iter()
            .filter(|op| matches!(op.result, OpResult::Info(_)))
            .collect()
    }

    /// Verify the per-process sequencing invariant: a process never has two
    /// operations in flight at once, so its intervals must not overlap.
    pub fn check_well_formed(&self) -> Result<(), String> {
        use std::collections::HashMap;

        let mut by_process: HashMap<ProcessId, Vec<&Operation>> = HashMap::new();
        for op in &self.ops {
            if op.complete_ts < op.invoke_ts {
                return Err(format!(
                    "op {} completes at {} before its invoke at {}",
                    op.id, op.complete_ts.0, op.invoke_ts.0
                ));
            }
            by_process.entry(op.process).or_default().push(op);
        }

        for (process, mut ops) in by_process {
            ops.sort_by_key(|op| op.invoke_ts);
            for pair in ops.windows(2) {
                if pair[1].invoke_ts.0 < pair[0].complete_ts.0 {
                    return Err(format!(
                        "process {} invoked op {} at {} while op {} was still in flight",
                        process.0, pair[1].id, pair[1].invoke_ts.0, pair[0].id
                    ));
                }
            }
        }
        Ok(())
    }
}
