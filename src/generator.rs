//! Workload and fault-schedule generation
//!
//! Produces the lazy, per-process operation stream (uniform read/write/cas
//! mix with randomized think time and a hard wall-clock limit) and the
//! timer-driven partition-start/heal sequence for the fault process.
//!
//! Write and cas arguments are drawn from the small set "0".."4" on purpose:
//! a narrow value domain forces contention and concurrent conflicting
//! operations, which is what the checker needs to see.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::history::OpKind;

/// Number of distinct register values ("0".."4")
const VALUE_DOMAIN: u64 = 5;

/// One planned operation plus the think time to wait before issuing it
#[derive(Clone, Debug)]
pub struct PlannedOp {
    pub think_time: Duration,
    pub kind: OpKind,
}

/// Lazy per-process operation stream.
///
/// Pulls past the deadline yield `None`; a generator is not restartable —
/// construct a fresh one for each run.
pub struct WorkloadGenerator {
    rng: StdRng,
    think_mean: Duration,
    deadline: Instant,
}

impl WorkloadGenerator {
    pub fn new(think_mean: Duration, deadline: Instant) -> Self {
        WorkloadGenerator {
            rng: StdRng::from_os_rng(),
            think_mean,
            deadline,
        }
    }

    /// Seeded variant for deterministic tests
    pub fn with_seed(seed: u64, think_mean: Duration, deadline: Instant) -> Self {
        WorkloadGenerator {
            rng: StdRng::seed_from_u64(seed),
            think_mean,
            deadline,
        }
    }

    /// Draw the next operation, or `None` once the time limit has expired
    pub fn next(&mut self) -> Option<PlannedOp> {
        if Instant::now() >= self.deadline {
            return None;
        }

        // Uniform over [0, 2*mean] so the mean comes out at the configured
        // stagger and workers don't fall into lockstep bursts
        let think_micros = if self.think_mean.is_zero() {
            0
        } else {
            self.rng
                .random_range(0..=2 * self.think_mean.as_micros() as u64)
        };

        let kind = match self.rng.random_range(0..3) {
            0 => OpKind::Read,
            1 => OpKind::Write {
                value: self.value(),
            },
            _ => OpKind::Cas {
                old: self.value(),
                new: self.value(),
            },
        };

        Some(PlannedOp {
            think_time: Duration::from_micros(think_micros),
            kind,
        })
    }

    fn value(&mut self) -> String {
        self.rng.random_range(0..VALUE_DOMAIN).to_string()
    }
}

/// Command emitted by the fault schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultCommand {
    PartitionStart,
    PartitionHeal,
}

/// Timer sequence for the fault process: sleep(interval), partition-start,
/// sleep(interval), partition-heal, repeating until the deadline.
pub struct FaultSchedule {
    interval: Duration,
    deadline: Instant,
    next_cmd: FaultCommand,
}

impl FaultSchedule {
    pub fn new(interval: Duration, deadline: Instant) -> Self {
        FaultSchedule {
            interval,
            deadline,
            next_cmd: FaultCommand::PartitionStart,
        }
    }

    /// Next (sleep, command) pair, or `None` once the time limit has expired
    pub fn next(&mut self) -> Option<(Duration, FaultCommand)> {
        if Instant::now() >= self.deadline {
            return None;
        }
        let cmd = self.next_cmd;
        self.next_cmd = match cmd {
            FaultCommand::PartitionStart => FaultCommand::PartitionHeal,
            FaultCommand::PartitionHeal => FaultCommand::PartitionStart,
        };
        Some((self.interval, cmd))
    }
}
