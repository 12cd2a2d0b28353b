//! Black-box linearizability test harness for a replicated single-register
//! key-value service.
//!
//! Drives concurrent read/write/cas workloads against a cluster through an
//! HTTP client adapter while a nemesis toggles network partitions, records
//! a real-time-ordered history, and checks it against a register model with
//! the Wing-Gong Linearizability (WGL) algorithm.

pub mod checker;
pub mod client;
pub mod cluster;
pub mod generator;
pub mod history;
pub mod model;
pub mod nemesis;
pub mod perf;
pub mod runner;

pub use checker::{LinearizabilityChecker, Verdict};
pub use client::{ClientAdapter, Connection, Outcome, RetryPolicy};
pub use cluster::{ClusterTopology, DockerPartitioner, NodeAddr};
pub use generator::{FaultCommand, FaultSchedule, PlannedOp, WorkloadGenerator};
pub use history::{
    FaultInterval, History, OpKind, OpResult, Operation, ProcessId, Timestamp,
};
pub use model::Register;
pub use nemesis::{FaultError, Nemesis, PartitionController};
pub use perf::{LatencyStats, PerfReport};
pub use runner::{check_fault_isolation, run_test, RunError, TestConfig, TestResult};
