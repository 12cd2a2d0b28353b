//! Concurrent test executor
//!
//! Spawns N worker processes plus the fault process, drives each worker's
//! generator through the client adapter, and collects the shared history.
//! Once every task has reached a terminal state, the history is finalized
//! and handed to the checker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::checker::{LinearizabilityChecker, Verdict};
use crate::client::{ClientAdapter, Connection, Outcome, RetryPolicy};
use crate::cluster::ClusterTopology;
use crate::generator::{FaultSchedule, WorkloadGenerator};
use crate::history::{FaultInterval, History, OpKind, OpResult, Operation, ProcessId, Timestamp};
use crate::nemesis::{FaultError, Nemesis, PartitionController};

/// Configuration for a linearizability test run
#[derive(Clone, Debug)]
pub struct TestConfig {
    /// Node addresses (format: "host:port")
    pub topology: ClusterTopology,
    /// Name of the register cell under test
    pub key: String,
    /// Number of concurrent worker processes
    pub worker_count: usize,
    /// Wall-clock limit for the whole run
    pub duration: Duration,
    /// Mean think time between a worker's operations
    pub think_mean: Duration,
    /// Per-request timeout; no adapter call blocks longer than this
    pub request_timeout: Duration,
    /// Sleep between fault-schedule steps
    pub fault_interval: Duration,
    /// Adapter retry policy
    pub retry: RetryPolicy,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            topology: ClusterTopology::new(vec![
                "127.0.0.1:9101".to_string(),
                "127.0.0.1:9102".to_string(),
                "127.0.0.1:9103".to_string(),
            ]),
            key: "x".to_string(),
            worker_count: 5,
            duration: Duration::from_secs(30),
            think_mean: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
            fault_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fatal run failure; no verdict is produced
#[derive(Debug, Error)]
pub enum RunError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Fault(#[from] FaultError),
}

/// Everything a completed run yields, even when individual operations
/// failed or were ambiguous
#[derive(Debug)]
pub struct TestResult {
    /// Linearizability verdict
    pub verdict: Verdict,
    /// Full, finalized history
    pub history: History,
    /// Partitions that were in force during the run
    pub faults: Vec<FaultInterval>,
    /// Total number of operations attempted
    pub total_ops: usize,
    /// Operations with a definite ok outcome
    pub successful_ops: usize,
    /// Operations with an ambiguous outcome
    pub info_ops: usize,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

/// Run a linearizability test against a cluster.
///
/// Every worker binds its connection before any workload starts; a single
/// failure to open is fatal. In-flight calls are never aborted when the
/// time limit expires — generators simply stop yielding and the executor
/// joins every worker and the fault process before checking.
pub async fn run_test(
    config: TestConfig,
    controller: Arc<dyn PartitionController>,
) -> Result<TestResult, RunError> {
    if config.topology.is_empty() {
        return Err(RunError::Setup("no node addresses configured".to_string()));
    }
    if config.worker_count == 0 {
        return Err(RunError::Setup("worker count must be positive".to_string()));
    }

    let start = Instant::now();
    let deadline = start + config.duration;

    let history = Arc::new(Mutex::new(History::new()));
    let op_counter = Arc::new(AtomicU64::new(1));
    let adapter = Arc::new(ClientAdapter::new(
        &config.key,
        config.request_timeout,
        config.retry,
    ));

    // Bind every connection up front so a dead cluster aborts the run
    // instead of producing an all-fail history
    let mut connections: Vec<Connection> = Vec::with_capacity(config.worker_count);
    for worker in 0..config.worker_count {
        let node = config.topology.node_for_worker(worker);
        let conn = adapter
            .open(node)
            .map_err(|e| RunError::Setup(e.to_string()))?;
        connections.push(conn);
    }

    info!(
        workers = config.worker_count,
        nodes = config.topology.len(),
        duration_secs = config.duration.as_secs(),
        "starting test run"
    );

    let nemesis = Nemesis::new(config.topology.clone(), controller, history.clone());
    let fault_schedule = FaultSchedule::new(config.fault_interval, deadline);
    let nemesis_handle = tokio::spawn(nemesis.run(fault_schedule));

    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for (worker, conn) in connections.into_iter().enumerate() {
        let in_flight = Arc::new(Mutex::new(None));
        let worker = Worker {
            process: ProcessId::new(worker as u64),
            generator: WorkloadGenerator::new(config.think_mean, deadline),
            adapter: adapter.clone(),
            conn,
            history: history.clone(),
            op_counter: op_counter.clone(),
            in_flight: in_flight.clone(),
        };
        worker_handles.push((tokio::spawn(worker.run()), in_flight));
    }

    // All workers reach terminal state before the history is touched
    for (handle, in_flight) in worker_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task died");
            recover_in_flight(&history, &in_flight);
        }
    }

    let faults = nemesis_handle
        .await
        .map_err(|e| RunError::Setup(format!("fault process crashed: {}", e)))??;

    let duration = start.elapsed();

    let mut final_history = history.lock().clone();
    final_history.finalize();
    if let Err(e) = final_history.check_well_formed() {
        // Indicates an executor bug, not a SUT bug
        return Err(RunError::Setup(format!("malformed history: {}", e)));
    }

    let total_ops = final_history.len();
    let successful_ops = final_history.successful_ops().len();
    let info_ops = final_history.info_ops().len();

    info!(total_ops, successful_ops, info_ops, "checking history");
    let verdict = LinearizabilityChecker::check(&final_history);

    if let Err(violation) = check_fault_isolation(&final_history, &faults, &config.topology) {
        warn!(%violation, "fault isolation violated");
    }

    Ok(TestResult {
        verdict,
        history: final_history,
        faults,
        total_ops,
        successful_ops,
        info_ops,
        duration,
    })
}

/// Audit the finalized history against the recorded partitions: a confirmed
/// write or cas that landed on a minority node while its partition was in
/// force must have its value observed by some majority-side read after the
/// heal. An acknowledged effect the cluster quietly discards on heal shows
/// up here even when the history happens to admit a linearization.
///
/// Workers bind to nodes round-robin, so the process id recovers the node
/// each operation was addressed to.
pub fn check_fault_isolation(
    history: &History,
    faults: &[FaultInterval],
    topology: &ClusterTopology,
) -> Result<(), String> {
    for fault in faults {
        // Equal halves have no minority, nothing to audit
        if fault.half_b.len() >= fault.half_a.len() {
            continue;
        }
        for op in history.ops() {
            let Some(value) = confirmed_mutation_value(op) else {
                continue;
            };
            if op.invoke_ts < fault.start || op.invoke_ts > fault.end {
                continue;
            }
            let node = topology.node_for_worker(op.process.0 as usize);
            if !fault.half_b.contains(&node.0) {
                continue;
            }

            let observed = history.ops().iter().any(|later| {
                later.invoke_ts > fault.end
                    && matches!(&later.result, OpResult::ReadOk(Some(v)) if v.as_str() == value)
                    && fault
                        .half_a
                        .contains(&topology.node_for_worker(later.process.0 as usize).0)
            });
            if !observed {
                return Err(format!(
                    "op {} ({} of {:?}) confirmed on minority node {} during a partition \
                     but never observed by a majority read after heal",
                    op.id,
                    op.kind.name(),
                    value,
                    node
                ));
            }
        }
    }
    Ok(())
}

fn confirmed_mutation_value(op: &Operation) -> Option<&str> {
    match (&op.kind, &op.result) {
        (OpKind::Write { value }, OpResult::WriteOk) => Some(value),
        (OpKind::Cas { new, .. }, OpResult::CasOk(true)) => Some(new),
        _ => None,
    }
}

/// An operation handed to the adapter whose terminal event has not been
/// recorded yet
struct InFlight {
    id: u64,
    process: ProcessId,
    kind: OpKind,
    invoke_ts: Timestamp,
}

/// A worker that dies mid-call never records its terminal event, but the
/// operation may still have taken effect; recover it as `info` so the
/// checker considers both branches.
fn recover_in_flight(history: &Mutex<History>, in_flight: &Mutex<Option<InFlight>>) {
    let Some(pending) = in_flight.lock().take() else {
        return;
    };
    let mut history = history.lock();
    let complete_ts = history.now();
    history.add(Operation::new(
        pending.id,
        pending.process,
        pending.kind,
        pending.invoke_ts,
        complete_ts,
        OpResult::Info("worker died mid-call".to_string()),
    ));
}

/// One logical client process: strictly sequential, owns its connection
struct Worker {
    process: ProcessId,
    generator: WorkloadGenerator,
    adapter: Arc<ClientAdapter>,
    conn: Connection,
    history: Arc<Mutex<History>>,
    op_counter: Arc<AtomicU64>,
    /// Shared with the executor for recovery if this task dies
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(planned) = self.generator.next() {
            if !planned.think_time.is_zero() {
                tokio::time::sleep(planned.think_time).await;
            }

            let id = self.op_counter.fetch_add(1, Ordering::SeqCst);
            let invoke_ts = self.history.lock().now();
            *self.in_flight.lock() = Some(InFlight {
                id,
                process: self.process,
                kind: planned.kind.clone(),
                invoke_ts,
            });

            let outcome = self.adapter.invoke(&self.conn, &planned.kind).await;

            *self.in_flight.lock() = None;
            let complete_ts = self.history.lock().now();
            let result = match outcome {
                Outcome::Ok(result) => result,
                Outcome::Fail(reason) => OpResult::Fail(reason),
                Outcome::Ambiguous(reason) => OpResult::Info(reason),
            };

            self.history.lock().add(Operation::new(
                id,
                self.process,
                planned.kind,
                invoke_ts,
                complete_ts,
                result,
            ));
        }

        let Worker { adapter, conn, .. } = self;
        adapter.close(conn);
    }
}
