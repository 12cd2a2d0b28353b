//! Fault scheduler (nemesis)
//!
//! Runs alongside the workers, toggling network partitions on the fault
//! schedule. The state machine has two states, healthy and partitioned, and
//! every apply/heal action is awaited to completion before the state change
//! is recorded — no client operation can be attributed to a fault state the
//! controller has not finished establishing.
//!
//! A failed apply or heal is fatal to the run: the error propagates out and
//! the executor aborts before checking.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::info;

use crate::cluster::{ClusterTopology, NodeAddr};
use crate::generator::{FaultCommand, FaultSchedule};
use crate::history::{FaultInterval, History, Timestamp};

/// Partition apply/heal failure; fatal to the run
#[derive(Debug, Error)]
pub enum FaultError {
    #[error("failed to apply partition: {0}")]
    Apply(String),
    #[error("failed to heal partition: {0}")]
    Heal(String),
}

/// Capability to cut and restore the network between two halves of the
/// cluster. Same-half reachability must be preserved.
#[async_trait::async_trait]
pub trait PartitionController: Send + Sync {
    async fn partition(&self, half_a: &[NodeAddr], half_b: &[NodeAddr]) -> Result<(), FaultError>;
    async fn heal(&self, half_a: &[NodeAddr], half_b: &[NodeAddr]) -> Result<(), FaultError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NemesisState {
    Healthy,
    Partitioned,
}

/// An applied partition that has not yet been healed
struct ActivePartition {
    start: Timestamp,
    half_a: Vec<NodeAddr>,
    half_b: Vec<NodeAddr>,
}

/// The fault process: consumes the schedule, drives the controller, records
/// the intervals during which a partition was in force
pub struct Nemesis {
    topology: ClusterTopology,
    controller: Arc<dyn PartitionController>,
    /// Shared clock source; the nemesis only reads `now()` from it
    history: Arc<Mutex<History>>,
    state: NemesisState,
    active: Option<ActivePartition>,
    intervals: Vec<FaultInterval>,
    rng: StdRng,
}

impl Nemesis {
    pub fn new(
        topology: ClusterTopology,
        controller: Arc<dyn PartitionController>,
        history: Arc<Mutex<History>>,
    ) -> Self {
        Nemesis {
            topology,
            controller,
            history,
            state: NemesisState::Healthy,
            active: None,
            intervals: Vec::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    fn now(&self) -> Timestamp {
        self.history.lock().now()
    }

    /// Run the fault process to completion. Always leaves the cluster
    /// healed, even when the schedule ends mid-partition.
    pub async fn run(mut self, mut schedule: FaultSchedule) -> Result<Vec<FaultInterval>, FaultError> {
        while let Some((sleep, command)) = schedule.next() {
            tokio::time::sleep(sleep).await;
            match command {
                FaultCommand::PartitionStart => self.apply_partition().await?,
                FaultCommand::PartitionHeal => self.heal_partition().await?,
            }
        }

        if self.state == NemesisState::Partitioned {
            self.heal_partition().await?;
        }
        Ok(self.intervals)
    }

    async fn apply_partition(&mut self) -> Result<(), FaultError> {
        // At most one active partition in this design
        if self.state == NemesisState::Partitioned {
            return Ok(());
        }

        let (half_a, half_b) = self.topology.split_halves(&mut self.rng);
        info!(?half_a, ?half_b, "applying partition");

        // Await completion before recording the state change, so no
        // operation is attributed to a half-applied fault
        self.controller.partition(&half_a, &half_b).await?;

        self.active = Some(ActivePartition {
            start: self.now(),
            half_a,
            half_b,
        });
        self.state = NemesisState::Partitioned;
        Ok(())
    }

    async fn heal_partition(&mut self) -> Result<(), FaultError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        info!("healing partition");
        self.controller.heal(&active.half_a, &active.half_b).await?;

        self.intervals.push(FaultInterval {
            start: active.start,
            end: self.now(),
            half_a: active.half_a.into_iter().map(|n| n.0).collect(),
            half_b: active.half_b.into_iter().map(|n| n.0).collect(),
        });
        self.state = NemesisState::Healthy;
        Ok(())
    }
}
