//! Cluster topology and network-level partition control
//!
//! The topology is an immutable value constructed at test start and passed
//! to every component that needs addresses. The Docker controller applies
//! partitions by installing `iptables` DROP rules inside the containers, so
//! nodes in different halves cannot reach each other while same-half
//! reachability is preserved.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::process::Command;
use tracing::warn;

use crate::nemesis::{FaultError, PartitionController};

/// A node's client-facing address, "host:port"
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeAddr(pub String);

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable node-address list for one test run
#[derive(Clone, Debug)]
pub struct ClusterTopology {
    nodes: Vec<NodeAddr>,
}

impl ClusterTopology {
    pub fn new(addresses: Vec<String>) -> Self {
        ClusterTopology {
            nodes: addresses.into_iter().map(NodeAddr).collect(),
        }
    }

    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node assigned to a worker: round-robin over the topology
    pub fn node_for_worker(&self, worker: usize) -> &NodeAddr {
        &self.nodes[worker % self.nodes.len()]
    }

    /// Randomly split the node set into two halves for a partition. The
    /// first half gets the extra node when the count is odd, so it always
    /// holds a majority.
    pub fn split_halves(&self, rng: &mut StdRng) -> (Vec<NodeAddr>, Vec<NodeAddr>) {
        let mut shuffled = self.nodes.clone();
        shuffled.shuffle(rng);
        let mid = shuffled.len().div_ceil(2);
        let half_b = shuffled.split_off(mid);
        (shuffled, half_b)
    }
}

/// Partition controller that drives `docker exec ... iptables` against a
/// containerized cluster
pub struct DockerPartitioner {
    /// Node address -> container name
    containers: HashMap<NodeAddr, String>,
    /// Container IPs captured when the active partition was applied. Heal
    /// deletes rules against these addresses, so a container that restarts
    /// with a new IP mid-partition cannot orphan its DROP rules.
    partition_ips: Mutex<HashMap<NodeAddr, String>>,
}

/// iptables' complaint when asked to delete a rule that is not installed;
/// the only heal miss that may be ignored
fn harmless_delete_miss(stderr: &str) -> bool {
    stderr.contains("does a matching rule exist")
        || stderr.contains("No chain/target/match by that name")
}

/// Every (node, peer ip) pair a symmetric partition between the halves
/// installs or removes rules for
fn rule_targets<'a>(
    half_a: &'a [NodeAddr],
    half_b: &'a [NodeAddr],
    ips: &HashMap<NodeAddr, String>,
) -> Result<Vec<(&'a NodeAddr, String)>, String> {
    let ip_of = |node: &NodeAddr| {
        ips.get(node)
            .cloned()
            .ok_or_else(|| format!("no address captured for node {}", node))
    };
    let mut targets = Vec::new();
    for a in half_a {
        for b in half_b {
            targets.push((a, ip_of(b)?));
            targets.push((b, ip_of(a)?));
        }
    }
    Ok(targets)
}

impl DockerPartitioner {
    pub fn new(containers: HashMap<NodeAddr, String>) -> Self {
        DockerPartitioner {
            containers,
            partition_ips: Mutex::new(HashMap::new()),
        }
    }

    fn container(&self, node: &NodeAddr) -> Result<&str, String> {
        self.containers
            .get(node)
            .map(|s| s.as_str())
            .ok_or_else(|| format!("no container mapped for node {}", node))
    }

    /// Get a container's IP address on its Docker network
    async fn container_ip(&self, node: &NodeAddr) -> Result<String, String> {
        let container = self.container(node)?;
        let output = Command::new("docker")
            .args([
                "inspect",
                "-f",
                "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
                container,
            ])
            .output()
            .await
            .map_err(|e| format!("docker inspect failed: {}", e))?;

        if !output.status.success() {
            return Err(format!(
                "docker inspect {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if ip.is_empty() {
            return Err(format!("container {} has no network address", container));
        }
        Ok(ip)
    }

    /// Add or remove INPUT+OUTPUT DROP rules on `node` for a peer IP
    async fn iptables_rule(
        &self,
        node: &NodeAddr,
        action: &str,
        peer_ip: &str,
    ) -> Result<(), String> {
        let container = self.container(node)?;

        for (chain, flag) in [("INPUT", "-s"), ("OUTPUT", "-d")] {
            let output = Command::new("docker")
                .args([
                    "exec", container, "iptables", action, chain, flag, peer_ip, "-j", "DROP",
                ])
                .output()
                .await
                .map_err(|e| format!("docker exec failed: {}", e))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // Deleting an already-absent rule is the one tolerated miss;
                // any other non-success would leave DROP rules in force
                if action == "-D" && harmless_delete_miss(&stderr) {
                    warn!(container, chain, %stderr, "iptables rule already absent");
                    continue;
                }
                return Err(format!(
                    "iptables {} {} on {} failed: {}",
                    action, chain, container, stderr
                ));
            }
        }
        Ok(())
    }

    async fn resolve_ips(
        &self,
        half_a: &[NodeAddr],
        half_b: &[NodeAddr],
    ) -> Result<HashMap<NodeAddr, String>, String> {
        let mut ips = HashMap::new();
        for node in half_a.iter().chain(half_b) {
            let ip = self.container_ip(node).await?;
            ips.insert(node.clone(), ip);
        }
        Ok(ips)
    }

    async fn set_rules(
        &self,
        half_a: &[NodeAddr],
        half_b: &[NodeAddr],
        ips: &HashMap<NodeAddr, String>,
        action: &str,
    ) -> Result<(), String> {
        for (node, peer_ip) in rule_targets(half_a, half_b, ips)? {
            self.iptables_rule(node, action, &peer_ip).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PartitionController for DockerPartitioner {
    async fn partition(&self, half_a: &[NodeAddr], half_b: &[NodeAddr]) -> Result<(), FaultError> {
        // Resolve every IP before touching any rule, and snapshot the
        // addresses: heal must target exactly what was installed
        let ips = self
            .resolve_ips(half_a, half_b)
            .await
            .map_err(FaultError::Apply)?;
        self.set_rules(half_a, half_b, &ips, "-A")
            .await
            .map_err(FaultError::Apply)?;
        *self.partition_ips.lock() = ips;
        Ok(())
    }

    async fn heal(&self, half_a: &[NodeAddr], half_b: &[NodeAddr]) -> Result<(), FaultError> {
        let snapshot = std::mem::take(&mut *self.partition_ips.lock());
        let ips = if snapshot.is_empty() {
            self.resolve_ips(half_a, half_b)
                .await
                .map_err(FaultError::Heal)?
        } else {
            snapshot
        };
        self.set_rules(half_a, half_b, &ips, "-D")
            .await
            .map_err(FaultError::Heal)
    }
}
