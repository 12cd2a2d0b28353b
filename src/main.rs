//! Harness entry point.
//!
//! Configuration comes from the environment (the deployment tooling that
//! provisions the cluster owns argument parsing):
//!
//! - `KV_CHAOS_NODES`       comma-separated "host:port" list
//! - `KV_CHAOS_CONTAINERS`  comma-separated container names, same order
//! - `KV_CHAOS_WORKERS`     worker count (default 5)
//! - `KV_CHAOS_DURATION`    run length in seconds (default 30)
//! - `KV_CHAOS_KEY`         register cell name (default "x")
//!
//! Exits 0 iff the history is linearizable, 1 on a violation, 2 on a fatal
//! setup or fault error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kv_chaos::{
    run_test, ClusterTopology, DockerPartitioner, NodeAddr, PerfReport, TestConfig, Verdict,
};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn config_from_env() -> (TestConfig, DockerPartitioner) {
    let nodes: Vec<String> = std::env::var("KV_CHAOS_NODES")
        .unwrap_or_else(|_| "127.0.0.1:9101,127.0.0.1:9102,127.0.0.1:9103".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let containers: Vec<String> = std::env::var("KV_CHAOS_CONTAINERS")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| (1..=nodes.len()).map(|i| format!("kv-node-{}", i)).collect());

    let mapping: HashMap<NodeAddr, String> = nodes
        .iter()
        .cloned()
        .map(NodeAddr)
        .zip(containers)
        .collect();

    let config = TestConfig {
        topology: ClusterTopology::new(nodes),
        key: std::env::var("KV_CHAOS_KEY").unwrap_or_else(|_| "x".to_string()),
        worker_count: env_or("KV_CHAOS_WORKERS", 5),
        duration: Duration::from_secs(env_or("KV_CHAOS_DURATION", 30)),
        ..TestConfig::default()
    };

    (config, DockerPartitioner::new(mapping))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (config, partitioner) = config_from_env();

    let result = match run_test(config, Arc::new(partitioner)).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "run aborted before a verdict");
            std::process::exit(2);
        }
    };

    info!(
        total_ops = result.total_ops,
        successful_ops = result.successful_ops,
        info_ops = result.info_ops,
        faults = result.faults.len(),
        duration_secs = result.duration.as_secs_f64(),
        "run complete"
    );

    let perf = PerfReport::from_history(&result.history);
    for (name, stats) in [("read", &perf.read), ("write", &perf.write), ("cas", &perf.cas)] {
        if let Some(stats) = stats {
            info!(
                kind = name,
                count = stats.count,
                mean_us = stats.mean.as_micros() as u64,
                p95_us = stats.p95.as_micros() as u64,
                max_us = stats.max.as_micros() as u64,
                "latency"
            );
        }
    }

    match result.verdict {
        Verdict::Linearizable { order } => {
            info!(ops = order.len(), "history is linearizable");
        }
        Verdict::NotLinearizable {
            op_id,
            value,
            reason,
        } => {
            error!(op_id, value = %value, reason = %reason, "history is NOT linearizable");
            std::process::exit(1);
        }
    }
}
