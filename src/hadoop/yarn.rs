//! Client for the YARN ResourceManager REST API.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Aggregate cluster numbers from `/ws/v1/cluster/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterMetrics {
    pub apps_submitted: u64,
    pub apps_completed: u64,
    pub apps_pending: u64,
    pub apps_running: u64,
    pub apps_failed: u64,
    pub apps_killed: u64,
    #[serde(rename = "allocatedMB")]
    pub allocated_mb: u64,
    #[serde(rename = "totalMB")]
    pub total_mb: u64,
    pub allocated_virtual_cores: u64,
    pub total_virtual_cores: u64,
    pub active_nodes: u64,
    pub lost_nodes: u64,
    pub unhealthy_nodes: u64,
    pub decommissioned_nodes: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsEnvelope {
    cluster_metrics: ClusterMetrics,
}

/// One scheduler queue, flattened into tree order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueInfo {
    /// Short queue name, e.g. `dev`
    pub name: String,
    /// Full path, e.g. `root.dev`
    pub path: String,
    /// 0 for `root`
    pub depth: usize,
    /// Configured capacity, percent of parent
    pub capacity: f64,
    pub used_capacity: f64,
    pub max_capacity: f64,
    pub state: Option<String>,
    pub num_applications: u64,
}

/// YARN ResourceManager REST client.
#[derive(Debug, Clone)]
pub struct YarnClient {
    client: Client,
    base_url: String,
}

impl YarnClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("hades/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(Error::topology(format!(
                "{} not found; is {} a ResourceManager?",
                path, self.base_url
            ))),
            status => Err(Error::topology(format!(
                "ResourceManager returned {} for {}",
                status, path
            ))),
        }
    }

    pub async fn cluster_metrics(&self) -> Result<ClusterMetrics> {
        let body = self.get_json("/ws/v1/cluster/metrics").await?;
        let envelope: MetricsEnvelope = serde_json::from_value(body)?;
        Ok(envelope.cluster_metrics)
    }

    /// The scheduler's queue tree, parents before children.
    pub async fn queues(&self) -> Result<Vec<QueueInfo>> {
        let body = self.get_json("/ws/v1/cluster/scheduler").await?;
        parse_scheduler(&body)
    }
}

/// Flatten a `/ws/v1/cluster/scheduler` response. Handles both the capacity
/// and the fair scheduler layouts.
pub fn parse_scheduler(body: &Value) -> Result<Vec<QueueInfo>> {
    let info = body
        .pointer("/scheduler/schedulerInfo")
        .ok_or_else(|| Error::topology("scheduler response has no schedulerInfo"))?;

    let mut queues = Vec::new();
    if let Some(root) = info.get("rootQueue") {
        walk_fair(root, 0, &mut queues);
    } else if info.get("queueName").is_some() {
        walk_capacity(info, "", 0, &mut queues);
    } else {
        let kind = info.get("type").and_then(Value::as_str).unwrap_or("unknown");
        return Err(Error::topology(format!(
            "scheduler type '{}' does not expose queues",
            kind
        )));
    }
    Ok(queues)
}

fn number(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn children<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    // A single child is sometimes serialized as an object, not an array.
    let list = value.get(key).and_then(|q| q.get("queue"));
    let items: Vec<&Value> = match list {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };
    items.into_iter()
}

fn walk_capacity(queue: &Value, parent: &str, depth: usize, out: &mut Vec<QueueInfo>) {
    let name = queue
        .get("queueName")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    let path = queue
        .get("queuePath")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if parent.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", parent, name)
            }
        });

    out.push(QueueInfo {
        name,
        path: path.clone(),
        depth,
        capacity: number(queue, "capacity"),
        used_capacity: number(queue, "usedCapacity"),
        max_capacity: number(queue, "maxCapacity"),
        state: queue.get("state").and_then(Value::as_str).map(str::to_string),
        num_applications: queue
            .get("numApplications")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });

    for child in children(queue, "queues") {
        walk_capacity(child, &path, depth + 1, out);
    }
}

fn walk_fair(queue: &Value, depth: usize, out: &mut Vec<QueueInfo>) {
    let path = queue
        .get("queueName")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    let name = path.rsplit('.').next().unwrap_or(&path).to_string();

    let memory = |key: &str| {
        queue
            .pointer(&format!("/{}/memory", key))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };
    let cluster_memory = memory("clusterResources").max(1.0);

    out.push(QueueInfo {
        name,
        path,
        depth,
        capacity: memory("fairResources") * 100.0 / cluster_memory,
        used_capacity: memory("usedResources") * 100.0 / cluster_memory,
        max_capacity: memory("maxResources").min(cluster_memory) * 100.0 / cluster_memory,
        state: None,
        num_applications: queue
            .get("numActiveApps")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });

    for child in children(queue, "childQueues") {
        walk_fair(child, depth + 1, out);
    }
}
