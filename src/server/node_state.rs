//! In-process view of node health, kept alongside the persisted node rows
//! so API reads do not hit the database for liveness.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::db::enums::NodeStatus;

#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub status: NodeStatus,
    pub last_report_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub struct NodeHealthRegistry {
    nodes: DashMap<i32, NodeHealth>,
}

impl NodeHealthRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_connected(&self, node_id: i32, at: DateTime<Utc>) {
        self.nodes.insert(
            node_id,
            NodeHealth {
                status: NodeStatus::Connected,
                last_report_at: Some(at),
                message: None,
            },
        );
    }

    pub fn mark_error(&self, node_id: i32, message: String) {
        let last_report_at = self
            .nodes
            .get(&node_id)
            .and_then(|health| health.last_report_at);
        self.nodes.insert(
            node_id,
            NodeHealth {
                status: NodeStatus::Error,
                last_report_at,
                message: Some(message),
            },
        );
    }

    pub fn remove(&self, node_id: i32) {
        self.nodes.remove(&node_id);
    }

    pub fn get(&self, node_id: i32) -> Option<NodeHealth> {
        self.nodes.get(&node_id).map(|health| health.clone())
    }

    pub fn snapshot(&self) -> Vec<(i32, NodeHealth)> {
        self.nodes
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}
