//! Connection registry — tracks live agent connections.
//!
//! Keyed by connection id. An agent may hold several connections at once
//! (multi-device). All operations are atomic per key; readers never observe a
//! half-updated record.

use agentrelay_types::AgentConnection;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Concurrent registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, AgentConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `connection_id`. Both timestamps are
    /// set to now.
    pub fn add_connection(
        &self,
        connection_id: &str,
        agent_id: &str,
        role: &str,
        metadata: HashMap<String, Value>,
    ) -> AgentConnection {
        let now = Utc::now();
        let connection = AgentConnection {
            connection_id: connection_id.to_string(),
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            metadata,
            connected_at: now,
            last_activity: now,
        };
        self.connections
            .insert(connection_id.to_string(), connection.clone());
        debug!(connection_id, agent_id, role, "Connection registered");
        connection
    }

    pub fn remove_connection(&self, connection_id: &str) -> Option<AgentConnection> {
        self.connections
            .remove(connection_id)
            .map(|(_, connection)| connection)
    }

    /// Bump `last_activity`. Unknown ids are ignored.
    pub fn update_activity(&self, connection_id: &str) {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn get_connection(&self, connection_id: &str) -> Option<AgentConnection> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    /// Every connection owned by `agent_id`, oldest first.
    pub fn get_agent_connections(&self, agent_id: &str) -> Vec<AgentConnection> {
        let mut found: Vec<AgentConnection> = self
            .connections
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .map(|e| e.value().clone())
            .collect();
        sort_by_age(&mut found);
        found
    }

    /// Snapshot of all connections, oldest first.
    pub fn get_all_connections(&self) -> Vec<AgentConnection> {
        let mut all: Vec<AgentConnection> =
            self.connections.iter().map(|e| e.value().clone()).collect();
        sort_by_age(&mut all);
        all
    }

    pub fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.connections.iter().any(|e| e.agent_id == agent_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

fn sort_by_age(connections: &mut [AgentConnection]) {
    connections.sort_by(|a, b| {
        a.connected_at
            .cmp(&b.connected_at)
            .then_with(|| a.connection_id.cmp(&b.connection_id))
    });
}
