//! # config
//!
//! why: describe one server's view of the cluster and its timing knobs
//! relations: consumed by node.rs and server.rs, loaded from json by the host process
//! what: RaftConfig, PeerConfig, json loading, validation

use crate::error::{RaftError, Result};
use crate::types::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// a peer server and the channel its messages travel on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: ServerId,
    #[serde(default)]
    pub channel: String,
}

impl PeerConfig {
    pub fn new(id: ServerId, channel: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
        }
    }
}

/// configuration for a raft server; all durations are in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub server_id: ServerId,
    pub peers: Vec<PeerConfig>,
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
    /// inbound messages handled per loop iteration, per inbox kind
    pub max_messages_per_tick: usize,
    /// offers made before a send is given up on
    pub send_attempts: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            server_id: 0,
            peers: Vec::new(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_messages_per_tick: 10,
            send_attempts: 3,
        }
    }
}

impl RaftConfig {
    /// config for `server_id` in a cluster of `members`; the server itself may be listed
    pub fn for_cluster(server_id: ServerId, members: &[ServerId]) -> Self {
        let peers = members
            .iter()
            .filter(|id| **id != server_id)
            .map(|id| PeerConfig::new(*id, format!("raft-{id}")))
            .collect();
        Self {
            server_id,
            peers,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RaftError::config(format!("cannot parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RaftError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::config(format!(
                "election_timeout_min {} is greater than election_timeout_max {}",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.election_timeout_min == 0 {
            return Err(RaftError::config("election_timeout_min must be positive"));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::config(format!(
                "heartbeat_interval {} must be positive and below election_timeout_min {}",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.max_messages_per_tick == 0 {
            return Err(RaftError::config("max_messages_per_tick must be positive"));
        }
        if self.send_attempts == 0 {
            return Err(RaftError::config("send_attempts must be positive"));
        }

        let mut ids = HashSet::new();
        let mut channels = HashSet::new();
        for peer in &self.peers {
            if peer.id == self.server_id {
                return Err(RaftError::config(format!(
                    "server {} lists itself as a peer",
                    self.server_id
                )));
            }
            if !ids.insert(peer.id) {
                return Err(RaftError::config(format!("duplicate server id {}", peer.id)));
            }
            if !peer.channel.is_empty() && !channels.insert(peer.channel.as_str()) {
                return Err(RaftError::config(format!(
                    "duplicate channel {:?}",
                    peer.channel
                )));
            }
        }
        Ok(())
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.peers.iter().map(|p| p.id)
    }

    pub fn is_peer(&self, id: ServerId) -> bool {
        self.peers.iter().any(|p| p.id == id)
    }

    /// servers in the cluster, this one included
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// strict majority of the cluster
    pub fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    pub fn election_timeout_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min),
            Duration::from_millis(self.election_timeout_max),
        )
    }

    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}
