//! Agent Directory and Connection Registry

use crate::connection::{Connection, ConnectionInfo, ConnectionState};
use crate::device::Agent;
use crate::{Result, SosError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Known agents, keyed by IP
pub struct AgentDirectory {
    agents: DashMap<IpAddr, Arc<Agent>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Register an agent. Fails if one already exists at that address.
    pub fn add(&self, agent: Agent) -> Result<Arc<Agent>> {
        match self.agents.entry(agent.ip) {
            Entry::Occupied(_) => Err(SosError::DuplicateAgent(agent.ip)),
            Entry::Vacant(vacant) => {
                info!("Adding agent {} (control {})", agent.ip, agent.control_address());
                let agent = Arc::new(agent);
                vacant.insert(agent.clone());
                Ok(agent)
            }
        }
    }

    pub fn get(&self, ip: IpAddr) -> Option<Arc<Agent>> {
        self.agents.get(&ip).map(|a| a.clone())
    }

    /// Forget an agent. Transfers already using it keep their handle.
    pub fn remove(&self, ip: IpAddr) -> Result<Arc<Agent>> {
        let (_, agent) = self.agents.remove(&ip).ok_or(SosError::AgentNotFound(ip))?;
        info!(
            "Removed agent {} ({} transfers still attached)",
            ip,
            agent.active_transfers()
        );
        Ok(agent)
    }

    pub fn all(&self) -> Vec<Arc<Agent>> {
        self.agents.iter().map(|a| a.clone()).collect()
    }

    /// Agent serving the fewest transfers
    pub fn least_loaded(&self) -> Option<Arc<Agent>> {
        self.agents
            .iter()
            .min_by_key(|a| (a.active_transfers(), a.ip))
            .map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Active connections, keyed by transfer id
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        debug!("Tracking connection {}", connection.transfer_id());
        self.connections.insert(connection.transfer_id(), connection);
    }

    pub fn get(&self, transfer_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&transfer_id).map(|c| c.clone())
    }

    /// Drop a connection and deregister it from its agents
    pub fn remove(&self, transfer_id: Uuid) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&transfer_id)?;
        connection.release_agents();
        info!("Retired connection {}", transfer_id);
        Some(connection)
    }

    /// Retire a connection only if it tracks no flows.
    ///
    /// Flow tracking on the connection is held off until the removal is done,
    /// so a flow added concurrently either blocks removal or lands after it.
    pub fn remove_if_drained(&self, transfer_id: Uuid) -> Option<Arc<Connection>> {
        let connection = self.get(transfer_id)?;
        let mut removed = None;
        connection.retire_if_drained(|| {
            removed = self.remove(transfer_id);
            removed.is_some()
        });
        removed
    }

    /// Connection opened by the client at `ip:port`
    pub fn find_by_client(&self, ip: IpAddr, port: u16) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|c| c.matches_client(ip, port))
            .map(|c| c.clone())
    }

    /// Connections using the given agent on either side
    pub fn using_agent(&self, ip: IpAddr) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|c| c.client_side_agent().ip == ip || c.server_side_agent().ip == ip)
            .map(|c| c.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|c| c.clone()).collect()
    }

    pub fn stopped(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Stopped)
            .map(|c| c.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
