//! Network Devices
//!
//! Clients and servers are plain values. Agents are shared between many
//! concurrent transfers, so they are handed around as `Arc<Agent>` and track
//! the transfers they serve behind a lock.

use crate::agent_api::{self, AgentEndpoint};
use crate::config::AgentConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Client,
    Server,
    Agent,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Client => write!(f, "client"),
            DeviceType::Server => write!(f, "server"),
            DeviceType::Agent => write!(f, "agent"),
        }
    }
}

/// Switch port a device hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentPoint {
    /// Datapath id
    pub switch: u64,
    pub port: u32,
}

/// Transfer initiator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Client {
    pub ip: IpAddr,
    /// Source port of the observed TCP connection
    pub tcp_port: u16,
    pub attachment: Option<AttachmentPoint>,
}

impl Client {
    pub fn new(ip: IpAddr, tcp_port: u16) -> Self {
        Self {
            ip,
            tcp_port,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentPoint) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Transfer destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Server {
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub attachment: Option<AttachmentPoint>,
}

impl Server {
    pub fn new(ip: IpAddr, tcp_port: u16) -> Self {
        Self {
            ip,
            tcp_port,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentPoint) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Forwarding agent
///
/// Equality and hashing cover the agent's identity (address, ports,
/// attachment) and never the set of transfers it is currently serving.
#[derive(Debug)]
pub struct Agent {
    pub ip: IpAddr,
    pub control_port: u16,
    pub data_port: u16,
    pub feedback_port: u16,
    pub attachment: Option<AttachmentPoint>,
    transfers: RwLock<HashSet<Uuid>>,
}

impl Agent {
    pub fn new(ip: IpAddr, control_port: u16, data_port: u16, feedback_port: u16) -> Self {
        Self {
            ip,
            control_port,
            data_port,
            feedback_port,
            attachment: None,
            transfers: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentPoint) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Track a transfer on this agent. Returns false if it was already tracked.
    pub fn register_transfer(&self, transfer_id: Uuid) -> bool {
        let added = self.transfers.write().insert(transfer_id);
        if added {
            debug!("Agent {} now serving transfer {}", self.ip, transfer_id);
        }
        added
    }

    /// Stop tracking a transfer. Returns false if it was not tracked.
    pub fn deregister_transfer(&self, transfer_id: Uuid) -> bool {
        let removed = self.transfers.write().remove(&transfer_id);
        if removed {
            debug!("Agent {} released transfer {}", self.ip, transfer_id);
        }
        removed
    }

    pub fn is_handling(&self, transfer_id: Uuid) -> bool {
        self.transfers.read().contains(&transfer_id)
    }

    /// Number of transfers currently routed through this agent
    pub fn active_transfers(&self) -> usize {
        self.transfers.read().len()
    }

    pub fn transfers(&self) -> Vec<Uuid> {
        self.transfers.read().iter().copied().collect()
    }

    /// `<ip>:<port>` of the control plane
    pub fn control_address(&self) -> String {
        agent_api::address(self.ip, self.control_port)
    }

    pub fn health_url(&self) -> String {
        AgentEndpoint::Health.url(self.ip, self.control_port)
    }

    pub fn request_url(&self) -> String {
        AgentEndpoint::Request.url(self.ip, self.control_port)
    }
}

impl From<&AgentConfig> for Agent {
    fn from(config: &AgentConfig) -> Self {
        let agent = Agent::new(
            config.ip,
            config.control_port,
            config.data_port,
            config.feedback_port,
        );
        match config.attachment {
            Some(attachment) => agent.with_attachment(attachment),
            None => agent,
        }
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.control_port == other.control_port
            && self.data_port == other.data_port
            && self.feedback_port == other.feedback_port
            && self.attachment == other.attachment
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.control_port.hash(state);
        self.data_port.hash(state);
        self.feedback_port.hash(state);
        self.attachment.hash(state);
    }
}

/// Route endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Device {
    Client(Client),
    Server(Server),
    Agent(Arc<Agent>),
}

impl Device {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Device::Client(_) => DeviceType::Client,
            Device::Server(_) => DeviceType::Server,
            Device::Agent(_) => DeviceType::Agent,
        }
    }

    pub fn ip(&self) -> IpAddr {
        match self {
            Device::Client(client) => client.ip,
            Device::Server(server) => server.ip,
            Device::Agent(agent) => agent.ip,
        }
    }

    pub fn attachment(&self) -> Option<AttachmentPoint> {
        match self {
            Device::Client(client) => client.attachment,
            Device::Server(server) => server.attachment,
            Device::Agent(agent) => agent.attachment,
        }
    }

    pub fn as_client(&self) -> Option<&Client> {
        match self {
            Device::Client(client) => Some(client),
            _ => None,
        }
    }

    pub fn as_server(&self) -> Option<&Server> {
        match self {
            Device::Server(server) => Some(server),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<&Arc<Agent>> {
        match self {
            Device::Agent(agent) => Some(agent),
            _ => None,
        }
    }
}

impl From<Client> for Device {
    fn from(client: Client) -> Self {
        Device::Client(client)
    }
}

impl From<Server> for Device {
    fn from(server: Server) -> Self {
        Device::Server(server)
    }
}

impl From<Arc<Agent>> for Device {
    fn from(agent: Arc<Agent>) -> Self {
        Device::Agent(agent)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.device_type(), self.ip())
    }
}
