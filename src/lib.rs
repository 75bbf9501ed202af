//! SOS Controller - Accelerated Transfer Sessions
//!
//! Session-tracking core for an SDN controller that speeds up bulk transfers
//! by steering client/server traffic through a pair of forwarding agents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SOS CONTROLLER                                │
//! │                                                                         │
//! │  ┌──────────┐   client→agent   ┌─────────┐   agent→agent   ┌─────────┐  │
//! │  │  CLIENT  │ ───────────────► │  AGENT  │ ══════════════► │  AGENT  │  │
//! │  └──────────┘                  └─────────┘                 └────▲────┘  │
//! │                                                                 │       │
//! │                                     server→agent   ┌──────────┐ │       │
//! │                                   ◄─────────────── │  SERVER  │─┘       │
//! │                                                    └──────────┘         │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │  Connection registry | Agent directory | Monitor                  │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod agent_api;
pub mod config;
pub mod connection;
pub mod device;
pub mod monitor;
pub mod registry;
pub mod route;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub use config::{AgentConfig, MonitorConfig, SosConfig, TuningConfig};
pub use connection::{AgentPort, Connection, ConnectionInfo, ConnectionSnapshot, ConnectionState};
pub use device::{Agent, AttachmentPoint, Client, Device, DeviceType, Server};
pub use registry::{AgentDirectory, ConnectionRegistry};
pub use route::{Hop, Route, RouteType};

/// Controller error types
#[derive(Debug, Error)]
pub enum SosError {
    /// A route handed to a connection slot carries the wrong classification
    #[error("route {slot} must be of type {expected}, got {actual}")]
    InvalidRoute {
        slot: &'static str,
        expected: RouteType,
        actual: RouteType,
    },

    /// Endpoint kinds do not match the requested classification
    #[error("{route_type} route cannot run from {src} to {dst}")]
    InvalidEndpoints {
        route_type: RouteType,
        src: DeviceType,
        dst: DeviceType,
    },

    /// No classification exists between these endpoint kinds
    #[error("no route classification from {src} to {dst}")]
    UnclassifiableRoute { src: DeviceType, dst: DeviceType },

    /// The server-side agent port was already learned with another value
    #[error("transfer {transfer_id}: server-side agent port already learned as {learned}, refusing {attempted}")]
    PortAlreadyLearned {
        transfer_id: Uuid,
        learned: u16,
        attempted: u16,
    },

    /// The transfer was already stopped
    #[error("transfer {0} already stopped")]
    ConnectionStopped(Uuid),

    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("agent not found: {0}")]
    AgentNotFound(IpAddr),

    #[error("agent already registered: {0}")]
    DuplicateAgent(IpAddr),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the controller
pub type Result<T> = std::result::Result<T, SosError>;

/// Main controller facade
pub struct SosController {
    /// Configuration
    pub config: Arc<RwLock<SosConfig>>,
    /// Known agents
    pub agents: Arc<AgentDirectory>,
    /// Active connections
    pub connections: Arc<ConnectionRegistry>,
}

impl SosController {
    /// Create a controller, registering every configured agent
    pub fn new(config: SosConfig) -> Result<Self> {
        config.validate()?;

        let agents = AgentDirectory::new();
        for agent in &config.agents {
            agents.add(Agent::from(agent))?;
        }
        info!("Loaded {} agents", agents.len());

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            agents: Arc::new(agents),
            connections: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Open a connection over three classified routes with the configured tuning
    pub fn open_connection(
        &self,
        client_to_agent: Route,
        inter_agent: Route,
        server_to_agent: Route,
    ) -> Result<Arc<Connection>> {
        let tuning = self.config.read().tuning;
        let connection = Arc::new(Connection::new(
            client_to_agent,
            inter_agent,
            server_to_agent,
            tuning,
        )?);
        self.connections.insert(connection.clone());
        Ok(connection)
    }

    /// Record completion of the agent handshake for a transfer
    pub fn handshake_complete(&self, transfer_id: Uuid, port: u16) -> Result<Arc<Connection>> {
        let connection = self.connection(transfer_id)?;
        connection.set_server_side_agent_port(port)?;
        Ok(connection)
    }

    /// Attribute installed flow rules to a transfer
    pub fn add_flows<I, S>(&self, transfer_id: Uuid, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connection(transfer_id)?.add_flows(names);
        Ok(())
    }

    /// Mark a transfer as terminated
    pub fn stop_connection(&self, transfer_id: Uuid) -> Result<DateTime<Utc>> {
        Ok(self.connection(transfer_id)?.set_stop_time())
    }

    /// Drop a transfer from the registry and release its agents
    pub fn retire_connection(&self, transfer_id: Uuid) -> Result<Arc<Connection>> {
        self.connections
            .remove(transfer_id)
            .ok_or(SosError::ConnectionNotFound(transfer_id))
    }

    /// Look up an active connection
    pub fn connection(&self, transfer_id: Uuid) -> Result<Arc<Connection>> {
        self.connections
            .get(transfer_id)
            .ok_or(SosError::ConnectionNotFound(transfer_id))
    }

    /// Run the monitor loop
    pub async fn run(&self) -> Result<()> {
        let monitor = self.config.read().monitor.clone();
        monitor::start_monitor(self.agents.clone(), self.connections.clone(), monitor).await
    }
}
