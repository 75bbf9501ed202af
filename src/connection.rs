//! Accelerated Transfer Connection
//!
//! A [`Connection`] ties together the three route segments of one accelerated
//! transfer, its transfer id, tuning parameters, the flow rules installed on
//! its behalf and its lifecycle timestamps.
//!
//! Connections are shared between event handlers as `Arc<Connection>`; every
//! mutation goes through `&self` and is serialized by an internal lock.
//!
//! Equality and hashing follow the transfer id only, so a connection stays a
//! valid map key while its flows change. [`Connection::same_state`] compares
//! every field, flow names included.

use crate::config::TuningConfig;
use crate::device::{Agent, Client, Device, Server};
use crate::route::{Route, RouteType};
use crate::{Result, SosError};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server-side agent transport port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPort {
    /// Not known until the agents finish their handshake
    #[default]
    Unlearned,
    Learned(u16),
}

impl AgentPort {
    pub fn port(&self) -> Option<u16> {
        match self {
            AgentPort::Unlearned => None,
            AgentPort::Learned(port) => Some(*port),
        }
    }

    pub fn is_learned(&self) -> bool {
        matches!(self, AgentPort::Learned(_))
    }
}

impl fmt::Display for AgentPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentPort::Unlearned => write!(f, "unlearned"),
            AgentPort::Learned(port) => write!(f, "{}", port),
        }
    }
}

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Observed at the client side, agents still negotiating
    Initiated,
    /// Agent handshake done
    Established,
    Stopped,
}

/// Read side of a connection
pub trait ConnectionInfo {
    /// When the connection was observed at the client side
    fn init_time(&self) -> DateTime<Utc>;
    /// When the agent handshake completed
    fn start_time(&self) -> Option<DateTime<Utc>>;
    /// When the connection was terminated
    fn stop_time(&self) -> Option<DateTime<Utc>>;
    /// First hop nearest the client, last hop nearest the client-side agent
    fn client_side_route(&self) -> &Route;
    /// Client-side agent to server-side agent
    fn inter_agent_route(&self) -> &Route;
    /// First hop nearest the server, last hop nearest the server-side agent
    fn server_side_route(&self) -> &Route;
    fn server_side_agent_port(&self) -> AgentPort;
    fn client_side_agent(&self) -> &Arc<Agent>;
    fn server_side_agent(&self) -> &Arc<Agent>;
    fn client(&self) -> &Client;
    fn server(&self) -> &Server;
    fn transfer_id(&self) -> Uuid;
    fn num_parallel_sockets(&self) -> u32;
    fn queue_capacity(&self) -> u32;
    fn buffer_size(&self) -> u32;
    fn flow_timeout(&self) -> u32;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Lifecycle {
    server_agent_port: AgentPort,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
}

impl Lifecycle {
    fn state(&self) -> ConnectionState {
        if self.stop_time.is_some() {
            ConnectionState::Stopped
        } else if self.start_time.is_some() {
            ConnectionState::Established
        } else {
            ConnectionState::Initiated
        }
    }
}

/// One in-flight accelerated transfer
#[derive(Debug)]
pub struct Connection {
    client_to_agent: Route,
    agent_to_agent: Route,
    server_to_agent: Route,
    transfer_id: Uuid,
    tuning: TuningConfig,
    init_time: DateTime<Utc>,
    lifecycle: RwLock<Lifecycle>,
    flow_names: RwLock<BTreeSet<String>>,
}

impl Connection {
    /// Create a connection and register its transfer id with both agents.
    ///
    /// Fails with [`SosError::InvalidRoute`] if any route carries the wrong
    /// classification for its slot; nothing is registered in that case.
    pub fn new(
        client_to_agent: Route,
        inter_agent: Route,
        server_to_agent: Route,
        tuning: TuningConfig,
    ) -> Result<Self> {
        expect_route("client_to_agent", &client_to_agent, RouteType::ClientToAgent)?;
        expect_route("inter_agent", &inter_agent, RouteType::AgentToAgent)?;
        expect_route("server_to_agent", &server_to_agent, RouteType::ServerToAgent)?;

        let connection = Self {
            client_to_agent,
            agent_to_agent: inter_agent,
            server_to_agent,
            transfer_id: Uuid::new_v4(),
            tuning,
            init_time: Utc::now(),
            lifecycle: RwLock::new(Lifecycle::default()),
            flow_names: RwLock::new(BTreeSet::new()),
        };

        // Agents are shared between transfers; only the id is handed over.
        connection.client_side_agent().register_transfer(connection.transfer_id);
        connection.server_side_agent().register_transfer(connection.transfer_id);

        info!(
            "Created connection {}: client {} via agents {} -> {} to server {}",
            connection.transfer_id,
            connection.client().ip,
            connection.client_side_agent().ip,
            connection.server_side_agent().ip,
            connection.server().ip
        );

        Ok(connection)
    }

    /// Record the port the server-side agent uses and stamp the start time.
    ///
    /// Repeating the call with the same port is a no-op. A different port is
    /// rejected and the recorded state is kept, as is a first port arriving
    /// after the transfer was stopped.
    pub fn set_server_side_agent_port(&self, port: u16) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.stop_time.is_some() && !lifecycle.server_agent_port.is_learned() {
            warn!(
                "Transfer {} refusing agent port {} after stop",
                self.transfer_id, port
            );
            return Err(SosError::ConnectionStopped(self.transfer_id));
        }

        match lifecycle.server_agent_port {
            AgentPort::Learned(learned) if learned == port => {
                debug!("Transfer {} already learned agent port {}", self.transfer_id, port);
                Ok(())
            }
            AgentPort::Learned(learned) => {
                warn!(
                    "Transfer {} refusing agent port {}, already learned {}",
                    self.transfer_id, port, learned
                );
                Err(SosError::PortAlreadyLearned {
                    transfer_id: self.transfer_id,
                    learned,
                    attempted: port,
                })
            }
            AgentPort::Unlearned => {
                lifecycle.server_agent_port = AgentPort::Learned(port);
                // Wall clock may step backwards; start never precedes init.
                lifecycle.start_time = Some(Utc::now().max(self.init_time));
                info!("Transfer {} established on agent port {}", self.transfer_id, port);
                Ok(())
            }
        }
    }

    /// Stamp the stop time. Later calls return the first stamp unchanged.
    ///
    /// Installed flows are left alone; whoever withdraws them calls
    /// [`Connection::remove_flows`].
    pub fn set_stop_time(&self) -> DateTime<Utc> {
        let mut lifecycle = self.lifecycle.write();
        if let Some(stopped) = lifecycle.stop_time {
            return stopped;
        }

        let floor = lifecycle.start_time.unwrap_or(self.init_time);
        let stopped = Utc::now().max(floor);
        lifecycle.stop_time = Some(stopped);
        info!("Transfer {} stopped", self.transfer_id);
        stopped
    }

    /// Track a flow rule. Returns false if the name was already tracked.
    pub fn add_flow(&self, name: impl Into<String>) -> bool {
        self.flow_names.write().insert(name.into())
    }

    /// Track several flow rules at once
    pub fn add_flows<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut flows = self.flow_names.write();
        for name in names {
            flows.insert(name.into());
        }
        debug!("Transfer {} tracking {} flows", self.transfer_id, flows.len());
    }

    /// Forget a flow rule. Missing names are ignored.
    pub fn remove_flow(&self, name: &str) -> bool {
        self.flow_names.write().remove(name)
    }

    /// Forget every flow rule, returning how many were tracked
    pub fn remove_flows(&self) -> usize {
        let mut flows = self.flow_names.write();
        let count = flows.len();
        flows.clear();
        count
    }

    pub fn flow_names(&self) -> BTreeSet<String> {
        self.flow_names.read().clone()
    }

    pub fn has_flow(&self, name: &str) -> bool {
        self.flow_names.read().contains(name)
    }

    pub fn flow_count(&self) -> usize {
        self.flow_names.read().len()
    }

    /// Transfer id as a string key
    pub fn name(&self) -> String {
        self.transfer_id.to_string()
    }

    pub fn tuning(&self) -> TuningConfig {
        self.tuning
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.read().state()
    }

    /// Time spent transferring, up to now for a running connection
    pub fn duration(&self) -> Option<Duration> {
        let lifecycle = self.lifecycle.read();
        let start = lifecycle.start_time?;
        let end = lifecycle.stop_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }

    /// Run `retire` with flow tracking held off, only if no flows are tracked.
    ///
    /// Returns what `retire` returned, or false if flows were present.
    pub(crate) fn retire_if_drained<F: FnOnce() -> bool>(&self, retire: F) -> bool {
        let flows = self.flow_names.read();
        flows.is_empty() && retire()
    }

    /// Remove the transfer id from both agents
    pub fn release_agents(&self) {
        self.client_side_agent().deregister_transfer(self.transfer_id);
        self.server_side_agent().deregister_transfer(self.transfer_id);
        debug!("Transfer {} released its agents", self.transfer_id);
    }

    /// True if the client side of this transfer is `ip:port`
    pub fn matches_client(&self, ip: IpAddr, port: u16) -> bool {
        let client = self.client();
        client.ip == ip && client.tcp_port == port
    }

    /// Compare every field, including the current flow names
    pub fn same_state(&self, other: &Connection) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }

        let (lifecycle, flows) = (self.lifecycle.read().clone(), self.flow_names());
        let (other_lifecycle, other_flows) = (other.lifecycle.read().clone(), other.flow_names());

        self.transfer_id == other.transfer_id
            && self.client_to_agent == other.client_to_agent
            && self.agent_to_agent == other.agent_to_agent
            && self.server_to_agent == other.server_to_agent
            && self.tuning == other.tuning
            && self.init_time == other.init_time
            && lifecycle == other_lifecycle
            && flows == other_flows
    }

    /// Point-in-time copy for external consumers
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let lifecycle = self.lifecycle.read().clone();
        ConnectionSnapshot {
            transfer_id: self.transfer_id,
            state: lifecycle.state(),
            client: self.client().clone(),
            server: self.server().clone(),
            client_side_agent: self.client_side_agent().ip,
            server_side_agent: self.server_side_agent().ip,
            server_side_agent_port: lifecycle.server_agent_port.port(),
            tuning: self.tuning,
            flow_names: self.flow_names().into_iter().collect(),
            init_time: self.init_time,
            start_time: lifecycle.start_time,
            stop_time: lifecycle.stop_time,
        }
    }
}

fn expect_route(slot: &'static str, route: &Route, expected: RouteType) -> Result<()> {
    if route.route_type() == expected {
        Ok(())
    } else {
        Err(SosError::InvalidRoute {
            slot,
            expected,
            actual: route.route_type(),
        })
    }
}

fn agent_of(device: &Device) -> &Arc<Agent> {
    match device {
        Device::Agent(agent) => agent,
        other => unreachable!("classified route ends at {}", other),
    }
}

impl ConnectionInfo for Connection {
    fn init_time(&self) -> DateTime<Utc> {
        self.init_time
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.read().start_time
    }

    fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.read().stop_time
    }

    fn client_side_route(&self) -> &Route {
        &self.client_to_agent
    }

    fn inter_agent_route(&self) -> &Route {
        &self.agent_to_agent
    }

    fn server_side_route(&self) -> &Route {
        &self.server_to_agent
    }

    fn server_side_agent_port(&self) -> AgentPort {
        self.lifecycle.read().server_agent_port
    }

    fn client_side_agent(&self) -> &Arc<Agent> {
        agent_of(self.client_to_agent.dst_device())
    }

    fn server_side_agent(&self) -> &Arc<Agent> {
        agent_of(self.server_to_agent.dst_device())
    }

    fn client(&self) -> &Client {
        match self.client_to_agent.src_device() {
            Device::Client(client) => client,
            other => unreachable!("client-to-agent route starts at {}", other),
        }
    }

    fn server(&self) -> &Server {
        match self.server_to_agent.src_device() {
            Device::Server(server) => server,
            other => unreachable!("server-to-agent route starts at {}", other),
        }
    }

    fn transfer_id(&self) -> Uuid {
        self.transfer_id
    }

    fn num_parallel_sockets(&self) -> u32 {
        self.tuning.parallel_sockets
    }

    fn queue_capacity(&self) -> u32 {
        self.tuning.queue_capacity
    }

    fn buffer_size(&self) -> u32 {
        self.tuning.buffer_size
    }

    fn flow_timeout(&self) -> u32 {
        self.tuning.flow_timeout_secs
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.transfer_id == other.transfer_id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transfer_id.hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection {} [{}; {}; {}; agent port {}; sockets={} queue={} buffer={} timeout={}; {} flows]",
            self.transfer_id,
            self.client_to_agent,
            self.agent_to_agent,
            self.server_to_agent,
            self.server_side_agent_port(),
            self.tuning.parallel_sockets,
            self.tuning.queue_capacity,
            self.tuning.buffer_size,
            self.tuning.flow_timeout_secs,
            self.flow_count()
        )
    }
}

/// Serializable view of a connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub transfer_id: Uuid,
    pub state: ConnectionState,
    pub client: Client,
    pub server: Server,
    pub client_side_agent: IpAddr,
    pub server_side_agent: IpAddr,
    pub server_side_agent_port: Option<u16>,
    pub tuning: TuningConfig,
    pub flow_names: Vec<String>,
    pub init_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Hop;
    use std::collections::HashSet;
    use std::thread;

    struct Topology {
        near: Arc<Agent>,
        far: Arc<Agent>,
    }

    impl Topology {
        fn new() -> Self {
            Self {
                near: Arc::new(Agent::new("10.0.0.10".parse().unwrap(), 8002, 9877, 9998)),
                far: Arc::new(Agent::new("10.0.1.10".parse().unwrap(), 8002, 9877, 9998)),
            }
        }

        fn client_to_agent(&self) -> Route {
            let client = Client::new("192.168.1.5".parse().unwrap(), 50123);
            Route::classify(client.into(), self.near.clone().into(), vec![Hop::new(1, 1), Hop::new(1, 4)])
                .unwrap()
        }

        fn agent_to_agent(&self) -> Route {
            Route::classify(self.near.clone().into(), self.far.clone().into(), vec![Hop::new(1, 4), Hop::new(2, 4)])
                .unwrap()
        }

        fn server_to_agent(&self) -> Route {
            let server = Server::new("172.16.0.8".parse().unwrap(), 5001);
            Route::classify(server.into(), self.far.clone().into(), vec![Hop::new(2, 1), Hop::new(2, 4)])
                .unwrap()
        }

        fn connect(&self) -> Connection {
            Connection::new(
                self.client_to_agent(),
                self.agent_to_agent(),
                self.server_to_agent(),
                TuningConfig::default(),
            )
            .unwrap()
        }
    }

    #[test]
    fn test_new_connection() {
        let topo = Topology::new();
        let connection = topo.connect();

        assert_eq!(connection.server_side_agent_port(), AgentPort::Unlearned);
        assert!(connection.start_time().is_none());
        assert!(connection.stop_time().is_none());
        assert!(connection.init_time() <= Utc::now());
        assert_eq!(connection.state(), ConnectionState::Initiated);
        assert_eq!(connection.flow_count(), 0);
        assert_eq!(connection.num_parallel_sockets(), 4000);
        assert_eq!(connection.queue_capacity(), 5);
        assert_eq!(connection.buffer_size(), 70000);
        assert_eq!(connection.flow_timeout(), 0);
    }

    #[test]
    fn test_registers_with_both_agents() {
        let topo = Topology::new();
        let connection = topo.connect();
        let id = connection.transfer_id();

        assert!(topo.near.is_handling(id));
        assert!(topo.far.is_handling(id));

        connection.release_agents();
        assert!(!topo.near.is_handling(id));
        assert!(!topo.far.is_handling(id));
    }

    #[test]
    fn test_transfer_ids_are_unique() {
        let topo = Topology::new();
        let ids: HashSet<Uuid> = (0..100).map(|_| topo.connect().transfer_id()).collect();

        assert_eq!(ids.len(), 100);
        assert_eq!(topo.near.active_transfers(), 100);
    }

    #[test]
    fn test_misclassified_client_route() {
        let topo = Topology::new();
        let result = Connection::new(
            topo.agent_to_agent(),
            topo.agent_to_agent(),
            topo.server_to_agent(),
            TuningConfig::default(),
        );

        assert!(matches!(
            result,
            Err(SosError::InvalidRoute {
                slot: "client_to_agent",
                expected: RouteType::ClientToAgent,
                actual: RouteType::AgentToAgent,
            })
        ));
        assert_eq!(topo.near.active_transfers(), 0);
        assert_eq!(topo.far.active_transfers(), 0);
    }

    #[test]
    fn test_misclassified_inter_agent_route() {
        let topo = Topology::new();
        let result = Connection::new(
            topo.client_to_agent(),
            topo.server_to_agent(),
            topo.server_to_agent(),
            TuningConfig::default(),
        );

        assert!(matches!(
            result,
            Err(SosError::InvalidRoute { slot: "inter_agent", .. })
        ));
        assert_eq!(topo.near.active_transfers(), 0);
        assert_eq!(topo.far.active_transfers(), 0);
    }

    #[test]
    fn test_misclassified_server_route() {
        let topo = Topology::new();
        let result = Connection::new(
            topo.client_to_agent(),
            topo.agent_to_agent(),
            topo.client_to_agent(),
            TuningConfig::default(),
        );

        assert!(matches!(
            result,
            Err(SosError::InvalidRoute { slot: "server_to_agent", .. })
        ));
        assert_eq!(topo.near.active_transfers(), 0);
        assert_eq!(topo.far.active_transfers(), 0);
    }

    #[test]
    fn test_learn_agent_port() {
        let connection = Topology::new().connect();

        connection.set_server_side_agent_port(443).unwrap();
        assert_eq!(connection.server_side_agent_port(), AgentPort::Learned(443));
        assert_eq!(connection.server_side_agent_port().port(), Some(443));

        let start = connection.start_time().unwrap();
        assert!(start >= connection.init_time());
        assert_eq!(connection.state(), ConnectionState::Established);
        assert!(connection.duration().is_some());
    }

    #[test]
    fn test_relearn_agent_port() {
        let connection = Topology::new().connect();
        connection.set_server_side_agent_port(443).unwrap();
        let start = connection.start_time();

        connection.set_server_side_agent_port(443).unwrap();
        assert_eq!(connection.start_time(), start);

        assert!(matches!(
            connection.set_server_side_agent_port(8443),
            Err(SosError::PortAlreadyLearned { learned: 443, attempted: 8443, .. })
        ));
        assert_eq!(connection.server_side_agent_port(), AgentPort::Learned(443));
        assert_eq!(connection.start_time(), start);
    }

    #[test]
    fn test_stop_time() {
        let connection = Topology::new().connect();
        connection.set_server_side_agent_port(443).unwrap();
        connection.add_flow("f1");

        let stopped = connection.set_stop_time();
        assert_eq!(connection.stop_time(), Some(stopped));
        assert!(stopped >= connection.start_time().unwrap());
        assert_eq!(connection.state(), ConnectionState::Stopped);
        assert_eq!(connection.set_stop_time(), stopped);
        // Stopping leaves flow cleanup to the installer.
        assert!(connection.has_flow("f1"));
    }

    #[test]
    fn test_learn_agent_port_after_stop() {
        let connection = Topology::new().connect();
        let stopped = connection.set_stop_time();

        assert!(matches!(
            connection.set_server_side_agent_port(443),
            Err(SosError::ConnectionStopped(id)) if id == connection.transfer_id()
        ));
        assert_eq!(connection.server_side_agent_port(), AgentPort::Unlearned);
        assert!(connection.start_time().is_none());
        assert_eq!(connection.stop_time(), Some(stopped));
        assert_eq!(connection.state(), ConnectionState::Stopped);
        assert!(connection.duration().is_none());
    }

    #[test]
    fn test_relearn_agent_port_after_stop() {
        let connection = Topology::new().connect();
        connection.set_server_side_agent_port(443).unwrap();
        connection.set_stop_time();

        connection.set_server_side_agent_port(443).unwrap();
        assert!(matches!(
            connection.set_server_side_agent_port(8443),
            Err(SosError::PortAlreadyLearned { .. })
        ));
        assert!(connection.stop_time().unwrap() >= connection.start_time().unwrap());
    }

    #[test]
    fn test_add_flow_twice() {
        let connection = Topology::new().connect();

        assert!(connection.add_flow("f1"));
        assert!(!connection.add_flow("f1"));
        assert_eq!(connection.flow_names(), BTreeSet::from(["f1".to_string()]));
    }

    #[test]
    fn test_add_flows_then_remove() {
        let connection = Topology::new().connect();

        connection.add_flows(["a", "b"]);
        connection.add_flows(vec!["b".to_string()]);
        assert!(connection.remove_flow("a"));
        assert_eq!(connection.flow_names(), BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_remove_missing_flow() {
        let connection = Topology::new().connect();

        assert!(!connection.remove_flow("nonexistent"));
        assert!(connection.flow_names().is_empty());
    }

    #[test]
    fn test_remove_flows() {
        let connection = Topology::new().connect();
        connection.add_flows(["a", "b", "c"]);

        assert_eq!(connection.remove_flows(), 3);
        assert!(connection.flow_names().is_empty());
    }

    #[test]
    fn test_equality_is_by_transfer_id() {
        let topo = Topology::new();
        let a = topo.connect();
        let b = topo.connect();

        assert_ne!(a, b);
        assert!(!a.same_state(&b));
        assert_eq!(a.client_side_route(), b.client_side_route());
        assert_eq!(a.tuning(), b.tuning());

        let mut set = HashSet::new();
        set.insert(a.transfer_id());
        a.add_flow("f1");
        assert!(set.contains(&a.transfer_id()));
    }

    #[test]
    fn test_snapshot_tracks_flows() {
        let connection = Topology::new().connect();
        assert!(connection.same_state(&connection));

        let before = connection.snapshot();
        connection.add_flow("f1");
        let after = connection.snapshot();
        assert_ne!(before.flow_names, after.flow_names);
    }

    #[test]
    fn test_snapshot_state_matches_timestamps() {
        let connection = Arc::new(Topology::new().connect());

        let snapshots = thread::scope(|s| {
            let writer = connection.clone();
            s.spawn(move || {
                writer.set_server_side_agent_port(443).unwrap();
                writer.set_stop_time();
            });

            let reader = connection.clone();
            s.spawn(move || (0..500).map(|_| reader.snapshot()).collect::<Vec<_>>())
                .join()
                .unwrap()
        });

        for snapshot in snapshots {
            let expected = if snapshot.stop_time.is_some() {
                ConnectionState::Stopped
            } else if snapshot.start_time.is_some() {
                ConnectionState::Established
            } else {
                ConnectionState::Initiated
            };
            assert_eq!(snapshot.state, expected);
            assert_eq!(snapshot.server_side_agent_port.is_some(), snapshot.start_time.is_some());
        }
        assert_eq!(connection.snapshot().state, ConnectionState::Stopped);
    }

    #[test]
    fn test_retire_if_drained() {
        let connection = Topology::new().connect();
        connection.add_flow("f1");

        let mut retired = false;
        assert!(!connection.retire_if_drained(|| {
            retired = true;
            true
        }));
        assert!(!retired);

        connection.remove_flows();
        assert!(connection.retire_if_drained(|| true));
        assert!(!connection.retire_if_drained(|| false));
    }

    #[test]
    fn test_name_is_transfer_id() {
        let connection = Topology::new().connect();

        assert_eq!(connection.name(), connection.transfer_id().to_string());
        assert_eq!(connection.name(), connection.name());
    }

    #[test]
    fn test_derived_endpoints() {
        let topo = Topology::new();
        let connection = topo.connect();

        assert!(Arc::ptr_eq(connection.client_side_agent(), &topo.near));
        assert!(Arc::ptr_eq(connection.server_side_agent(), &topo.far));
        assert_eq!(connection.client().tcp_port, 50123);
        assert_eq!(connection.server().tcp_port, 5001);
        assert!(connection.matches_client("192.168.1.5".parse().unwrap(), 50123));
        assert!(!connection.matches_client("192.168.1.5".parse().unwrap(), 50124));
        assert_eq!(connection.client_side_route().first_hop(), Some(&Hop::new(1, 1)));
        assert_eq!(connection.inter_agent_route().route_type(), RouteType::AgentToAgent);
    }

    #[test]
    fn test_concurrent_add_flow() {
        let connection = Arc::new(Topology::new().connect());

        thread::scope(|s| {
            for i in 0..32 {
                let connection = connection.clone();
                s.spawn(move || connection.add_flow(format!("flow-{}", i)));
            }
        });

        assert_eq!(connection.flow_count(), 32);
    }

    #[test]
    fn test_snapshot_serializes() {
        let connection = Topology::new().connect();
        connection.set_server_side_agent_port(443).unwrap();
        connection.add_flows(["b", "a"]);

        let json = serde_json::to_value(connection.snapshot()).unwrap();
        assert_eq!(json["state"], "established");
        assert_eq!(json["server_side_agent_port"], 443);
        assert_eq!(json["flow_names"], serde_json::json!(["a", "b"]));
        assert_eq!(json["client_side_agent"], "10.0.0.10");
        assert!(json["stop_time"].is_null());
    }
}
