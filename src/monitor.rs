//! Connection Monitoring

use crate::config::MonitorConfig;
use crate::connection::{ConnectionInfo, ConnectionState};
use crate::registry::{AgentDirectory, ConnectionRegistry};
use crate::Result;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Start the monitor loop
pub async fn start_monitor(
    agents: Arc<AgentDirectory>,
    connections: Arc<ConnectionRegistry>,
    config: MonitorConfig,
) -> Result<()> {
    info!("Starting connection monitor");

    let period = tokio::time::Duration::from_secs(config.interval_secs.max(1));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let report = sweep(&agents, &connections, config.reap_stopped);
        debug!(
            "Monitor: {} initiated, {} established, {} stopped, {} retired",
            report.initiated,
            report.established,
            report.stopped,
            report.retired.len()
        );
    }
}

/// One pass over the registry.
///
/// Stopped connections whose flows have all been withdrawn are retired when
/// `reap` is set; stopped connections still holding flows are reported.
pub fn sweep(agents: &AgentDirectory, connections: &ConnectionRegistry, reap: bool) -> MonitorReport {
    let mut report = MonitorReport::default();

    for connection in connections.list() {
        match connection.state() {
            ConnectionState::Initiated => report.initiated += 1,
            ConnectionState::Established => report.established += 1,
            ConnectionState::Stopped => {
                report.stopped += 1;
                let flows = connection.flow_count();
                if flows > 0 {
                    warn!(
                        "Connection {} stopped with {} flows still installed",
                        connection.transfer_id(),
                        flows
                    );
                } else if reap && connections.remove_if_drained(connection.transfer_id()).is_some() {
                    report.retired.push(connection.transfer_id());
                }
            }
        }
    }

    for agent in agents.all() {
        let load = AgentLoad {
            ip: agent.ip,
            active_transfers: agent.active_transfers(),
        };
        if load.active_transfers > 0 {
            debug!("Agent {} serving {} transfers", load.ip, load.active_transfers);
        }
        report.agents.push(load);
    }
    report.agents.sort_by_key(|a| a.ip);

    report
}

/// Result of a monitor pass
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub initiated: usize,
    pub established: usize,
    pub stopped: usize,
    /// Connections removed from the registry during this pass
    pub retired: Vec<Uuid>,
    pub agents: Vec<AgentLoad>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLoad {
    pub ip: IpAddr,
    pub active_transfers: usize,
}
