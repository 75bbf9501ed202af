//! Controller Configuration

use crate::agent_api;
use crate::device::AttachmentPoint;
use crate::{Result, SosError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// Controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SosConfig {
    /// Transfer tuning handed to agents
    #[serde(default)]
    pub tuning: TuningConfig,
    /// Known agents
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl SosConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings no transfer could run with
    pub fn validate(&self) -> Result<()> {
        if self.tuning.parallel_sockets == 0 {
            return Err(SosError::Config("parallel_sockets must be positive".into()));
        }
        if self.tuning.queue_capacity == 0 {
            return Err(SosError::Config("queue_capacity must be positive".into()));
        }
        if self.tuning.buffer_size == 0 {
            return Err(SosError::Config("buffer_size must be positive".into()));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.ip) {
                return Err(SosError::DuplicateAgent(agent.ip));
            }
        }
        Ok(())
    }
}

/// Transport tuning parameters applied to every accelerated transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TuningConfig {
    pub parallel_sockets: u32,
    pub queue_capacity: u32,
    pub buffer_size: u32,
    /// Idle timeout for installed flows in seconds, 0 keeps them permanently
    pub flow_timeout_secs: u32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            parallel_sockets: 4000,
            queue_capacity: 5,
            buffer_size: 70000,
            flow_timeout_secs: 0,
        }
    }
}

/// Agent definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub ip: IpAddr,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,
    #[serde(default)]
    pub attachment: Option<AttachmentPoint>,
}

impl AgentConfig {
    /// Agent at `ip` on the default ports
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            control_port: default_control_port(),
            data_port: default_data_port(),
            feedback_port: default_feedback_port(),
            attachment: None,
        }
    }
}

fn default_control_port() -> u16 {
    agent_api::SERVER_PORT
}

fn default_data_port() -> u16 {
    9877
}

fn default_feedback_port() -> u16 {
    9998
}

/// Monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Retire stopped connections once their flows are withdrawn
    pub reap_stopped: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            reap_stopped: true,
        }
    }
}
