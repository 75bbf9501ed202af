//! Agent control-plane paths

use std::net::{IpAddr, SocketAddr};

/// Port agents listen on for control requests
pub const SERVER_PORT: u16 = 8002;

pub const HTTP_PREFIX: &str = "http://";
pub const BASE_PATH: &str = "/sos";
pub const API_VERSION: &str = "/v1.0";
pub const HEALTH_PATH: &str = "/health";
pub const REQUEST_PATH: &str = "/request";

/// Known agent endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEndpoint {
    Health,
    Request,
}

impl AgentEndpoint {
    pub fn suffix(&self) -> &'static str {
        match self {
            AgentEndpoint::Health => HEALTH_PATH,
            AgentEndpoint::Request => REQUEST_PATH,
        }
    }

    pub fn path(&self) -> String {
        path(self.suffix())
    }

    pub fn url(&self, ip: IpAddr, port: u16) -> String {
        url(ip, port, self.suffix())
    }
}

/// `/sos/v1.0<suffix>`
pub fn path(suffix: &str) -> String {
    format!("{}{}{}", BASE_PATH, API_VERSION, suffix)
}

/// `<ip>:<port>`, with IPv6 addresses bracketed
pub fn address(ip: IpAddr, port: u16) -> String {
    SocketAddr::new(ip, port).to_string()
}

/// `http://<ip>:<port>/sos/v1.0<suffix>`
pub fn url(ip: IpAddr, port: u16, suffix: &str) -> String {
    format!("{}{}{}", HTTP_PREFIX, address(ip, port), path(suffix))
}
