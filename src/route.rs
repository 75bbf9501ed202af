//! Classified Routes
//!
//! A route is a directed hop list between two devices, tagged with the role
//! it plays in an accelerated transfer. The tag is checked against the
//! endpoint kinds when the route is built, so a route's classification always
//! agrees with the devices it connects.

use crate::device::{Device, DeviceType};
use crate::{Result, SosError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Route classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    /// Client to the client-side agent
    ClientToAgent,
    /// Client-side agent to server-side agent
    AgentToAgent,
    /// Server to the server-side agent
    ServerToAgent,
}

impl RouteType {
    /// Classification for a path between two device kinds, if any
    pub fn from_endpoints(src: DeviceType, dst: DeviceType) -> Option<Self> {
        match (src, dst) {
            (DeviceType::Client, DeviceType::Agent) => Some(RouteType::ClientToAgent),
            (DeviceType::Agent, DeviceType::Agent) => Some(RouteType::AgentToAgent),
            (DeviceType::Server, DeviceType::Agent) => Some(RouteType::ServerToAgent),
            _ => None,
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteType::ClientToAgent => write!(f, "client-to-agent"),
            RouteType::AgentToAgent => write!(f, "agent-to-agent"),
            RouteType::ServerToAgent => write!(f, "server-to-agent"),
        }
    }
}

/// One switch traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    /// Datapath id
    pub switch: u64,
    pub port: u32,
}

impl Hop {
    pub fn new(switch: u64, port: u32) -> Self {
        Self { switch, port }
    }
}

/// Directed, classified path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    route_type: RouteType,
    src: Device,
    dst: Device,
    hops: Vec<Hop>,
}

impl Route {
    /// Build a route with an explicit classification
    pub fn new(route_type: RouteType, src: Device, dst: Device, hops: Vec<Hop>) -> Result<Self> {
        if RouteType::from_endpoints(src.device_type(), dst.device_type()) != Some(route_type) {
            return Err(SosError::InvalidEndpoints {
                route_type,
                src: src.device_type(),
                dst: dst.device_type(),
            });
        }
        Ok(Self {
            route_type,
            src,
            dst,
            hops,
        })
    }

    /// Build a route, deriving its classification from the endpoints
    pub fn classify(src: Device, dst: Device, hops: Vec<Hop>) -> Result<Self> {
        let route_type = RouteType::from_endpoints(src.device_type(), dst.device_type())
            .ok_or(SosError::UnclassifiableRoute {
                src: src.device_type(),
                dst: dst.device_type(),
            })?;
        Ok(Self {
            route_type,
            src,
            dst,
            hops,
        })
    }

    pub fn route_type(&self) -> RouteType {
        self.route_type
    }

    pub fn src_device(&self) -> &Device {
        &self.src
    }

    pub fn dst_device(&self) -> &Device {
        &self.dst
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Switch nearest the source
    pub fn first_hop(&self) -> Option<&Hop> {
        self.hops.first()
    }

    /// Switch nearest the destination
    pub fn last_hop(&self) -> Option<&Hop> {
        self.hops.last()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {}, {} hops]",
            self.route_type,
            self.src,
            self.dst,
            self.hops.len()
        )
    }
}
