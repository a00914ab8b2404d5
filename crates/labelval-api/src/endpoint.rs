// Node addressing
//
// A verification system exposes one system port for discovery and one
// HTTP/WebSocket port per node: node `n` listens on `8080 + n`.

use url::Url;

use crate::error::Error;

/// Base port that node numbers are added to.
const NODE_PORT_BASE: u16 = 8080;

/// Address of one node on a verification system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub host: String,
    pub system_port: u16,
    pub node_number: u16,
    /// Overrides the derived node port (simulators, tests, port forwards).
    pub node_port: Option<u16>,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, system_port: u16, node_number: u16) -> Self {
        Self {
            host: host.into(),
            system_port,
            node_number,
            node_port: None,
        }
    }

    /// Pin the node port instead of deriving it from the node number.
    pub fn with_node_port(mut self, port: u16) -> Self {
        self.node_port = Some(port);
        self
    }

    /// Port the node's command and event surfaces listen on.
    pub fn port(&self) -> u16 {
        self.node_port
            .unwrap_or_else(|| NODE_PORT_BASE.saturating_add(self.node_number))
    }

    /// `http://{host}:{port}/api/printinspection/{node}`
    pub fn node_base(&self) -> Result<Url, Error> {
        let raw = format!(
            "http://{}:{}/api/printinspection/{}",
            self.host,
            self.port(),
            self.node_number
        );
        Ok(Url::parse(&raw)?)
    }

    /// `http://{host}:{system_port}/api/printinspection`
    pub fn system_base(&self) -> Result<Url, Error> {
        let raw = format!(
            "http://{}:{}/api/printinspection",
            self.host, self.system_port
        );
        Ok(Url::parse(&raw)?)
    }

    /// `ws://{host}:{port}/api/printinspection/{node}/inspection/events`
    pub fn events_url(&self) -> Result<Url, Error> {
        let raw = format!(
            "ws://{}:{}/api/printinspection/{}/inspection/events",
            self.host,
            self.port(),
            self.node_number
        );
        Ok(Url::parse(&raw)?)
    }
}

impl std::fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port(), self.node_number)
    }
}
