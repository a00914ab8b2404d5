// labelval-api: Async Rust client for print-quality verification nodes
// (command surface + inspection event stream)

pub mod auth;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod models;
pub mod transport;
pub mod websocket;

pub use auth::{AccessLevel, Credentials, LoginSession};
pub use client::NodeClient;
pub use endpoint::NodeEndpoint;
pub use error::Error;
pub use events::{EventEnvelope, EventKind, InspectionEvent};
pub use transport::TransportConfig;
pub use websocket::{ConnectionState, EventStream, StreamConfig, StreamFault};
