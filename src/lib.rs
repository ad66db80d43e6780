//! # whatsapp-gateway
//!
//! Multi-tenant gateway for the WhatsApp web multidevice API.
//!
//! External callers create named sessions, each owning one long-lived
//! connection to the WhatsApp network. Through that connection the gateway
//! pairs a device by QR code, sends text and media messages, records
//! inbound traffic and exposes the whole lifecycle over an authenticated
//! request API.
//!
//! ## Example
//!
//! ```ignore
//! use whatsapp_gateway::protocol::stub::StubConnector;
//! use whatsapp_gateway::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("gateway.toml")?;
//!     Server::new(config, StubConnector::new()).run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod media;
pub mod protocol;
pub mod ratelimit;
pub mod reconcile;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use media::{MediaCategory, MediaRequest, ProcessedMedia};
pub use protocol::{ProtocolClient, ProtocolConnector};
pub use registry::{ClientHandle, ClientRegistry};
pub use server::Server;
pub use store::{MemoryStore, PostgresStore, SessionStore, Store};
pub use types::{Session, SessionStatus};
