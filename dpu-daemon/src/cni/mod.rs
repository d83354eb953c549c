//! CNI callback surface: wire types, the event bridge, and the socket server.

pub mod bridge;
pub mod client;
pub mod server;
pub mod types;

pub use bridge::{CniBridge, CniError};
pub use client::{CniClient, CniClientError};
pub use server::CniServer;
pub use types::{CniCommand, CniResult, PodNetworkRequest};
