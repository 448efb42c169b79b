//! Broadcast channel plumbing for trip chat.
//!
//! The [`hub::Hub`] fans frames out to every subscriber of a topic. Clients
//! reach it either in-process ([`transport::LocalTransport`]) or over a
//! WebSocket ([`ws::WsTransport`]) served by [`gateway`]. The
//! [`connection::ConnectionManager`] owns one subscription per chat session
//! and keeps it alive.

pub mod auth;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod hub;
pub mod transport;
pub mod typing;
pub mod ws;

pub use config::RealtimeConfig;
pub use connection::{CONNECTION_EVENT, ConnectionManager, ConnectionStatus, HandlerId};
pub use hub::Hub;
pub use transport::{ChannelConfig, ChannelTransport, LocalTransport, Subscription};
