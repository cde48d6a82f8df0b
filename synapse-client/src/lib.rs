//! SynapseStrike Client - Live Trading Resources
//!
//! Talks to the SynapseStrike HTTP API and keeps its resources live through
//! the [`synapse_sync`] cache:
//!
//! - [`RemoteClient`]: authenticated requests, envelope normalization,
//!   session expiry and payload encryption for credential writes
//! - [`TradingApi`]: one typed method per endpoint
//! - [`TradingResources`]: cache-backed resources with their refresh
//!   strategies, and mutations that revalidate what they change
//! - [`ClientConfig`]: TOML configuration for the `synapse-watch` binary

pub mod api;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod resources;
pub mod session;
pub mod sse;
pub mod transport;

pub use api::TradingApi;
pub use client::RemoteClient;
pub use config::{ClientConfig, ConfigError};
pub use crypto::{EncryptedPayload, HybridCipher, PayloadCipher};
pub use error::{ClientError, WatchError};
pub use resources::TradingResources;
pub use session::{session_scope, AuthState, MemorySession, SessionExpiry, SessionProvider};
pub use sse::{SseDecoder, SseEvent};
pub use transport::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport,
    StreamResponse,
};
