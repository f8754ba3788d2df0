//! Client for the ICANN Monitoring System API (MoSAPI).
//!
//! The layering mirrors the wire protocol: [`transport::Transport`] owns the
//! mutually-authenticated HTTPS channel, [`auth::MosApiClient`] owns the
//! session lifecycle (login, logout, one-shot re-login on expiry) backed by a
//! cluster-shared [`session::SessionCache`], and the
//! [`monitoring::ServiceMonitoring`] / [`metrica::DomainMetrica`] facades turn
//! raw responses into typed values with per-endpoint status interpretation.

pub mod auth;
pub mod dto;
pub mod error;
pub mod metrica;
pub mod metrics_defs;
pub mod monitoring;
pub mod secrets;
pub mod session;
pub mod tls;
pub mod transport;

pub use auth::{Credentials, EntityType, MosApiClient, SecretStoreCredentials};
pub use error::MosApiError;
pub use transport::{RawResponse, Transport, TransportError};
