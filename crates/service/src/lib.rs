//! The sales series service: shared state, per-connection workers and the
//! matching client.

use std::io;

use ss_core::CoreError;
use ss_series::SeriesError;
use ss_transport::{DemuxError, TransportError};

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod notify;
pub mod server;
pub mod state;
pub mod worker;

pub use auth::{Authenticator, UserRegistry};
pub use cache::{AggregateKey, SeriesCache};
pub use client::SalesClient;
pub use config::ServiceConfig;
pub use notify::NotificationBoard;
pub use server::serve;
pub use state::ServiceState;
pub use worker::ConnectionWorker;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Format(#[from] CoreError),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Demux(#[from] DemuxError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
