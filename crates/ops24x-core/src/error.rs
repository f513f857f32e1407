//! Top-level error type

use thiserror::Error;

use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::protocol::ProtocolError;
use crate::session::SessionError;
use crate::store::StoreError;

/// Any error that ends a recording
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
