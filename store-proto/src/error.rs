//! Crate-wide error type.
//!
//! Per the error handling design, almost nothing here is meant to propagate
//! out of a protocol layer: a lookup miss becomes an invalid `Variant`, a
//! malformed command becomes a `?` reply, a full macro table becomes a
//! rejected `m`. `Error` exists for the handful of call sites that really do
//! need a `Result` — I/O at the edges of a stack, and misconfiguration caught
//! at construction time.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed varint")]
    BadVarint,

    #[error("directory lookup `{0}` failed")]
    LookupMiss(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unknown store hash `{0}`")]
    UnknownHash(String),

    #[error("store buffer too small for key {key} (len {len}, buffer {buffer_size})")]
    KeyOutOfRange {
        key: u32,
        len: u32,
        buffer_size: u32,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
