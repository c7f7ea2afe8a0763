//! Status codes carried on the wire and the synchronous error types.

/// Protocol status. The numeric codes are what travels in a nack payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoError,
    Args,
    UnknownId,
    DataNotReady,
    PayloadOutOfBounds,
    UnknownPayload,
    Timeout,
    NackReceived,
    /// Application-defined code returned by a request handler.
    Other(u8),
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::NoError => 0,
            Status::Args => 1,
            Status::UnknownId => 2,
            Status::DataNotReady => 3,
            Status::PayloadOutOfBounds => 4,
            Status::UnknownPayload => 5,
            Status::Timeout => 6,
            Status::NackReceived => 7,
            Status::Other(c) => c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Status::NoError,
            1 => Status::Args,
            2 => Status::UnknownId,
            3 => Status::DataNotReady,
            4 => Status::PayloadOutOfBounds,
            5 => Status::UnknownPayload,
            6 => Status::Timeout,
            7 => Status::NackReceived,
            c => Status::Other(c),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::NoError
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::NoError => write!(f, "no error"),
            Status::Args => write!(f, "invalid arguments"),
            Status::UnknownId => write!(f, "unknown id"),
            Status::DataNotReady => write!(f, "data not ready"),
            Status::PayloadOutOfBounds => write!(f, "payload out of bounds"),
            Status::UnknownPayload => write!(f, "unknown payload"),
            Status::Timeout => write!(f, "timed out"),
            Status::NackReceived => write!(f, "nack received"),
            Status::Other(c) => write!(f, "application status {}", c),
        }
    }
}

/// Failure reported by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no transmit function registered")]
    NotRegistered,
    #[error("link closed")]
    Closed,
    #[error("driver returned {0}")]
    Code(i32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned synchronously from `send_request` / `send_response`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("id {0} out of range (max 63)")]
    InvalidId(u8),
    #[error("payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("a request is already awaiting its response")]
    Busy,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

impl EngineError {
    /// Status code to report for this error across the C ABI.
    pub fn status(&self) -> Status {
        match self {
            EngineError::InvalidId(_) => Status::Args,
            EngineError::PayloadTooLarge { .. } => Status::PayloadOutOfBounds,
            EngineError::Busy => Status::DataNotReady,
            EngineError::Transport(TransportError::NotRegistered) => Status::Args,
            EngineError::Transport(_) => Status::Other(0xff),
        }
    }
}

impl From<crate::wire::FrameEncodeError> for EngineError {
    fn from(e: crate::wire::FrameEncodeError) -> Self {
        match e {
            crate::wire::FrameEncodeError::InvalidId(id) => EngineError::InvalidId(id),
            crate::wire::FrameEncodeError::TooLarge { len, max } => {
                EngineError::PayloadTooLarge { len, max }
            }
        }
    }
}
