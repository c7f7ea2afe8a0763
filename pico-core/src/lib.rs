//! PicoConfig request/response engine for byte links (UART, SPI, ...).
//! Host-driven: no I/O of its own; the host sends through a `Transport`, feeds inbound
//! frames to `receive`, and calls `tick` with elapsed time.

pub mod config;
pub mod engine;
pub mod ffi;
pub mod registry;
pub mod status;
pub mod transport;
pub mod wire;

pub use config::{Config, DEFAULT_ROUND_TRIP_BUDGET};
pub use engine::{Engine, State};
pub use registry::{FnHandler, Handler, HandlerEntry, Registry};
pub use status::{EngineError, Status, TransportError};
pub use transport::Transport;
pub use wire::{
    decode_frame, decode_header, encode_frame, encode_header, Direction, Frame, FrameEncodeError,
    Header, Id, Payload, MAX_FRAME, MAX_ID, MAX_PAYLOAD,
};
