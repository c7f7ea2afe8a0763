//! Framing: one header byte + payload.
//!
//! Header layout: bit 7 = request (1) / response (0); bit 6 = enable-response on a
//! request, ack (1) / nack (0) on a response; bits 0-5 = id.

use std::fmt;

const REQUEST_FLAG: u8 = 1 << 7;
const FLAG_BIT: u8 = 1 << 6;
const ID_MASK: u8 = 0x3f;

/// Highest id that fits in the header.
pub const MAX_ID: u8 = ID_MASK;
/// Largest payload carried by one frame.
pub const MAX_PAYLOAD: usize = 64;
/// Largest frame: header byte + payload.
pub const MAX_FRAME: usize = MAX_PAYLOAD + 1;

/// Bounded payload buffer; request handlers write their output into one of these.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;
/// Bounded outbound frame.
pub type Frame = heapless::Vec<u8, MAX_FRAME>;

/// Packet id in `0..=63`. Construction rejects anything larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u8);

impl Id {
    pub fn new(id: u8) -> Result<Self, FrameEncodeError> {
        if id > MAX_ID {
            return Err(FrameEncodeError::InvalidId(id));
        }
        Ok(Id(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Id {
    type Error = FrameEncodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Id::new(id)
    }
}

impl From<Id> for u8 {
    fn from(id: Id) -> u8 {
        id.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: Id,
    pub direction: Direction,
    /// Enable-response on a request, ack on a response.
    pub flag: bool,
}

impl Header {
    pub fn request(id: Id, enable_response: bool) -> Self {
        Self {
            id,
            direction: Direction::Request,
            flag: enable_response,
        }
    }

    pub fn response(id: Id, ack: bool) -> Self {
        Self {
            id,
            direction: Direction::Response,
            flag: ack,
        }
    }

    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }

    pub fn encode(&self) -> u8 {
        let mut b = self.id.0;
        if self.is_request() {
            b |= REQUEST_FLAG;
        }
        if self.flag {
            b |= FLAG_BIT;
        }
        b
    }

    /// Every byte decodes to some header.
    pub fn decode(byte: u8) -> Self {
        let direction = if byte & REQUEST_FLAG != 0 {
            Direction::Request
        } else {
            Direction::Response
        };
        Self {
            id: Id(byte & ID_MASK),
            direction,
            flag: byte & FLAG_BIT != 0,
        }
    }
}

/// Encode a header from raw parts. Fails if `id` does not fit in 6 bits.
pub fn encode_header(id: u8, is_request: bool, flag: bool) -> Result<u8, FrameEncodeError> {
    let id = Id::new(id)?;
    let direction = if is_request {
        Direction::Request
    } else {
        Direction::Response
    };
    Ok(Header {
        id,
        direction,
        flag,
    }
    .encode())
}

pub fn decode_header(byte: u8) -> Header {
    Header::decode(byte)
}

/// Encode a frame: header byte followed by `payload`.
pub fn encode_frame(header: Header, payload: &[u8]) -> Result<Frame, FrameEncodeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameEncodeError::TooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let mut out = Frame::new();
    let too_large = || FrameEncodeError::TooLarge {
        len: payload.len(),
        max: MAX_PAYLOAD,
    };
    out.push(header.encode()).map_err(|_| too_large())?;
    out.extend_from_slice(payload).map_err(|_| too_large())?;
    Ok(out)
}

/// Split an inbound frame into its header and payload. `None` if `bytes` is empty.
pub fn decode_frame(bytes: &[u8]) -> Option<(Header, &[u8])> {
    let (&first, payload) = bytes.split_first()?;
    Some((Header::decode(first), payload))
}

/// Error building a header or frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("id {0} does not fit in 6 bits")]
    InvalidId(u8),
    #[error("payload of {len} bytes exceeds {max}")]
    TooLarge { len: usize, max: usize },
}
