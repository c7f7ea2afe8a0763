//! Byte link over TCP: each engine frame travels as 1 length byte + frame bytes.

use pico_core::{Transport, TransportError, MAX_FRAME};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

const LEN_SIZE: usize = 1;
const READ_CHUNK: usize = 256;

/// Prefix a frame with its length.
pub fn encode_frame(frame: &[u8]) -> Result<Vec<u8>, LinkError> {
    if frame.is_empty() {
        return Err(LinkError::Empty);
    }
    if frame.len() > MAX_FRAME {
        return Err(LinkError::TooLarge(frame.len()));
    }
    let mut out = Vec::with_capacity(LEN_SIZE + frame.len());
    out.push(frame.len() as u8);
    out.extend_from_slice(frame);
    Ok(out)
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), LinkError> {
    let Some(&len) = bytes.first() else {
        return Err(LinkError::NeedMore);
    };
    let len = len as usize;
    if len == 0 {
        return Err(LinkError::Empty);
    }
    if len > MAX_FRAME {
        return Err(LinkError::TooLarge(len));
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(LinkError::NeedMore);
    }
    Ok((&bytes[LEN_SIZE..LEN_SIZE + len], LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("need more bytes")]
    NeedMore,
    #[error("empty frame")]
    Empty,
    #[error("frame of {0} bytes too large")]
    TooLarge(usize),
}

/// Engine-side transport: queues length-prefixed frames for the writer task.
pub struct LinkSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl LinkSender {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl Transport for LinkSender {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let bytes = encode_frame(frame).map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }
}

/// Drain queued frames onto the link until the sender side is dropped.
pub async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()> {
    while let Some(bytes) = rx.recv().await {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Buffered frame reader. `next_frame` is cancel safe: partial input stays in the buffer.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next complete frame, or `None` once the link is closed.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            match decode_frame(&self.buf) {
                Ok((frame, n)) => {
                    let frame = frame.to_vec();
                    self.buf.drain(..n);
                    trace!(len = frame.len(), "frame from link");
                    return Ok(Some(frame));
                }
                Err(LinkError::NeedMore) => {}
                Err(e) => {
                    // Resync by dropping the bad length byte.
                    warn!(error = %e, "bad length prefix on link");
                    self.buf.drain(..LEN_SIZE);
                    continue;
                }
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_layout() {
        assert_eq!(encode_frame(&[0xC5, 1, 2]).unwrap(), vec![3, 0xC5, 1, 2]);
        assert!(matches!(encode_frame(&[]), Err(LinkError::Empty)));
        assert!(matches!(
            encode_frame(&[0; MAX_FRAME + 1]),
            Err(LinkError::TooLarge(_))
        ));
    }

    #[test]
    fn partial_read_need_more() {
        let bytes = encode_frame(&[0x41, 9, 9]).unwrap();
        assert!(matches!(decode_frame(&[]), Err(LinkError::NeedMore)));
        assert!(matches!(decode_frame(&bytes[..2]), Err(LinkError::NeedMore)));
        let (frame, n) = decode_frame(&bytes).unwrap();
        assert_eq!(frame, &[0x41, 9, 9]);
        assert_eq!(n, 4);
    }

    #[test]
    fn oversize_prefix_rejected() {
        assert!(matches!(
            decode_frame(&[MAX_FRAME as u8 + 1]),
            Err(LinkError::TooLarge(_))
        ));
        assert!(matches!(decode_frame(&[0, 1]), Err(LinkError::Empty)));
    }

    #[test]
    fn sender_reports_closed_link() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut s = LinkSender::new(tx);
        s.send(&[0x80]).unwrap();
        drop(rx);
        assert!(matches!(s.send(&[0x80]), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn reader_splits_stream() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b);
        let mut bytes = encode_frame(&[0xC1, 1]).unwrap();
        // Garbage zero-length prefix between frames is skipped.
        bytes.push(0);
        bytes.extend(encode_frame(&[0x01]).unwrap());
        a.write_all(&bytes[..3]).await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), Some(vec![0xC1, 1]));
        a.write_all(&bytes[3..]).await.unwrap();
        drop(a);
        assert_eq!(reader.next_frame().await.unwrap(), Some(vec![0x01]));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_drains_queue() {
        let (a, mut b) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(a, rx));
        let mut s = LinkSender::new(tx);
        s.send(&[0x45, 9]).unwrap();
        drop(s);
        writer.await.unwrap().unwrap();
        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, vec![2, 0x45, 9]);
    }
}
