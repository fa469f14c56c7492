//! Length-prefixed frames for the control channel.
//!
//! Each frame is a 4-byte big-endian body length followed by one JSON
//! encoded [`Message`]. Beacons do not use this, a UDP datagram already
//! delimits one message.

use crate::communication::messages::Message;
use crate::error::{FleetError, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_BYTES: usize = 1 << 20;

pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = message.encode()?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FleetError::FrameTooLarge {
            size: body.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame. `Ok(None)` means the peer closed the stream
/// cleanly at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let size = u32::from_be_bytes(len_buf) as usize;
    if size > MAX_FRAME_BYTES {
        return Err(FleetError::FrameTooLarge {
            size,
            limit: MAX_FRAME_BYTES,
        });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Message::decode(&body).map(Some)
}
