pub mod bucket;
pub mod tracker;

use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read one 0xAA-framed packet from `stream`.
/// Returns the full buffer including the 3-byte header.
pub async fn read_framed_packet<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;
    if header[0] != 0xAA {
        bail!("expected 0xAA header, got {:02X}", header[0]);
    }
    let payload_len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let total = payload_len + 3;
    let mut buf = vec![0u8; total];
    buf[..3].copy_from_slice(&header);
    stream.read_exact(&mut buf[3..]).await?;
    Ok(buf)
}

/// Wrap `payload` in a 0xAA frame. Payloads longer than `u16::MAX` are
/// truncated.
pub fn build_framed_packet(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(u16::MAX as usize);
    let mut buf = Vec::with_capacity(len + 3);
    buf.push(0xAA);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&payload[..len]);
    buf
}
