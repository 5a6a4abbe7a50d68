//! Length-prefixed frame codec used on debuggee TCP connections.
//!
//! Every frame is a 4-byte big-endian signed length followed by that many
//! bytes of UTF-8 text. The first frame on a connection is the session
//! registration and must be exactly [`REGISTRATION_UUID_LEN`] bytes.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte length of a canonical hyphenated UUID, the only valid size for a
/// registration frame.
pub const REGISTRATION_UUID_LEN: usize = 36;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer closed the stream")]
    Eof,
    #[error("invalid frame length {0}")]
    InvalidLength(i32),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn map_eof(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Eof
    } else {
        FrameError::Io(err)
    }
}

/// Read the 4-byte length header of the next frame.
pub async fn read_length<R>(reader: &mut R) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(map_eof)?;
    let len = i32::from_be_bytes(header);
    if len < 0 {
        return Err(FrameError::InvalidLength(len));
    }
    Ok(len as usize)
}

/// Read exactly `len` bytes of frame body as UTF-8 text.
pub async fn read_body<R>(reader: &mut R, len: usize) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(map_eof)?;
    Ok(String::from_utf8(buf)?)
}

/// Read one complete frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    read_body(reader, len).await
}

/// Write one frame: length header, then the payload bytes.
pub async fn write_frame<W>(writer: &mut W, data: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = data.len() as i32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data.as_bytes()).await?;
    writer.flush().await
}
