//! Line-delimited JSON framing for the command channel.
//!
//! One frame per line. Generic over tokio's I/O traits so the worker
//! binds it to TCP halves while tests run it over in-memory duplex
//! pipes.

use gauntlet_core::HarnessResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Writes one frame followed by a newline and flushes.
///
/// # Errors
///
/// Returns a serialization error for unencodable frames and a transport
/// error for I/O failures.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> HarnessResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame, or `None` on a clean end of stream.
///
/// `buf` is reused across calls to avoid reallocating per frame. Blank
/// lines are skipped.
///
/// # Errors
///
/// Returns a transport error for I/O failures and a serialization error
/// for undecodable lines.
pub async fn read_frame<R, T>(reader: &mut R, buf: &mut String) -> HarnessResult<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        buf.clear();
        if reader.read_line(buf).await? == 0 {
            return Ok(None);
        }
        let line = buf.trim();
        if line.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(line)?));
    }
}
