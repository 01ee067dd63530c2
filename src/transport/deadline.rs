//! Read and write halves with a re-armed idle deadline.
//!
//! tokio streams have no socket deadlines, so every individual read or write
//! runs under a fresh [`tokio::time::timeout`]. A partial transfer re-arms the
//! deadline for the next chunk, which matches setting a deadline before each
//! call on a blocking socket.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::LivenessError;

/// Run one I/O operation under a freshly armed deadline.
async fn armed<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, LivenessError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(LivenessError::from),
        Err(_) => Err(LivenessError::Timeout { op, timeout }),
    }
}

fn eof() -> LivenessError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer").into()
}

/// Read half of a connection.
#[derive(Debug)]
pub struct DeadlineReader<R> {
    inner: R,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> DeadlineReader<R> {
    /// Wrap `inner`, arming `timeout` before each read.
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The deadline armed before each read.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> Result<u8, LivenessError> {
        let mut byte = [0u8; 1];
        let n = armed("read", self.timeout, self.inner.read(&mut byte)).await?;
        if n == 0 {
            return Err(eof());
        }
        Ok(byte[0])
    }

    /// Fill `buf` completely, re-arming the deadline before each partial read.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LivenessError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = armed("read", self.timeout, self.inner.read(&mut buf[filled..])).await?;
            if n == 0 {
                return Err(eof());
            }
            filled += n;
        }
        Ok(())
    }

    /// Consume and drop exactly `len` bytes under a single deadline.
    pub async fn discard(&mut self, len: u8) -> Result<(), LivenessError> {
        let mut scratch = [0u8; u8::MAX as usize];
        let buf = &mut scratch[..len as usize];
        armed("read", self.timeout, self.inner.read_exact(buf)).await?;
        Ok(())
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Write half of a connection.
#[derive(Debug)]
pub struct DeadlineWriter<W> {
    inner: W,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> DeadlineWriter<W> {
    /// Wrap `inner`, arming `timeout` before each write.
    pub fn new(inner: W, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The deadline armed before each write.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write all of `data`, re-arming the deadline before each partial write,
    /// then flush.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), LivenessError> {
        let mut written = 0;
        while written < data.len() {
            let n = armed("write", self.timeout, self.inner.write(&data[written..])).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            written += n;
        }
        armed("write", self.timeout, self.inner.flush()).await
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_exact_across_chunks() {
        let (mut remote, local) = tokio::io::duplex(64);
        let mut reader = DeadlineReader::new(local, Duration::from_secs(1));

        let feeder = tokio::spawn(async move {
            remote.write_all(&[1, 2]).await.unwrap();
            tokio::task::yield_now().await;
            remote.write_all(&[3, 4]).await.unwrap();
            remote
        });

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        drop(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_eof() {
        let (remote, local) = tokio::io::duplex(64);
        drop(remote);
        let mut reader = DeadlineReader::new(local, Duration::from_secs(1));
        assert!(reader.read_u8().await.unwrap_err().is_eof());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline() {
        let (_remote, local) = tokio::io::duplex(64);
        let mut reader = DeadlineReader::new(local, Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        let err = reader.read_u8().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_discard_leaves_following_bytes() {
        let (mut remote, local) = tokio::io::duplex(64);
        remote.write_all(&[9, 9, 9, 7]).await.unwrap();
        let mut reader = DeadlineReader::new(local, Duration::from_secs(1));

        reader.discard(3).await.unwrap();
        assert_eq!(reader.read_u8().await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_deadline() {
        // A 1-byte pipe that nobody drains fills up after the first write.
        let (_remote, local) = tokio::io::duplex(1);
        let mut writer = DeadlineWriter::new(local, Duration::from_millis(100));

        let err = writer.write_all(&[0, 0]).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
