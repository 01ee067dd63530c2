//! Address handshake.
//!
//! Wire format:
//! ```text
//! +--------+---------------------------+
//! | Length | Address (network order)   |
//! | 1 byte | 4 or 16 bytes             |
//! +--------+---------------------------+
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::LivenessError;
use crate::core::constants::{IPV4_ADDR_LEN, IPV6_ADDR_LEN, MAX_ADDRESS_FRAME_SIZE};
use crate::transport::{DeadlineReader, DeadlineWriter};

/// Address frame sent by the server once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFrame {
    addr: IpAddr,
}

impl AddressFrame {
    /// Build a frame for `addr`, normalized to its shortest form: an
    /// IPv4-mapped IPv6 address is sent as 4 bytes.
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr: addr.to_canonical(),
        }
    }

    /// The carried address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Value of the length byte.
    pub fn addr_len(&self) -> u8 {
        match self.addr {
            IpAddr::V4(_) => IPV4_ADDR_LEN,
            IpAddr::V6(_) => IPV6_ADDR_LEN,
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ADDRESS_FRAME_SIZE);
        buf.push(self.addr_len());
        match self.addr {
            IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
        }
        buf
    }

    /// Check that a length byte announces a supported address family.
    pub fn check_len(len: u8) -> Result<usize, LivenessError> {
        match len {
            IPV4_ADDR_LEN | IPV6_ADDR_LEN => Ok(len as usize),
            other => Err(LivenessError::InvalidAddressLength(other)),
        }
    }

    /// Build a frame from raw address octets (4 or 16 bytes).
    pub fn from_octets(octets: &[u8]) -> Result<Self, LivenessError> {
        let addr = if let Ok(v4) = <[u8; 4]>::try_from(octets) {
            IpAddr::V4(Ipv4Addr::from(v4))
        } else if let Ok(v6) = <[u8; 16]>::try_from(octets) {
            IpAddr::V6(Ipv6Addr::from(v6))
        } else {
            // Lengths past the wire range saturate.
            let len = u8::try_from(octets.len()).unwrap_or(u8::MAX);
            return Err(LivenessError::InvalidAddressLength(len));
        };
        Ok(Self { addr })
    }
}

/// Server side: send the observed peer address as one logical write.
pub async fn send_address<W>(
    writer: &mut DeadlineWriter<W>,
    observed: IpAddr,
) -> Result<AddressFrame, LivenessError>
where
    W: AsyncWrite + Unpin,
{
    let frame = AddressFrame::new(observed);
    writer.write_all(&frame.encode()).await?;
    Ok(frame)
}

/// Client side: read one address frame.
///
/// A bad length byte fails immediately without reading any further bytes.
pub async fn recv_address<R>(reader: &mut DeadlineReader<R>) -> Result<IpAddr, LivenessError>
where
    R: AsyncRead + Unpin,
{
    let len = AddressFrame::check_len(reader.read_u8().await?)?;
    let mut buf = [0u8; IPV6_ADDR_LEN as usize];
    reader.read_exact(&mut buf[..len]).await?;
    Ok(AddressFrame::from_octets(&buf[..len])?.addr())
}
