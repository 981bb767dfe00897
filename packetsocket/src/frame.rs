//! One packet on the wire.
//!
//! ```text
//! [group_len:u8][group][alias_len:u8][alias][correlation:u8][token:u64 iff correlation != 0][payload_len:u32][payload]
//! ```
//! Multi-byte integers are big-endian. The correlation byte is 0 for no token, 1
//! for a request token and 2 for a response token.

use bytes::{BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::descriptor::MAX_NAME_LENGTH;

const NO_CORRELATION: u8 = 0;
const REQUEST_CORRELATION: u8 = 1;
const RESPONSE_CORRELATION: u8 = 2;

/// How a frame relates to other frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Fire-and-forget
    None,
    /// The sender waits for a response carrying this token
    Request(u64),
    /// Answers the receiver's request with this token
    Response(u64),
}

/// The wire envelope of one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    group: String,
    alias: String,
    correlation: Correlation,
    payload: Bytes,
}

impl Frame {
    /// Fails when a name is longer than a length byte can describe, or when the
    /// payload is longer than the 32-bit length prefix can describe.
    pub fn new(
        group: impl Into<String>,
        alias: impl Into<String>,
        correlation: Correlation,
        payload: impl Into<Bytes>,
    ) -> crate::Result<Self> {
        let group = group.into();
        let alias = alias.into();
        let payload = payload.into();
        for (what, name) in [("group", &group), ("alias", &alias)] {
            if MAX_NAME_LENGTH < name.len() {
                return Err(crate::Error::Encode(format!(
                    "frame {what} {name:?} is {}b, the limit is {MAX_NAME_LENGTH}b",
                    name.len()
                )));
            }
        }
        check_payload_length(payload.len())?;
        Ok(Self {
            group,
            alias,
            correlation,
            payload,
        })
    }

    /// The group of the packet type.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The packet type's alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// How this frame relates to a request.
    pub fn correlation(&self) -> Correlation {
        self.correlation
    }

    /// The packet's encoded values.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Size of the frame on the wire.
    pub fn encoded_len(&self) -> usize {
        let token = match self.correlation {
            Correlation::None => 0,
            Correlation::Request(_) | Correlation::Response(_) => 8,
        };
        1 + self.group.len() + 1 + self.alias.len() + 1 + token + 4 + self.payload.len()
    }

    /// Write the frame. Lengths were checked in `Frame::new`.
    pub fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u8(self.group.len() as u8);
        buffer.put_slice(self.group.as_bytes());
        buffer.put_u8(self.alias.len() as u8);
        buffer.put_slice(self.alias.as_bytes());
        match self.correlation {
            Correlation::None => buffer.put_u8(NO_CORRELATION),
            Correlation::Request(token) => {
                buffer.put_u8(REQUEST_CORRELATION);
                buffer.put_u64(token);
            }
            Correlation::Response(token) => {
                buffer.put_u8(RESPONSE_CORRELATION);
                buffer.put_u64(token);
            }
        }
        buffer.put_u32(self.payload.len() as u32);
        buffer.put_slice(&self.payload);
    }

    /// The whole frame, ready to write.
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buffer);
        buffer.into()
    }
}

fn check_payload_length(length: usize) -> crate::Result<()> {
    if (u32::MAX as usize) < length {
        return Err(crate::Error::FrameTooLarge {
            length,
            max: u32::MAX as usize,
        });
    }
    Ok(())
}

/// Read exactly one frame from `reader`, consuming nothing past its end.
///
/// A stream that ends before a complete frame is `ConnectionClosed`. A payload
/// longer than `max_payload_length` is `FrameTooLarge`, checked before the
/// payload is read or allocated.
pub async fn read_frame<R>(reader: &mut R, max_payload_length: usize) -> crate::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let group = read_name(reader).await?;
    let alias = read_name(reader).await?;
    let correlation = match read_u8(reader).await? {
        NO_CORRELATION => Correlation::None,
        REQUEST_CORRELATION => Correlation::Request(read_u64(reader).await?),
        RESPONSE_CORRELATION => Correlation::Response(read_u64(reader).await?),
        flag => {
            return Err(crate::Error::CorruptFrame(format!(
                "unknown correlation flag {flag}"
            )))
        }
    };
    let length = read_u32(reader).await? as usize;
    if max_payload_length < length {
        return Err(crate::Error::FrameTooLarge {
            length,
            max: max_payload_length,
        });
    }
    let mut payload = vec![0; length];
    read_exact(reader, &mut payload).await?;
    log::trace!("read frame {group:?}/{alias:?} {correlation:?}: {length}b payload");

    // The whole frame is consumed; names that are not utf-8 leave the stream in sync.
    let group = String::from_utf8(group)
        .map_err(|_| crate::Error::InvalidFrame("group is not valid utf-8".to_string()))?;
    let alias = String::from_utf8(alias)
        .map_err(|_| crate::Error::InvalidFrame("alias is not valid utf-8".to_string()))?;
    Ok(Frame {
        group,
        alias,
        correlation,
        payload: payload.into(),
    })
}

async fn read_name<R: AsyncRead + Unpin>(reader: &mut R) -> crate::Result<Vec<u8>> {
    let length = read_u8(reader).await? as usize;
    let mut name = vec![0; length];
    read_exact(reader, &mut name).await?;
    Ok(name)
}

async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> crate::Result<u8> {
    let mut buffer = [0; 1];
    read_exact(reader, &mut buffer).await?;
    Ok(buffer[0])
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> crate::Result<u32> {
    let mut buffer = [0; 4];
    read_exact(reader, &mut buffer).await?;
    Ok(u32::from_be_bytes(buffer))
}

async fn read_u64<R: AsyncRead + Unpin>(reader: &mut R) -> crate::Result<u64> {
    let mut buffer = [0; 8];
    read_exact(reader, &mut buffer).await?;
    Ok(u64::from_be_bytes(buffer))
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> crate::Result<()> {
    match reader.read_exact(buffer).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            log::debug!("stream ended while reading a frame");
            Err(crate::Error::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}
