//! DCE RPC transport layer
//!
//! Connection-oriented PDUs are self-delimiting via the frag_length field
//! in the header.

use crate::error::{Result, RpcError};
use crate::pdu::{Pdu, PduHeader};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Maximum PDU size accepted from a peer; frag_length is a u16
pub const DEFAULT_MAX_PDU_SIZE: usize = 65535;

/// Reads and writes PDU fragments over a byte stream
pub struct DceRpcTransport<T> {
    inner: T,
    max_pdu_size: usize,
    read_buf: BytesMut,
}

impl<T> DceRpcTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn with_max_pdu_size(mut self, max_size: usize) -> Self {
        self.max_pdu_size = max_size;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: AsyncRead + Unpin> DceRpcTransport<T> {
    /// Read one complete PDU fragment
    pub async fn read_pdu(&mut self) -> Result<Bytes> {
        while self.read_buf.len() < PduHeader::SIZE {
            if self.fill_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(RpcError::ConnectionClosed);
                }
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "incomplete PDU header",
                )));
            }
        }

        let header = PduHeader::decode(&self.read_buf)?;
        let frag_length = header.frag_length as usize;
        if frag_length < PduHeader::SIZE {
            return Err(RpcError::InvalidPduData(format!(
                "invalid fragment length: {} < header size",
                frag_length
            )));
        }
        if frag_length > self.max_pdu_size {
            return Err(RpcError::PduTooLarge {
                size: frag_length,
                max: self.max_pdu_size,
            });
        }

        while self.read_buf.len() < frag_length {
            if self.fill_buf().await? == 0 {
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete PDU: expected {} bytes, got {}",
                        frag_length,
                        self.read_buf.len()
                    ),
                )));
            }
        }

        trace!(
            call_id = header.call_id,
            packet_type = ?header.packet_type,
            frag_length,
            "read PDU"
        );
        Ok(self.read_buf.split_to(frag_length).freeze())
    }

    /// Read and decode one PDU fragment
    pub async fn read_pdu_decoded(&mut self) -> Result<Pdu> {
        let data = self.read_pdu().await?;
        Pdu::decode(&data)
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        Ok(self.inner.read_buf(&mut self.read_buf).await?)
    }
}

impl<T: AsyncWrite + Unpin> DceRpcTransport<T> {
    /// Write one encoded PDU
    pub async fn write_pdu(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write every fragment of one call back to back, then flush.
    pub async fn write_frames(&mut self, frames: &[Bytes]) -> Result<()> {
        for frame in frames {
            self.inner.write_all(frame).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
