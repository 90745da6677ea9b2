//! DCE RPC PDU fragmentation
//!
//! Stub data larger than the negotiated fragment size travels as a run of
//! request or response PDUs sharing one call_id, the first flagged
//! FIRST_FRAG and the last LAST_FRAG (C706 12.5, MS-RPCE 3.3.1.5.4).
//!
//! ```text
//! max_frag size limit (e.g., 4280 bytes)
//! ├── PDU Header (16 bytes)
//! ├── Request/Response body header (8 bytes)
//! ├── Object UUID (16 bytes, optional, request only)
//! └── Stub data fragment (variable, multiple of 8 except the last)
//! ```

use crate::error::{Result, RpcError};
use crate::pdu::{PacketFlags, PduHeader, RequestPdu, ResponsePdu};
use bytes::{Bytes, BytesMut};

/// Splits outgoing stub data into fragments.
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Largest stub chunk that fits one fragment, rounded down to 8 bytes.
    pub fn max_stub_size(max_frag: u16, has_object_uuid: bool) -> usize {
        let object_uuid_size = if has_object_uuid { 16 } else { 0 };
        let overhead = PduHeader::SIZE + RequestPdu::BODY_HEADER_SIZE + object_uuid_size;
        (max_frag as usize).saturating_sub(overhead) & !7
    }

    /// Flags and stub slice of each fragment, in order.
    fn split(stub: &Bytes, max_stub: usize) -> Result<Vec<(PacketFlags, Bytes)>> {
        if stub.len() <= max_stub {
            return Ok(vec![(PacketFlags::complete(), stub.clone())]);
        }
        if max_stub == 0 {
            return Err(RpcError::PduTooLarge {
                size: stub.len(),
                max: 0,
            });
        }

        let total = stub.len();
        let mut fragments = Vec::with_capacity(total.div_ceil(max_stub));
        let mut offset = 0;
        while offset < total {
            let end = (offset + max_stub).min(total);
            let mut flags = PacketFlags::new();
            if offset == 0 {
                flags = flags.with(PacketFlags::FIRST_FRAG);
            }
            if end == total {
                flags = flags.with(PacketFlags::LAST_FRAG);
            }
            fragments.push((flags, stub.slice(offset..end)));
            offset = end;
        }
        Ok(fragments)
    }

    /// Fragment a request. Every fragment carries the total stub size as
    /// its alloc_hint and repeats the object UUID.
    pub fn fragment_request(request: &RequestPdu, max_frag: u16) -> Result<Vec<RequestPdu>> {
        let max_stub = Self::max_stub_size(max_frag, request.object_uuid.is_some());
        let alloc_hint = request.stub_data.len() as u32;
        Ok(Self::split(&request.stub_data, max_stub)?
            .into_iter()
            .map(|(flags, chunk)| {
                let mut frag = request.clone();
                frag.header.packet_flags = flags;
                frag.alloc_hint = alloc_hint;
                frag.stub_data = chunk;
                frag
            })
            .collect())
    }

    pub fn fragment_response(response: &ResponsePdu, max_frag: u16) -> Result<Vec<ResponsePdu>> {
        let max_stub = Self::max_stub_size(max_frag, false);
        let alloc_hint = response.stub_data.len() as u32;
        Ok(Self::split(&response.stub_data, max_stub)?
            .into_iter()
            .map(|(flags, chunk)| {
                let mut frag = response.clone();
                frag.header.packet_flags = flags;
                frag.alloc_hint = alloc_hint;
                frag.stub_data = chunk;
                frag
            })
            .collect())
    }

    /// Fragment and encode a request, ready for one atomic write.
    pub fn encode_request(request: &RequestPdu, max_frag: u16) -> Result<Vec<Bytes>> {
        Self::fragment_request(request, max_frag)?
            .iter()
            .map(RequestPdu::encode)
            .collect()
    }

    pub fn encode_response(response: &ResponsePdu, max_frag: u16) -> Result<Vec<Bytes>> {
        Self::fragment_response(response, max_frag)?
            .iter()
            .map(ResponsePdu::encode)
            .collect()
    }
}

/// Largest reassembled stub accepted by default
pub const DEFAULT_MAX_STUB_SIZE: usize = 16 * 1024 * 1024;

/// Reassembles incoming fragments of one call.
pub struct FragmentAssembler {
    call_id: u32,
    stub_data: BytesMut,
    context_id: u16,
    opnum: Option<u16>,
    received_first: bool,
    received_last: bool,
    max_size: usize,
}

impl FragmentAssembler {
    pub fn new(call_id: u32) -> Self {
        Self {
            call_id,
            stub_data: BytesMut::new(),
            context_id: 0,
            opnum: None,
            received_first: false,
            received_last: false,
            max_size: DEFAULT_MAX_STUB_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    pub fn context_id(&self) -> u16 {
        self.context_id
    }

    /// Opnum of a request run; None for responses.
    pub fn opnum(&self) -> Option<u16> {
        self.opnum
    }

    pub fn is_complete(&self) -> bool {
        self.received_first && self.received_last
    }

    /// Add one fragment.
    ///
    /// Returns the whole stub once the LAST_FRAG fragment arrives, `None`
    /// while more are expected. The buffer grows with the data received;
    /// the sender's alloc_hint is not trusted for preallocation.
    pub fn add_fragment(
        &mut self,
        header: &PduHeader,
        stub: &[u8],
        ctx_id: u16,
        opnum: Option<u16>,
    ) -> Result<Option<Bytes>> {
        if header.call_id != self.call_id {
            return Err(RpcError::CallIdMismatch {
                expected: self.call_id,
                got: header.call_id,
            });
        }

        let flags = header.packet_flags;
        if flags.is_first_frag() {
            if self.received_first {
                return Err(RpcError::FragmentAssemblyError(
                    "received duplicate first fragment".to_string(),
                ));
            }
            self.received_first = true;
            self.context_id = ctx_id;
            self.opnum = opnum;
        } else if !self.received_first {
            return Err(RpcError::FragmentOutOfOrder);
        }

        if ctx_id != self.context_id || opnum != self.opnum {
            return Err(RpcError::ContextMismatch);
        }

        if self.stub_data.len() + stub.len() > self.max_size {
            return Err(RpcError::PduTooLarge {
                size: self.stub_data.len() + stub.len(),
                max: self.max_size,
            });
        }
        self.stub_data.extend_from_slice(stub);

        if flags.is_last_frag() {
            self.received_last = true;
            return Ok(Some(self.stub_data.split().freeze()));
        }
        Ok(None)
    }

    /// Reuse the assembler for another call.
    pub fn reset(&mut self, call_id: u32) {
        self.call_id = call_id;
        self.stub_data.clear();
        self.context_id = 0;
        self.opnum = None;
        self.received_first = false;
        self.received_last = false;
    }
}
