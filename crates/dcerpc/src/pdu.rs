//! DCE RPC PDU (Protocol Data Unit) types
//!
//! Connection-oriented PDUs as defined in:
//! - DCE 1.1: Remote Procedure Call (C706), chapter 12
//! - MS-RPCE: Remote Procedure Call Protocol Extensions
//!
//! DCE RPC PDU Header Format:
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ptype  | pflags |
//! +--------+--------+--------+--------+
//! |        data representation        |
//! +--------+--------+--------+--------+
//! |   frag_len      |   auth_len      |
//! +--------+--------+--------+--------+
//! |             call_id               |
//! +--------+--------+--------+--------+
//! ```
//!
//! PDU bodies are written with [`NdrWriter`] and read with [`NdrReader`] in
//! the byte order of the header's data representation label. The header is
//! 16 bytes, so body alignment measured from the body start matches the
//! alignment measured from the PDU start.

use crate::error::{Result, RpcError};
use bytes::{BufMut, Bytes, BytesMut};
use msrpc_ndr::{NdrContext, NdrDecode, NdrEncode, NdrReader, NdrWriter};
use std::fmt;
use std::str::FromStr;

/// DCE RPC protocol version
pub const DCE_RPC_VERSION: u8 = 5;
/// DCE RPC protocol minor version
pub const DCE_RPC_VERSION_MINOR: u8 = 0;
/// Fragment size Windows peers offer by default
pub const DEFAULT_MAX_FRAG: u16 = 4280;

/// NDR Transfer Syntax UUID
pub const NDR_SYNTAX_UUID: Uuid = Uuid {
    time_low: 0x8a88_5d04,
    time_mid: 0x1ceb,
    time_hi_and_version: 0x11c9,
    clock_seq_hi_and_reserved: 0x9f,
    clock_seq_low: 0xe8,
    node: [0x08, 0x00, 0x2b, 0x10, 0x48, 0x60],
};
pub const NDR_SYNTAX_VERSION: u16 = 2;

/// Connection-oriented packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    /// MS-RPCE third leg of an authenticated bind
    Auth3 = 16,
    Shutdown = 17,
    CoCancel = 18,
    Orphaned = 19,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            14 => Some(Self::AlterContext),
            15 => Some(Self::AlterContextResp),
            16 => Some(Self::Auth3),
            17 => Some(Self::Shutdown),
            18 => Some(Self::CoCancel),
            19 => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// First fragment
    pub const FIRST_FRAG: u8 = 0x01;
    /// Last fragment
    pub const LAST_FRAG: u8 = 0x02;
    /// Cancel pending
    pub const PENDING_CANCEL: u8 = 0x04;
    /// Supports concurrent multiplexing
    pub const CONC_MPX: u8 = 0x10;
    /// Did not execute
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    /// Maybe semantics requested
    pub const MAYBE: u8 = 0x40;
    /// Object UUID follows the request body header
    pub const OBJECT_UUID: u8 = 0x80;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags for a PDU that is not fragmented
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_first_frag(&self) -> bool {
        self.contains(Self::FIRST_FRAG)
    }

    pub fn is_last_frag(&self) -> bool {
        self.contains(Self::LAST_FRAG)
    }

    pub fn has_object_uuid(&self) -> bool {
        self.contains(Self::OBJECT_UUID)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Data Representation Format Label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation {
    pub int_rep: IntRep,
    pub char_rep: CharRep,
    pub float_rep: FloatRep,
}

/// Integer representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntRep {
    BigEndian = 0,
    LittleEndian = 1,
}

/// Character representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharRep {
    Ascii = 0,
    Ebcdic = 1,
}

/// Floating point representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRep {
    Ieee = 0,
    Vax = 1,
    Cray = 2,
    Ibm = 3,
}

impl DataRepresentation {
    /// Little-endian, ASCII, IEEE
    pub fn ndr() -> Self {
        Self {
            int_rep: IntRep::LittleEndian,
            char_rep: CharRep::Ascii,
            float_rep: FloatRep::Ieee,
        }
    }

    pub fn big_endian() -> Self {
        Self {
            int_rep: IntRep::BigEndian,
            ..Self::ndr()
        }
    }

    /// Wire format (MS-RPCE 2.2.2.3): byte 0 holds the integer
    /// representation in its upper nibble and the character set in its
    /// lower nibble, byte 1 the float format, bytes 2-3 are reserved.
    pub fn encode(&self) -> [u8; 4] {
        let byte0 = (self.char_rep as u8) | ((self.int_rep as u8) << 4);
        [byte0, self.float_rep as u8, 0, 0]
    }

    pub fn decode(data: [u8; 4]) -> Self {
        let int_rep = if data[0] & 0xF0 == 0 {
            IntRep::BigEndian
        } else {
            IntRep::LittleEndian
        };
        let char_rep = if data[0] & 0x0F == 0 {
            CharRep::Ascii
        } else {
            CharRep::Ebcdic
        };
        let float_rep = match data[1] {
            0 => FloatRep::Ieee,
            1 => FloatRep::Vax,
            2 => FloatRep::Cray,
            _ => FloatRep::Ibm,
        };
        Self {
            int_rep,
            char_rep,
            float_rep,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        self.int_rep == IntRep::LittleEndian
    }

    /// Codec settings for stub data carried under this label
    pub fn ndr_context(&self) -> NdrContext {
        NdrContext::with_byte_order(self.is_little_endian())
    }
}

impl Default for DataRepresentation {
    fn default() -> Self {
        Self::ndr()
    }
}

/// UUID structure (128 bits), laid out as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
pub struct Uuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq_hi_and_reserved: u8,
    pub clock_seq_low: u8,
    pub node: [u8; 6],
}

impl Uuid {
    pub const NIL: Self = Self {
        time_low: 0,
        time_mid: 0,
        time_hi_and_version: 0,
        clock_seq_hi_and_reserved: 0,
        clock_seq_low: 0,
        node: [0; 6],
    };

    /// Parse from "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx", braces optional
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('{').trim_end_matches('}');
        if s.len() != 36 {
            return None;
        }
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5 || parts[4].len() != 12 {
            return None;
        }

        let time_low = u32::from_str_radix(parts[0], 16).ok()?;
        let time_mid = u16::from_str_radix(parts[1], 16).ok()?;
        let time_hi_and_version = u16::from_str_radix(parts[2], 16).ok()?;
        let clock = u16::from_str_radix(parts[3], 16).ok()?;

        let mut node = [0u8; 6];
        for (i, byte) in node.iter_mut().enumerate() {
            *byte = u8::from_str_radix(parts[4].get(i * 2..i * 2 + 2)?, 16).ok()?;
        }

        Some(Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_hi_and_reserved: (clock >> 8) as u8,
            clock_seq_low: clock as u8,
            node,
        })
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Mixed-endian GUID byte layout used by Windows
    pub fn to_bytes_le(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.time_low.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.time_mid.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.time_hi_and_version.to_le_bytes());
        bytes[8] = self.clock_seq_hi_and_reserved;
        bytes[9] = self.clock_seq_low;
        bytes[10..16].copy_from_slice(&self.node);
        bytes
    }

    pub fn from_bytes_le(bytes: [u8; 16]) -> Self {
        let mut node = [0u8; 6];
        node.copy_from_slice(&bytes[10..16]);
        Self {
            time_low: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            time_mid: u16::from_le_bytes([bytes[4], bytes[5]]),
            time_hi_and_version: u16::from_le_bytes([bytes[6], bytes[7]]),
            clock_seq_hi_and_reserved: bytes[8],
            clock_seq_low: bytes[9],
            node,
        }
    }

    /// Read a UUID by value; useful where no slot outlives the reader.
    pub fn read_from(r: &mut NdrReader<'_>) -> msrpc_ndr::Result<Self> {
        r.read_align(4)?;
        let time_low = r.read_u32()?;
        let time_mid = r.read_u16()?;
        let time_hi_and_version = r.read_u16()?;
        let clock_seq_hi_and_reserved = r.read_u8()?;
        let clock_seq_low = r.read_u8()?;
        let mut node = [0u8; 6];
        node.copy_from_slice(&r.read_bytes(6)?);
        Ok(Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_hi_and_reserved,
            clock_seq_low,
            node,
        })
    }

    pub fn write_to(&self, w: &mut NdrWriter<'_>) {
        w.write_align(4);
        w.write_u32(self.time_low);
        w.write_u16(self.time_mid);
        w.write_u16(self.time_hi_and_version);
        w.write_u8(self.clock_seq_hi_and_reserved);
        w.write_u8(self.clock_seq_low);
        w.write_bytes(&self.node);
    }
}

impl NdrEncode for Uuid {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        self.write_to(w);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for Uuid {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        *self = Self::read_from(r)?;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        16
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.time_low,
            self.time_mid,
            self.time_hi_and_version,
            self.clock_seq_hi_and_reserved,
            self.clock_seq_low,
        )?;
        for byte in &self.node {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Uuid {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| RpcError::InvalidPduData(format!("invalid UUID: {}", s)))
    }
}

/// Syntax ID - interface UUID with version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyntaxId {
    pub uuid: Uuid,
    /// major in the lower 16 bits, minor in the upper 16 bits
    pub version: u32,
}

impl SyntaxId {
    pub const fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: (major as u32) | ((minor as u32) << 16),
        }
    }

    /// The NDR 2.0 transfer syntax
    pub const fn ndr20() -> Self {
        Self::new(NDR_SYNTAX_UUID, NDR_SYNTAX_VERSION, 0)
    }

    pub fn major_version(&self) -> u16 {
        self.version as u16
    }

    pub fn minor_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn read_from(r: &mut NdrReader<'_>) -> msrpc_ndr::Result<Self> {
        let uuid = Uuid::read_from(r)?;
        let version = r.read_u32()?;
        Ok(Self { uuid, version })
    }

    pub fn write_to(&self, w: &mut NdrWriter<'_>) {
        self.uuid.write_to(w);
        w.write_u32(self.version);
    }
}

impl fmt::Display for SyntaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{}",
            self.uuid,
            self.major_version(),
            self.minor_version()
        )
    }
}

/// Common PDU header (16 bytes)
#[derive(Debug, Clone)]
pub struct PduHeader {
    pub version: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRepresentation,
    /// Total length of the PDU fragment, header included
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: DCE_RPC_VERSION,
            version_minor: DCE_RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRepresentation::ndr(),
            frag_length: 0,
            auth_length: 0,
            call_id,
        }
    }

    pub fn ndr_context(&self) -> NdrContext {
        self.data_rep.ndr_context()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let ctx = self.ndr_context();
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.packet_flags.as_u8());
        buf.put_slice(&self.data_rep.encode());
        ctx.put_u16(buf, self.frag_length);
        ctx.put_u16(buf, self.auth_length);
        ctx.put_u32(buf, self.call_id);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("PDU header too short: {} bytes", data.len()),
            )));
        }

        let version = data[0];
        if version != DCE_RPC_VERSION {
            return Err(RpcError::RpcVersionMismatch(version));
        }

        let packet_type =
            PacketType::from_u8(data[2]).ok_or(RpcError::InvalidMessageType(data[2]))?;
        let data_rep = DataRepresentation::decode([data[4], data[5], data[6], data[7]]);
        let ctx = data_rep.ndr_context();
        let mut rest = &data[8..Self::SIZE];

        Ok(Self {
            version,
            version_minor: data[1],
            packet_type,
            packet_flags: PacketFlags::from_u8(data[3]),
            data_rep,
            frag_length: ctx.get_u16(&mut rest),
            auth_length: ctx.get_u16(&mut rest),
            call_id: ctx.get_u32(&mut rest),
        })
    }

    /// Reader over the body of the PDU this header was decoded from.
    fn body_reader(&self, data: &Bytes) -> Result<NdrReader<'static>> {
        if self.auth_length > 0 {
            return Err(RpcError::SecurityUnsupported(format!(
                "{:?} PDU carries a {} byte auth verifier",
                self.packet_type, self.auth_length
            )));
        }
        let end = (self.frag_length as usize).min(data.len()).max(Self::SIZE);
        Ok(NdrReader::new(data.slice(Self::SIZE..end), self.ndr_context()))
    }

    fn expect(&self, packet_type: PacketType) -> Result<()> {
        if self.packet_type != packet_type {
            return Err(RpcError::InvalidMessageType(self.packet_type as u8));
        }
        Ok(())
    }

    /// Prepend this header to an encoded body, fixing up `frag_length`.
    fn frame(&self, body: Bytes) -> Result<Bytes> {
        let size = Self::SIZE + body.len();
        let frag_length = u16::try_from(size).map_err(|_| RpcError::PduTooLarge {
            size,
            max: u16::MAX as usize,
        })?;
        let mut header = self.clone();
        header.frag_length = frag_length;
        header.auth_length = 0;

        let mut buf = BytesMut::with_capacity(size);
        header.encode(&mut buf);
        buf.extend_from_slice(&body);
        Ok(buf.freeze())
    }
}

/// Presentation context element of a bind or alter-context request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    /// Context offering NDR 2.0 as the only transfer syntax
    pub fn new(context_id: u16, abstract_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![SyntaxId::ndr20()],
        }
    }

    fn write_to(&self, w: &mut NdrWriter<'_>) -> Result<()> {
        let count = u8::try_from(self.transfer_syntaxes.len())
            .map_err(|_| RpcError::InvalidPduData("too many transfer syntaxes".to_string()))?;
        w.write_u16(self.context_id);
        w.write_u8(count);
        w.write_u8(0);
        self.abstract_syntax.write_to(w);
        for ts in &self.transfer_syntaxes {
            ts.write_to(w);
        }
        Ok(())
    }

    fn read_from(r: &mut NdrReader<'_>) -> Result<Self> {
        let context_id = r.read_u16()?;
        let count = r.read_u8()? as usize;
        let _reserved = r.read_u8()?;
        let abstract_syntax = SyntaxId::read_from(r)?;
        let count = r.check_count(count as u64, 20)?;
        let mut transfer_syntaxes = Vec::with_capacity(count);
        for _ in 0..count {
            transfer_syntaxes.push(SyntaxId::read_from(r)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Bind or alter-context request; both share one body layout.
#[derive(Debug, Clone)]
pub struct BindPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<ContextElement>,
}

impl BindPdu {
    pub fn new(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        Self {
            header: PduHeader::new(PacketType::Bind, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_list,
        }
    }

    pub fn alter_context(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        let mut pdu = Self::new(call_id, context_list);
        pdu.header.packet_type = PacketType::AlterContext;
        pdu
    }

    pub fn encode(&self) -> Result<Bytes> {
        let count = u8::try_from(self.context_list.len())
            .map_err(|_| RpcError::InvalidPduData("too many presentation contexts".to_string()))?;
        let mut w = NdrWriter::new(self.header.ndr_context());
        w.write_u16(self.max_xmit_frag);
        w.write_u16(self.max_recv_frag);
        w.write_u32(self.assoc_group_id);
        w.write_u8(count);
        w.write_u8(0);
        w.write_u16(0);
        for ctx in &self.context_list {
            ctx.write_to(&mut w)?;
        }
        self.header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        if !matches!(
            header.packet_type,
            PacketType::Bind | PacketType::AlterContext
        ) {
            return Err(RpcError::InvalidMessageType(header.packet_type as u8));
        }

        let mut r = header.body_reader(data)?;
        let max_xmit_frag = r.read_u16()?;
        let max_recv_frag = r.read_u16()?;
        let assoc_group_id = r.read_u32()?;
        let count = r.read_u8()? as usize;
        let _reserved = r.read_u8()?;
        let _reserved2 = r.read_u16()?;

        let count = r.check_count(count as u64, 44)?;
        let mut context_list = Vec::with_capacity(count);
        for _ in 0..count {
            context_list.push(ContextElement::read_from(&mut r)?);
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Per-context outcome in a bind or alter-context response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContextResult {
    Acceptance = 0,
    UserRejection = 1,
    ProviderRejection = 2,
}

/// Provider rejection reasons (C706 `p_provider_reason_t`)
pub mod provider_reason {
    pub const NOT_SPECIFIED: u16 = 0;
    pub const ABSTRACT_SYNTAX_NOT_SUPPORTED: u16 = 1;
    pub const PROPOSED_TRANSFER_SYNTAXES_NOT_SUPPORTED: u16 = 2;
    pub const LOCAL_LIMIT_EXCEEDED: u16 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResultEntry {
    pub result: ContextResult,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl ContextResultEntry {
    pub fn accepted() -> Self {
        Self {
            result: ContextResult::Acceptance,
            reason: provider_reason::NOT_SPECIFIED,
            transfer_syntax: SyntaxId::ndr20(),
        }
    }

    pub fn rejected(reason: u16) -> Self {
        Self {
            result: ContextResult::ProviderRejection,
            reason,
            transfer_syntax: SyntaxId::default(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == ContextResult::Acceptance
    }
}

/// Bind-ack or alter-context response; both share one body layout.
#[derive(Debug, Clone)]
pub struct BindAckPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResultEntry>,
}

impl BindAckPdu {
    pub fn new(call_id: u32, assoc_group_id: u32, results: Vec<ContextResultEntry>) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindAck, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id,
            secondary_addr: String::new(),
            results,
        }
    }

    pub fn alter_context_resp(
        call_id: u32,
        assoc_group_id: u32,
        results: Vec<ContextResultEntry>,
    ) -> Self {
        let mut pdu = Self::new(call_id, assoc_group_id, results);
        pdu.header.packet_type = PacketType::AlterContextResp;
        pdu
    }

    pub fn encode(&self) -> Result<Bytes> {
        let count = u8::try_from(self.results.len())
            .map_err(|_| RpcError::InvalidPduData("too many context results".to_string()))?;
        let addr = self.secondary_addr.as_bytes();
        let addr_len = u16::try_from(addr.len() + 1)
            .map_err(|_| RpcError::InvalidPduData("secondary address too long".to_string()))?;

        let mut w = NdrWriter::new(self.header.ndr_context());
        w.write_u16(self.max_xmit_frag);
        w.write_u16(self.max_recv_frag);
        w.write_u32(self.assoc_group_id);
        w.write_u16(addr_len);
        w.write_bytes(addr);
        w.write_u8(0);
        w.write_align(4);
        w.write_u8(count);
        w.write_u8(0);
        w.write_u16(0);
        for entry in &self.results {
            w.write_u16(entry.result as u16);
            w.write_u16(entry.reason);
            entry.transfer_syntax.write_to(&mut w);
        }
        self.header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        if !matches!(
            header.packet_type,
            PacketType::BindAck | PacketType::AlterContextResp
        ) {
            return Err(RpcError::InvalidMessageType(header.packet_type as u8));
        }

        let mut r = header.body_reader(data)?;
        let max_xmit_frag = r.read_u16()?;
        let max_recv_frag = r.read_u16()?;
        let assoc_group_id = r.read_u32()?;

        let addr_len = r.read_u16()? as usize;
        let mut addr = r.read_bytes(addr_len)?.to_vec();
        if addr.last() == Some(&0) {
            addr.pop();
        }
        let secondary_addr = String::from_utf8_lossy(&addr).into_owned();
        r.read_align(4)?;

        let count = r.read_u8()? as usize;
        let _reserved = r.read_u8()?;
        let _reserved2 = r.read_u16()?;

        let count = r.check_count(count as u64, 24)?;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let result = match r.read_u16()? {
                0 => ContextResult::Acceptance,
                1 => ContextResult::UserRejection,
                _ => ContextResult::ProviderRejection,
            };
            let reason = r.read_u16()?;
            let transfer_syntax = SyntaxId::read_from(&mut r)?;
            results.push(ContextResultEntry {
                result,
                reason,
                transfer_syntax,
            });
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Bind rejection
#[derive(Debug, Clone)]
pub struct BindNakPdu {
    pub header: PduHeader,
    pub reject_reason: u16,
}

impl BindNakPdu {
    /// `reject_reason` values from C706 12.6.4.4
    pub const REASON_NOT_SPECIFIED: u16 = 0;
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: u16 = 4;

    pub fn new(call_id: u32, reject_reason: u16) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindNak, call_id),
            reject_reason,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = NdrWriter::new(self.header.ndr_context());
        w.write_u16(self.reject_reason);
        // one supported protocol version: 5.0
        w.write_u8(1);
        w.write_u8(DCE_RPC_VERSION);
        w.write_u8(DCE_RPC_VERSION_MINOR);
        self.header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        header.expect(PacketType::BindNak)?;
        let mut r = header.body_reader(data)?;
        let reject_reason = r.read_u16()?;
        Ok(Self {
            header,
            reject_reason,
        })
    }
}

/// Request PDU
#[derive(Debug, Clone)]
pub struct RequestPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    /// Present when the `OBJECT_UUID` flag is set; DCOM carries the IPID here
    pub object_uuid: Option<Uuid>,
    pub stub_data: Bytes,
}

impl RequestPdu {
    /// alloc_hint(4) + context_id(2) + opnum(2)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, opnum: u16, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Request, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            opnum,
            object_uuid: None,
            stub_data,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut header = self.header.clone();
        let mut flags = PacketFlags::from_u8(header.packet_flags.as_u8() & !PacketFlags::OBJECT_UUID);
        if self.object_uuid.is_some() {
            flags = flags.with(PacketFlags::OBJECT_UUID);
        }
        header.packet_flags = flags;

        let mut w = NdrWriter::new(header.ndr_context());
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u16(self.opnum);
        if let Some(uuid) = &self.object_uuid {
            uuid.write_to(&mut w);
        }
        w.write_bytes(&self.stub_data);
        header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        header.expect(PacketType::Request)?;

        let mut r = header.body_reader(data)?;
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let opnum = r.read_u16()?;
        let object_uuid = if header.packet_flags.has_object_uuid() {
            Some(Uuid::read_from(&mut r)?)
        } else {
            None
        };
        let stub_data = r.read_bytes(r.remaining())?;

        Ok(Self {
            header,
            alloc_hint,
            context_id,
            opnum,
            object_uuid,
            stub_data,
        })
    }
}

/// Response PDU
#[derive(Debug, Clone)]
pub struct ResponsePdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub_data: Bytes,
}

impl ResponsePdu {
    /// alloc_hint(4) + context_id(2) + cancel_count(1) + reserved(1)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Response, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            cancel_count: 0,
            stub_data,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = NdrWriter::new(self.header.ndr_context());
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u8(self.cancel_count);
        w.write_u8(0);
        w.write_bytes(&self.stub_data);
        self.header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        header.expect(PacketType::Response)?;

        let mut r = header.body_reader(data)?;
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let cancel_count = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let stub_data = r.read_bytes(r.remaining())?;

        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            stub_data,
        })
    }
}

/// Fault status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultStatus {
    /// Opnum out of range for the interface
    OpRngError = 0x1c01_0002,
    /// Unknown interface (no such presentation context)
    UnkIf = 0x1c01_0003,
    /// Protocol error
    ProtoError = 0x1c01_000b,
    /// Context mismatch
    ContextMismatch = 0x1c00_001a,
    /// Unspecified rejection
    UnspecReject = 0x1c00_0009,
    /// Stub data could not be unmarshaled (`RPC_X_BAD_STUB_DATA`)
    BadStubData = 0x0000_06f7,
    /// Access denied
    AccessDenied = 0x0000_0005,
    /// Server ran out of memory
    RemoteNoMemory = 0x1c00_0022,
}

impl FaultStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x1c01_0002 => Some(Self::OpRngError),
            0x1c01_0003 => Some(Self::UnkIf),
            0x1c01_000b => Some(Self::ProtoError),
            0x1c00_001a => Some(Self::ContextMismatch),
            0x1c00_0009 => Some(Self::UnspecReject),
            0x0000_06f7 => Some(Self::BadStubData),
            0x0000_0005 => Some(Self::AccessDenied),
            0x1c00_0022 => Some(Self::RemoteNoMemory),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpRngError => "nca_s_op_rng_error",
            Self::UnkIf => "nca_s_unk_if",
            Self::ProtoError => "nca_s_proto_error",
            Self::ContextMismatch => "nca_s_fault_context_mismatch",
            Self::UnspecReject => "nca_s_fault_unspec",
            Self::BadStubData => "rpc_x_bad_stub_data",
            Self::AccessDenied => "access_denied",
            Self::RemoteNoMemory => "nca_s_fault_remote_no_memory",
        }
    }
}

/// Fault PDU
#[derive(Debug, Clone)]
pub struct FaultPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultPdu {
    pub fn new(call_id: u32, status: FaultStatus) -> Self {
        Self {
            header: PduHeader::new(PacketType::Fault, call_id),
            alloc_hint: 0,
            context_id: 0,
            cancel_count: 0,
            status: status as u32,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = NdrWriter::new(self.header.ndr_context());
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u8(self.cancel_count);
        w.write_u8(0);
        w.write_u32(self.status);
        w.write_u32(0);
        self.header.frame(w.finish()?)
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        header.expect(PacketType::Fault)?;

        let mut r = header.body_reader(data)?;
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let cancel_count = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let status = r.read_u32()?;

        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

/// Header-only PDU: CO_CANCEL, ORPHANED or SHUTDOWN
///
/// CO_CANCEL and ORPHANED come from the client and name the call being
/// abandoned. SHUTDOWN comes from the server and asks the client to close
/// the association.
#[derive(Debug, Clone)]
pub struct ControlPdu {
    pub header: PduHeader,
}

impl ControlPdu {
    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            header: PduHeader::new(packet_type, call_id),
        }
    }

    pub fn cancel(call_id: u32) -> Self {
        Self::new(PacketType::CoCancel, call_id)
    }

    pub fn orphaned(call_id: u32) -> Self {
        Self::new(PacketType::Orphaned, call_id)
    }

    pub fn shutdown() -> Self {
        Self::new(PacketType::Shutdown, 0)
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self.header.packet_type {
            PacketType::CoCancel | PacketType::Orphaned | PacketType::Shutdown => {
                self.header.frame(Bytes::new())
            }
            other => Err(RpcError::InvalidMessageType(other as u8)),
        }
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        match header.packet_type {
            PacketType::CoCancel | PacketType::Orphaned | PacketType::Shutdown => {}
            other => return Err(RpcError::InvalidMessageType(other as u8)),
        }
        if header.auth_length > 0 {
            return Err(RpcError::SecurityUnsupported(format!(
                "{:?} PDU carries a {} byte auth verifier",
                header.packet_type, header.auth_length
            )));
        }
        Ok(Self { header })
    }
}

#[derive(Debug, Clone)]
pub enum Pdu {
    Bind(BindPdu),
    BindAck(BindAckPdu),
    BindNak(BindNakPdu),
    AlterContext(BindPdu),
    AlterContextResp(BindAckPdu),
    Request(RequestPdu),
    Response(ResponsePdu),
    Fault(FaultPdu),
    CoCancel(ControlPdu),
    Orphaned(ControlPdu),
    Shutdown(ControlPdu),
}

impl Pdu {
    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        match header.packet_type {
            PacketType::Bind => Ok(Pdu::Bind(BindPdu::decode(data)?)),
            PacketType::AlterContext => Ok(Pdu::AlterContext(BindPdu::decode(data)?)),
            PacketType::BindAck => Ok(Pdu::BindAck(BindAckPdu::decode(data)?)),
            PacketType::AlterContextResp => Ok(Pdu::AlterContextResp(BindAckPdu::decode(data)?)),
            PacketType::BindNak => Ok(Pdu::BindNak(BindNakPdu::decode(data)?)),
            PacketType::Request => Ok(Pdu::Request(RequestPdu::decode(data)?)),
            PacketType::Response => Ok(Pdu::Response(ResponsePdu::decode(data)?)),
            PacketType::Fault => Ok(Pdu::Fault(FaultPdu::decode(data)?)),
            PacketType::CoCancel => Ok(Pdu::CoCancel(ControlPdu::decode(data)?)),
            PacketType::Orphaned => Ok(Pdu::Orphaned(ControlPdu::decode(data)?)),
            PacketType::Shutdown => Ok(Pdu::Shutdown(ControlPdu::decode(data)?)),
            other => Err(RpcError::InvalidMessageType(other as u8)),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => pdu.encode(),
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => pdu.encode(),
            Pdu::BindNak(pdu) => pdu.encode(),
            Pdu::Request(pdu) => pdu.encode(),
            Pdu::Response(pdu) => pdu.encode(),
            Pdu::Fault(pdu) => pdu.encode(),
            Pdu::CoCancel(pdu) | Pdu::Orphaned(pdu) | Pdu::Shutdown(pdu) => pdu.encode(),
        }
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => &pdu.header,
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => &pdu.header,
            Pdu::BindNak(pdu) => &pdu.header,
            Pdu::Request(pdu) => &pdu.header,
            Pdu::Response(pdu) => &pdu.header,
            Pdu::Fault(pdu) => &pdu.header,
            Pdu::CoCancel(pdu) | Pdu::Orphaned(pdu) | Pdu::Shutdown(pdu) => &pdu.header,
        }
    }

    pub fn call_id(&self) -> u32 {
        self.header().call_id
    }
}
