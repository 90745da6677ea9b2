//! DCOM identifiers (MS-DCOM 2.2.1)

use msrpc_dcerpc::Uuid;
use msrpc_ndr::{NdrDecode, NdrEncode, NdrReader, NdrWriter};
use std::fmt;
use std::str::FromStr;

/// Random UUID in wire layout, used for causality ids and fresh IPIDs.
pub fn generate_uuid() -> Uuid {
    Uuid::from_bytes_le(uuid::Uuid::new_v4().to_bytes_le())
}

/// Interface Pointer Identifier
///
/// Names one interface on one remote object. Every ORPC request carries the
/// target IPID as the object UUID of its request PDU; two clients for
/// different interfaces of the same object share a connection and differ
/// only in their IPID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Ipid(pub Uuid);

impl Ipid {
    pub const SIZE: usize = 16;

    pub const NIL: Self = Self(Uuid::NIL);

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random IPID
    pub fn generate() -> Self {
        Self(generate_uuid())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Ipid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Ipid> for Uuid {
    fn from(ipid: Ipid) -> Self {
        ipid.0
    }
}

impl FromStr for Ipid {
    type Err = <Uuid as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl NdrEncode for Ipid {
    fn encode_ndr<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        self.0.write_to(w);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for Ipid {
    fn decode_ndr<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        self.0 = Uuid::read_from(r)?;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }

    fn ndr_min_size() -> usize {
        Self::SIZE
    }
}

impl fmt::Debug for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPID({})", self.0)
    }
}

impl fmt::Display for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
