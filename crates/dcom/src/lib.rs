//! DCOM object addressing on top of DCE/RPC
//!
//! Every DCOM call is an ordinary DCE/RPC call with two additions: an ORPC
//! envelope around the parameters, and the target interface pointer's IPID
//! in the request's object UUID.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Interface clients (UnknownClient, ...)                  │
//! ├──────────────────────────────────────────────────────────┤
//! │  ObjectClient: Conn + IPID     │  OrpcCall: ORPCTHIS /   │
//! │  (MissingIpid before any I/O)  │  ORPCTHAT envelope      │
//! ├──────────────────────────────────────────────────────────┤
//! │                 DCE/RPC layer (msrpc-dcerpc)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! On the server side, [`serve_orpc`] strips the envelope and hands the
//! addressed IPID to the method, and [`unknown_server_handle`] is the base
//! opnum table every derived interface extends.
//!
//! # Modules
//!
//! - [`types`]: IPID, ORPC envelopes and extensions, interface pointers
//! - [`call`]: the envelope wrapper and server-side helper
//! - [`client`]: IPID-addressed object clients
//! - [`iunknown`]: the IUnknown interface

pub mod call;
pub mod client;
pub mod iunknown;
pub mod types;

pub use call::{serve_orpc, IpidOptions, OrpcCall};
pub use client::ObjectClient;
pub use iunknown::{
    unknown_server_handle, UnknownClient, UnknownServer, UNKNOWN_OPNUM_COUNT, UNKNOWN_SYNTAX_V0_0,
};
pub use types::{
    generate_uuid, ComVersion, DcomError, InterfacePointer, Ipid, OrpcExtent, OrpcExtentArray,
    OrpcThat, OrpcThis, Result,
};

/// DCOM version this implementation speaks
pub const DCOM_VERSION: ComVersion = ComVersion::DCOM_5_7;
