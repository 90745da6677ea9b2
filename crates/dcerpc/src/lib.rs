//! DCE/RPC connection, call pipeline and server dispatch
//!
//! This crate carries NDR-encoded operations between a client [`Conn`] and a
//! [`DceRpcServer`] over connection-oriented DCE/RPC (MS-RPCE).
//!
//! # Layers
//!
//! - [`pdu`]: connection-oriented PDUs (bind, alter context, request,
//!   response, fault)
//! - [`operation`]: the [`Operation`] contract every remote method implements,
//!   and the [`Request`]/[`Response`] adapters callers use instead
//! - [`conn`]: presentation-context negotiation, sub-connections, and
//!   concurrent calls over one transport
//! - [`dispatch`] and [`server`]: opnum routing with interface inheritance
//! - [`hresult`]: the process-wide HRESULT table used to report method
//!   return codes
//!
//! # Example
//!
//! ```no_run
//! use msrpc_dcerpc::{CallOptions, Conn, ConnConfig, SyntaxId, Uuid};
//!
//! # async fn run(op: &mut dyn msrpc_dcerpc::Operation) -> msrpc_dcerpc::Result<()> {
//! let syntax = SyntaxId::new(
//!     Uuid::parse("12345678-1234-1234-1234-123456789012").unwrap(),
//!     1,
//!     0,
//! );
//! let mut conn = Conn::connect("127.0.0.1:12345".parse().unwrap(), ConnConfig::default()).await?;
//! conn.bind(&[syntax]).await?;
//! conn.invoke(op, &CallOptions::new()).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod conn;
pub mod dispatch;
pub mod error;
pub mod fragmentation;
pub mod hresult;
pub mod operation;
pub mod pdu;
pub mod security;
pub mod server;
pub mod transport;

pub use error::{Result, RpcError};

pub use conn::{Conn, ConnConfig, DEFAULT_CALL_TIMEOUT};
pub use dispatch::{serve, OpnumTable, ServerHandle};
pub use fragmentation::{FragmentAssembler, FragmentGenerator};
pub use hresult::{check_return, HResult, HResultError, HResultInfo};
pub use operation::{
    marshal_request, marshal_response, unmarshal_request, unmarshal_response, CallOptions,
    Operation, PreparePayload, Request, Response, StubData,
};
pub use pdu::{
    BindAckPdu, BindNakPdu, BindPdu, CharRep, ContextElement, ContextResult, ContextResultEntry,
    ControlPdu,
    DataRepresentation, FaultPdu, FaultStatus, FloatRep, IntRep, PacketFlags, PacketType, Pdu,
    PduHeader, RequestPdu, ResponsePdu, SyntaxId, Uuid, DCE_RPC_VERSION, DCE_RPC_VERSION_MINOR,
    DEFAULT_MAX_FRAG, NDR_SYNTAX_UUID, NDR_SYNTAX_VERSION,
};
pub use security::{AuthLevel, SecurityContext};
pub use server::{
    DceRpcServer, DceRpcServerConfig, ServerStats, ServerStatsSnapshot, DEFAULT_MAX_PARTIAL_CALLS,
};
pub use transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};

pub use msrpc_ndr as ndr;
