//! Error types for DCE RPC

use crate::hresult::HResultError;
use crate::pdu::{FaultStatus, SyntaxId};
use msrpc_ndr::NdrError;
use thiserror::Error;

/// RPC error types
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NDR error: {0}")]
    Ndr(#[from] NdrError),

    #[error("RPC version mismatch: {0}")]
    RpcVersionMismatch(u8),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("invalid PDU: {0}")]
    InvalidPduData(String),

    #[error("unexpected {got} PDU while waiting for {expected}")]
    UnexpectedPdu {
        expected: &'static str,
        got: String,
    },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("bind rejected: reason {0}")]
    BindRejected(u16),

    #[error("connection is not bound")]
    NotBound,

    #[error("presentation context not negotiated: {0}")]
    ContextNotNegotiated(SyntaxId),

    #[error("fault: status 0x{0:08x}")]
    Fault(u32),

    #[error("context mismatch")]
    ContextMismatch,

    #[error("call ID mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("fragment received out of order")]
    FragmentOutOfOrder,

    #[error("fragment assembly failed: {0}")]
    FragmentAssemblyError(String),

    #[error("PDU too large: {size} bytes exceeds maximum {max}")]
    PduTooLarge { size: usize, max: usize },

    /// Returned by handlers for methods the server does not provide.
    #[error("operation not implemented")]
    NotImplemented,

    #[error("operation unavailable: opnum {0}")]
    OperationUnavailable(u16),

    #[error("security not supported: {0}")]
    SecurityUnsupported(String),

    #[error(transparent)]
    Remote(#[from] HResultError),

    #[error("task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl RpcError {
    /// Fault status a server reports for this error.
    pub fn fault_status(&self) -> FaultStatus {
        match self {
            RpcError::NotImplemented | RpcError::OperationUnavailable(_) => {
                FaultStatus::OpRngError
            }
            RpcError::ContextNotNegotiated(_) => FaultStatus::UnkIf,
            RpcError::Ndr(_) => FaultStatus::BadStubData,
            RpcError::ContextMismatch => FaultStatus::ContextMismatch,
            RpcError::FragmentOutOfOrder
            | RpcError::FragmentAssemblyError(_)
            | RpcError::CallIdMismatch { .. } => FaultStatus::ProtoError,
            _ => FaultStatus::UnspecReject,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, RpcError::NotImplemented | RpcError::OperationUnavailable(_))
            || matches!(self, RpcError::Fault(status) if *status == FaultStatus::OpRngError as u32)
    }

    /// Errors after which the connection cannot carry further calls
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::ConnectionClosed | RpcError::RpcVersionMismatch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
