//! DCOM error types

use msrpc_dcerpc::RpcError;
use thiserror::Error;

/// Result type for DCOM operations
pub type Result<T> = std::result::Result<T, DcomError>;

/// DCOM-specific errors
#[derive(Error, Debug)]
pub enum DcomError {
    /// Underlying DCE RPC error
    #[error("DCE RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// A call had no IPID to address; raised before anything is sent
    #[error("{operation}: ipid is missing")]
    MissingIpid { operation: &'static str },
}

impl DcomError {
    /// The remote HRESULT, if the call reached the server and failed there
    pub fn hresult(&self) -> Option<i32> {
        match self {
            DcomError::Rpc(RpcError::Remote(e)) => Some(e.code),
            _ => None,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, DcomError::Rpc(e) if e.is_not_implemented())
    }
}
