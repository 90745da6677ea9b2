//! HRESULT codes and the process-wide code registry
//!
//! Methods return an HRESULT-shaped `i32`. Zero is success; every other
//! value is a failure. The registry only decides how a failure is
//! described, never whether it is one.

use crate::error::RpcError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Well-known codes
pub mod codes {
    pub const S_OK: i32 = 0;
    pub const S_FALSE: i32 = 1;
    pub const E_NOTIMPL: i32 = 0x8000_4001_u32 as i32;
    pub const E_NOINTERFACE: i32 = 0x8000_4002_u32 as i32;
    pub const E_POINTER: i32 = 0x8000_4003_u32 as i32;
    pub const E_ABORT: i32 = 0x8000_4004_u32 as i32;
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    pub const E_UNEXPECTED: i32 = 0x8000_ffff_u32 as i32;
    pub const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
    pub const E_HANDLE: i32 = 0x8007_0006_u32 as i32;
    pub const E_OUTOFMEMORY: i32 = 0x8007_000e_u32 as i32;
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    pub const E_INSUFFICIENT_BUFFER: i32 = 0x8007_007a_u32 as i32;
    pub const REGDB_E_CLASSNOTREG: i32 = 0x8004_0154_u32 as i32;
    pub const CO_E_OBJNOTCONNECTED: i32 = 0x8004_01fd_u32 as i32;
    pub const RPC_E_DISCONNECTED: i32 = 0x8001_0108_u32 as i32;
    pub const RPC_E_SERVER_DIED: i32 = 0x8001_0007_u32 as i32;
    pub const RPC_E_INVALID_IPID: i32 = 0x8001_0113_u32 as i32;
    pub const RPC_E_TOO_LATE: i32 = 0x8001_0119_u32 as i32;
    pub const RPC_E_VERSION_MISMATCH: i32 = 0x8001_0110_u32 as i32;
}

/// A method's HRESULT return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    /// HRESULT wrapping a Win32 error code (FACILITY_WIN32)
    pub fn from_win32(code: u32) -> Self {
        if code == 0 {
            return Self(codes::S_OK);
        }
        Self(((code & 0xffff) | 0x8007_0000) as i32)
    }

    pub fn is_success(&self) -> bool {
        self.0 == codes::S_OK
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn info(&self) -> Option<HResultInfo> {
        lookup(self.0)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info() {
            Some(info) => write!(f, "{} (0x{:08x})", info.name, self.0 as u32),
            None => write!(f, "0x{:08x}", self.0 as u32),
        }
    }
}

impl From<i32> for HResult {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HResultInfo {
    pub name: String,
    pub description: String,
}

/// Nonzero return code of a remote method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HResultError {
    pub operation: String,
    pub code: i32,
    pub info: Option<HResultInfo>,
}

impl HResultError {
    pub fn new(operation: impl Into<String>, code: i32) -> Self {
        Self {
            operation: operation.into(),
            code,
            info: lookup(code),
        }
    }

    pub fn hresult(&self) -> HResult {
        HResult(self.code)
    }
}

impl fmt::Display for HResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) => write!(
                f,
                "{}: {} (0x{:08x}): {}",
                self.operation, info.name, self.code as u32, info.description
            ),
            None => write!(
                f,
                "{}: RPC failed with code 0x{:08x}",
                self.operation, self.code as u32
            ),
        }
    }
}

impl std::error::Error for HResultError {}

type Registry = RwLock<HashMap<i32, HResultInfo>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let builtin: &[(i32, &str, &str)] = &[
            (codes::S_FALSE, "S_FALSE", "Operation successful but returned false"),
            (codes::E_NOTIMPL, "E_NOTIMPL", "Not implemented"),
            (codes::E_NOINTERFACE, "E_NOINTERFACE", "No such interface supported"),
            (codes::E_POINTER, "E_POINTER", "Invalid pointer"),
            (codes::E_ABORT, "E_ABORT", "Operation aborted"),
            (codes::E_FAIL, "E_FAIL", "Unspecified error"),
            (codes::E_UNEXPECTED, "E_UNEXPECTED", "Catastrophic failure"),
            (codes::E_ACCESSDENIED, "E_ACCESSDENIED", "General access denied error"),
            (codes::E_HANDLE, "E_HANDLE", "Invalid handle"),
            (codes::E_OUTOFMEMORY, "E_OUTOFMEMORY", "Out of memory"),
            (codes::E_INVALIDARG, "E_INVALIDARG", "One or more arguments are invalid"),
            (
                codes::E_INSUFFICIENT_BUFFER,
                "E_INSUFFICIENT_BUFFER",
                "The data area passed to a system call is too small",
            ),
            (codes::REGDB_E_CLASSNOTREG, "REGDB_E_CLASSNOTREG", "Class not registered"),
            (
                codes::CO_E_OBJNOTCONNECTED,
                "CO_E_OBJNOTCONNECTED",
                "Object is not connected to server",
            ),
            (
                codes::RPC_E_DISCONNECTED,
                "RPC_E_DISCONNECTED",
                "The object invoked has disconnected from its clients",
            ),
            (
                codes::RPC_E_SERVER_DIED,
                "RPC_E_SERVER_DIED",
                "The server died before the call completed",
            ),
            (
                codes::RPC_E_INVALID_IPID,
                "RPC_E_INVALID_IPID",
                "The requested object does not exist",
            ),
            (codes::RPC_E_TOO_LATE, "RPC_E_TOO_LATE", "Security must be initialized earlier"),
            (
                codes::RPC_E_VERSION_MISMATCH,
                "RPC_E_VERSION_MISMATCH",
                "The version of OLE on the client and server machines does not match",
            ),
        ];
        let table = builtin
            .iter()
            .map(|(code, name, description)| {
                (
                    *code,
                    HResultInfo {
                        name: name.to_string(),
                        description: description.to_string(),
                    },
                )
            })
            .collect();
        RwLock::new(table)
    })
}

/// Add or replace a code's description.
pub fn register(code: i32, name: impl Into<String>, description: impl Into<String>) {
    registry().write().insert(
        code,
        HResultInfo {
            name: name.into(),
            description: description.into(),
        },
    );
}

pub fn lookup(code: i32) -> Option<HResultInfo> {
    registry().read().get(&code).cloned()
}

/// Map a method's `Return` value: zero succeeds, anything else is an error.
pub fn check_return(operation: &str, code: i32) -> Result<(), RpcError> {
    if code == codes::S_OK {
        return Ok(());
    }
    Err(RpcError::Remote(HResultError::new(operation, code)))
}
