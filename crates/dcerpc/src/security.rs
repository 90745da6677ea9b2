//! Security settings carried by call options
//!
//! Authentication is not negotiated by this crate. A call asking for any
//! level above [`AuthLevel::None`] is refused before it reaches the
//! transport.

use crate::error::{Result, RpcError};

/// Authentication level (MS-RPCE 2.2.1.1.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AuthLevel {
    #[default]
    None = 1,
    Connect = 2,
    Call = 3,
    Pkt = 4,
    PktIntegrity = 5,
    PktPrivacy = 6,
}

impl AuthLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::Connect),
            3 => Some(Self::Call),
            4 => Some(Self::Pkt),
            5 => Some(Self::PktIntegrity),
            6 => Some(Self::PktPrivacy),
            _ => None,
        }
    }

    pub fn requires_signing(&self) -> bool {
        matches!(self, Self::PktIntegrity | Self::PktPrivacy)
    }

    pub fn requires_encryption(&self) -> bool {
        matches!(self, Self::PktPrivacy)
    }
}

/// Per-call security request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub auth_level: AuthLevel,
    /// Service principal name the caller expects
    pub principal: Option<String>,
}

impl SecurityContext {
    pub fn new(auth_level: AuthLevel) -> Self {
        Self {
            auth_level,
            principal: None,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Fail unless the call can go out unauthenticated.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.auth_level == AuthLevel::None {
            return Ok(());
        }
        Err(RpcError::SecurityUnsupported(format!(
            "authentication level {:?} requested",
            self.auth_level
        )))
    }
}
