//! The per-method call contract
//!
//! Every remote method is an [`Operation`]: an opnum, a name, and four codec
//! entry points. Request and response values never touch the codec; they
//! convert to and from their operation through [`Request`] and [`Response`].
//!
//! The free functions in this module run one marshal or unmarshal pass with
//! a writer or reader created for that pass alone, so referent state never
//! outlives a single call.

use crate::error::Result;
use crate::pdu::{SyntaxId, Uuid};
use crate::security::{AuthLevel, SecurityContext};
use bytes::Bytes;
use msrpc_ndr::{NdrContext, NdrReader, NdrWriter};
use std::time::Duration;
use tracing::trace;

/// One invocation of a remote method.
///
/// `marshal_*` see the operation after its prepare step has run, so counts
/// derived from payload lengths are already in place.
pub trait Operation: Send {
    fn opnum(&self) -> u16;

    fn opname(&self) -> &'static str;

    fn marshal_request<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()>;

    fn unmarshal_request<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()>;

    fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()>;

    fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()>;

    /// Derive transmitted counts from the request payload.
    fn prepare_request(&mut self) -> Result<()> {
        Ok(())
    }

    /// Derive transmitted counts from the response payload.
    fn prepare_response(&mut self) -> Result<()> {
        Ok(())
    }

    /// Optional hooks run after the prepare step.
    fn payload_hooks(&mut self) -> Option<&mut dyn PreparePayload> {
        None
    }
}

/// Adjustments an operation makes after its counts are derived
pub trait PreparePayload {
    fn after_prepare_request_payload(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_prepare_response_payload(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Caller-facing request value of one method
pub trait Request: Send + Sized {
    type Operation: Operation + Default;

    /// Client side: build the operation to send.
    fn into_operation(self) -> Self::Operation;

    /// Server side: take the decoded request fields out of `op`.
    fn from_operation(op: &mut Self::Operation) -> Self;
}

/// Caller-facing response value of one method
pub trait Response: Send + Sized {
    type Operation: Operation + Default;

    /// Client side: take the decoded response fields out of `op`.
    fn from_operation(op: &mut Self::Operation) -> Self;

    /// Server side: store the response fields into `op`.
    fn into_operation(self, op: &mut Self::Operation);

    /// HRESULT-shaped return value, for methods that have one
    fn return_code(&self) -> Option<i32> {
        None
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Object UUID sent with the request; DCOM puts the IPID here
    pub object: Option<Uuid>,
    /// Presentation context to use instead of the connection's own
    pub abstract_syntax: Option<SyntaxId>,
    pub timeout: Option<Duration>,
    pub security: SecurityContext,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, object: Uuid) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_abstract_syntax(mut self, syntax: SyntaxId) -> Self {
        self.abstract_syntax = Some(syntax);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }

    pub fn with_auth_level(mut self, auth_level: AuthLevel) -> Self {
        self.security.auth_level = auth_level;
        self
    }

    /// Checks that need no I/O.
    pub fn validate(&self) -> Result<()> {
        self.security.ensure_supported()
    }
}

/// Stub data of a received request, with its byte order and object UUID
#[derive(Debug, Clone)]
pub struct StubData {
    pub data: Bytes,
    pub ctx: NdrContext,
    pub object: Option<Uuid>,
}

impl StubData {
    pub fn new(data: Bytes, ctx: NdrContext) -> Self {
        Self {
            data,
            ctx,
            object: None,
        }
    }

    /// Decode the request fields of `op`.
    pub fn unmarshal_request(&self, op: &mut dyn Operation) -> Result<()> {
        unmarshal_request(op, self.data.clone(), self.ctx)
    }
}

fn run_hooks(op: &mut dyn Operation, request: bool) -> Result<()> {
    if let Some(hooks) = op.payload_hooks() {
        if request {
            hooks.after_prepare_request_payload()?;
        } else {
            hooks.after_prepare_response_payload()?;
        }
    }
    Ok(())
}

/// Prepare and encode the request side of `op`.
pub fn marshal_request(op: &mut dyn Operation, ctx: NdrContext) -> Result<Bytes> {
    op.prepare_request()?;
    run_hooks(op, true)?;
    let mut w = NdrWriter::new(ctx);
    op.marshal_request(&mut w)?;
    let stub = w.finish()?;
    trace!(opname = op.opname(), len = stub.len(), "marshaled request");
    Ok(stub)
}

/// Prepare and encode the response side of `op`.
pub fn marshal_response(op: &mut dyn Operation, ctx: NdrContext) -> Result<Bytes> {
    op.prepare_response()?;
    run_hooks(op, false)?;
    let mut w = NdrWriter::new(ctx);
    op.marshal_response(&mut w)?;
    let stub = w.finish()?;
    trace!(opname = op.opname(), len = stub.len(), "marshaled response");
    Ok(stub)
}

pub fn unmarshal_request(op: &mut dyn Operation, stub: Bytes, ctx: NdrContext) -> Result<()> {
    let mut r = NdrReader::new(stub, ctx);
    op.unmarshal_request(&mut r)?;
    r.finish()?;
    Ok(())
}

pub fn unmarshal_response(op: &mut dyn Operation, stub: Bytes, ctx: NdrContext) -> Result<()> {
    let mut r = NdrReader::new(stub, ctx);
    op.unmarshal_response(&mut r)?;
    r.finish()?;
    Ok(())
}
