//! ORPC calls
//!
//! [`OrpcCall`] wraps a method's [`Operation`] so the ORPC envelope travels
//! with every call: ORPCTHIS ahead of the request parameters, ORPCTHAT ahead
//! of the response parameters. Method operations never see the envelope.

use crate::types::{Ipid, OrpcThat, OrpcThis};
use msrpc_dcerpc::{
    CallOptions, Operation, PreparePayload, Request, Response, RpcError, StubData,
};
use msrpc_ndr::{NdrReader, NdrWriter};
use std::future::Future;
use tracing::trace;

/// A method operation inside its ORPC envelope
#[derive(Debug, Default)]
pub struct OrpcCall<O> {
    pub this: OrpcThis,
    pub that: OrpcThat,
    pub inner: O,
}

impl<O> OrpcCall<O> {
    /// Wrap `inner` with a fresh causality id.
    pub fn new(inner: O) -> Self {
        Self {
            this: OrpcThis::new(),
            that: OrpcThat::new(),
            inner,
        }
    }

    pub fn with_this(mut self, this: OrpcThis) -> Self {
        self.this = this;
        self
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Operation> Operation for OrpcCall<O> {
    fn opnum(&self) -> u16 {
        self.inner.opnum()
    }

    fn opname(&self) -> &'static str {
        self.inner.opname()
    }

    fn marshal_request<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write(&self.this)?;
        w.write_deferred()?;
        self.inner.marshal_request(w)
    }

    fn unmarshal_request<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read(&mut self.this)?;
        r.read_deferred()?;
        self.inner.unmarshal_request(r)
    }

    fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write(&self.that)?;
        w.write_deferred()?;
        self.inner.marshal_response(w)
    }

    fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read(&mut self.that)?;
        r.read_deferred()?;
        self.inner.unmarshal_response(r)
    }

    fn prepare_request(&mut self) -> msrpc_dcerpc::Result<()> {
        self.inner.prepare_request()
    }

    fn prepare_response(&mut self) -> msrpc_dcerpc::Result<()> {
        self.inner.prepare_response()
    }

    fn payload_hooks(&mut self) -> Option<&mut dyn PreparePayload> {
        self.inner.payload_hooks()
    }
}

/// IPID accessors for [`CallOptions`]
///
/// The IPID rides in the request PDU's object UUID.
pub trait IpidOptions {
    fn with_ipid(self, ipid: Ipid) -> Self;

    fn ipid(&self) -> Option<Ipid>;

    fn has_ipid(&self) -> bool {
        self.ipid().is_some()
    }
}

impl IpidOptions for CallOptions {
    fn with_ipid(self, ipid: Ipid) -> Self {
        self.with_object(ipid.0)
    }

    fn ipid(&self) -> Option<Ipid> {
        self.object.map(Ipid)
    }
}

/// Run one ORPC method on the server side.
///
/// Like [`msrpc_dcerpc::serve`], with the envelope stripped from the request
/// and an empty ORPCTHAT put in front of the response. `handler` receives
/// the IPID the call addressed.
pub async fn serve_orpc<Req, Resp, F, Fut>(
    stub: StubData,
    handler: F,
) -> msrpc_dcerpc::Result<Box<dyn Operation>>
where
    Req: Request,
    Req::Operation: 'static,
    Resp: Response<Operation = Req::Operation>,
    F: FnOnce(Ipid, Req) -> Fut,
    Fut: Future<Output = msrpc_dcerpc::Result<Resp>>,
{
    let ipid = stub
        .object
        .map(Ipid)
        .ok_or_else(|| RpcError::InvalidPduData("ORPC request without an IPID".to_string()))?;
    let mut call = OrpcCall::<Req::Operation>::default();
    stub.unmarshal_request(&mut call)?;
    trace!(
        %ipid,
        causality = %call.this.causality_id,
        opname = call.opname(),
        "serving ORPC call"
    );

    let request = Req::from_operation(&mut call.inner);
    let response = handler(ipid, request).await?;
    response.into_operation(&mut call.inner);
    call.that = OrpcThat::new();
    Ok(Box::new(call))
}
