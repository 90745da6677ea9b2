//! IUnknown (MS-DCOM 3.1.1.5.8)
//!
//! The root of every COM interface: QueryInterface, AddRef and Release at
//! opnums 0 to 2. Derived interfaces number their own methods from
//! [`UNKNOWN_OPNUM_COUNT`] and serve IUnknown's range by extending
//! [`unknown_server_handle`].

use crate::call::serve_orpc;
use crate::client::ObjectClient;
use crate::types::{InterfacePointer, Ipid, Result};
use async_trait::async_trait;
use msrpc_dcerpc::{
    CallOptions, Conn, OpnumTable, Operation, Request, Response, RpcError, ServerHandle,
    StubData, SyntaxId, Uuid,
};
use msrpc_ndr::{NdrReader, NdrWriter};
use std::sync::Arc;

/// IUnknown interface UUID, 00000000-0000-0000-c000-000000000046
pub const UNKNOWN_UUID: Uuid = Uuid {
    time_low: 0,
    time_mid: 0,
    time_hi_and_version: 0,
    clock_seq_hi_and_reserved: 0xc0,
    clock_seq_low: 0,
    node: [0, 0, 0, 0, 0, 0x46],
};

pub const UNKNOWN_SYNTAX_V0_0: SyntaxId = SyntaxId::new(UNKNOWN_UUID, 0, 0);

/// Methods IUnknown contributes to every derived interface
pub const UNKNOWN_OPNUM_COUNT: u16 = 3;

pub mod opnum {
    pub const QUERY_INTERFACE: u16 = 0;
    pub const ADD_REF: u16 = 1;
    pub const RELEASE: u16 = 2;
}

/// `HRESULT QueryInterface([in] REFIID riid, [out, iid_is(riid)] void** ppvObject)`
#[derive(Debug, Default)]
pub struct QueryInterfaceOperation {
    pub iid: Uuid,
    pub object: Option<InterfacePointer>,
    pub return_code: i32,
}

impl Operation for QueryInterfaceOperation {
    fn opnum(&self) -> u16 {
        opnum::QUERY_INTERFACE
    }

    fn opname(&self) -> &'static str {
        "/IUnknown/v0/QueryInterface"
    }

    fn marshal_request<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write(&self.iid)
    }

    fn unmarshal_request<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read(&mut self.iid)
    }

    fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_unique(self.object.as_ref())?;
        w.write_deferred()?;
        w.write_i32(self.return_code);
        Ok(())
    }

    fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_unique(&mut self.object)?;
        r.read_deferred()?;
        self.return_code = r.read_i32()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInterfaceRequest {
    pub iid: Uuid,
}

impl Request for QueryInterfaceRequest {
    type Operation = QueryInterfaceOperation;

    fn into_operation(self) -> QueryInterfaceOperation {
        QueryInterfaceOperation {
            iid: self.iid,
            ..Default::default()
        }
    }

    fn from_operation(op: &mut QueryInterfaceOperation) -> Self {
        Self { iid: op.iid }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInterfaceResponse {
    pub object: Option<InterfacePointer>,
    pub return_code: i32,
}

impl Response for QueryInterfaceResponse {
    type Operation = QueryInterfaceOperation;

    fn from_operation(op: &mut QueryInterfaceOperation) -> Self {
        Self {
            object: op.object.take(),
            return_code: op.return_code,
        }
    }

    fn into_operation(self, op: &mut QueryInterfaceOperation) {
        op.object = self.object;
        op.return_code = self.return_code;
    }

    fn return_code(&self) -> Option<i32> {
        Some(self.return_code)
    }
}

/// Reference count methods: no parameters, the new count as `ULONG`
macro_rules! ref_count_method {
    ($op:ident, $request:ident, $response:ident, $opnum:expr, $opname:literal) => {
        #[derive(Debug, Default)]
        pub struct $op {
            pub ref_count: u32,
        }

        impl Operation for $op {
            fn opnum(&self) -> u16 {
                $opnum
            }

            fn opname(&self) -> &'static str {
                $opname
            }

            fn marshal_request<'a>(&'a self, _w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
                Ok(())
            }

            fn unmarshal_request<'a>(&'a mut self, _r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
                Ok(())
            }

            fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
                w.write_u32(self.ref_count);
                Ok(())
            }

            fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
                self.ref_count = r.read_u32()?;
                Ok(())
            }
        }

        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $request;

        impl Request for $request {
            type Operation = $op;

            fn into_operation(self) -> $op {
                $op::default()
            }

            fn from_operation(_op: &mut $op) -> Self {
                Self
            }
        }

        /// The count is informational, never an HRESULT.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $response {
            pub ref_count: u32,
        }

        impl Response for $response {
            type Operation = $op;

            fn from_operation(op: &mut $op) -> Self {
                Self {
                    ref_count: op.ref_count,
                }
            }

            fn into_operation(self, op: &mut $op) {
                op.ref_count = self.ref_count;
            }
        }
    };
}

ref_count_method!(
    AddRefOperation,
    AddRefRequest,
    AddRefResponse,
    opnum::ADD_REF,
    "/IUnknown/v0/AddRef"
);

ref_count_method!(
    ReleaseOperation,
    ReleaseRequest,
    ReleaseResponse,
    opnum::RELEASE,
    "/IUnknown/v0/Release"
);

/// IUnknown client
#[derive(Clone, Debug)]
pub struct UnknownClient {
    object: ObjectClient,
}

impl UnknownClient {
    /// Bind IUnknown on `conn`, or take a sub-connection if it is bound.
    pub async fn new(conn: &Conn, ipid: Option<Ipid>) -> Result<Self> {
        let object = ObjectClient::bind(conn, UNKNOWN_SYNTAX_V0_0, ipid).await?;
        Ok(Self { object })
    }

    /// IUnknown view of an existing object client, for derived interfaces.
    pub fn from_object(object: ObjectClient) -> Self {
        Self { object }
    }

    pub fn object(&self) -> &ObjectClient {
        &self.object
    }

    pub fn conn(&self) -> &Conn {
        self.object.conn()
    }

    /// Same connection, another interface pointer
    pub fn with_ipid(&self, ipid: Ipid) -> Self {
        Self {
            object: self.object.with_ipid(ipid),
        }
    }

    pub async fn alter_context(&self, syntaxes: &[SyntaxId]) -> Result<()> {
        self.object.alter_context(syntaxes).await
    }

    pub async fn query_interface(
        &self,
        request: QueryInterfaceRequest,
        opts: &CallOptions,
    ) -> Result<QueryInterfaceResponse> {
        self.object.call(request, opts).await
    }

    pub async fn add_ref(&self, request: AddRefRequest, opts: &CallOptions) -> Result<AddRefResponse> {
        self.object.call(request, opts).await
    }

    pub async fn release(
        &self,
        request: ReleaseRequest,
        opts: &CallOptions,
    ) -> Result<ReleaseResponse> {
        self.object.call(request, opts).await
    }
}

/// Server-side IUnknown.
///
/// Every method defaults to [`RpcError::NotImplemented`], which reaches the
/// client as a fault.
#[async_trait]
pub trait UnknownServer: Send + Sync {
    async fn query_interface(
        &self,
        _ipid: Ipid,
        _request: QueryInterfaceRequest,
    ) -> msrpc_dcerpc::Result<QueryInterfaceResponse> {
        Err(RpcError::NotImplemented)
    }

    async fn add_ref(
        &self,
        _ipid: Ipid,
        _request: AddRefRequest,
    ) -> msrpc_dcerpc::Result<AddRefResponse> {
        Err(RpcError::NotImplemented)
    }

    async fn release(
        &self,
        _ipid: Ipid,
        _request: ReleaseRequest,
    ) -> msrpc_dcerpc::Result<ReleaseResponse> {
        Err(RpcError::NotImplemented)
    }
}

struct UnknownHandle<S> {
    server: Arc<S>,
}

#[async_trait]
impl<S: UnknownServer + 'static> ServerHandle for UnknownHandle<S> {
    async fn handle(&self, opnum: u16, stub: StubData) -> msrpc_dcerpc::Result<Box<dyn Operation>> {
        let server = &self.server;
        match opnum {
            opnum::QUERY_INTERFACE => {
                serve_orpc(stub, |ipid, request: QueryInterfaceRequest| {
                    server.query_interface(ipid, request)
                })
                .await
            }
            opnum::ADD_REF => {
                serve_orpc(stub, |ipid, request: AddRefRequest| server.add_ref(ipid, request)).await
            }
            opnum::RELEASE => {
                serve_orpc(stub, |ipid, request: ReleaseRequest| server.release(ipid, request)).await
            }
            _ => Err(RpcError::NotImplemented),
        }
    }
}

/// Opnum table serving IUnknown's methods from `server`.
///
/// Derived interfaces extend it:
/// `OpnumTable::extend(unknown_server_handle(s), UNKNOWN_OPNUM_COUNT, derived)`.
pub fn unknown_server_handle<S: UnknownServer + 'static>(server: Arc<S>) -> OpnumTable {
    OpnumTable::new(Arc::new(UnknownHandle { server }))
}
