//! DCOM Hello
//!
//! IHello extends IUnknown with one method:
//!
//! ```text
//! HRESULT SayHello(
//!     [in, unique, string] wchar_t *Name,
//!     [out, string] wchar_t **Greeting);
//! ```
//!
//! The server exports a single object under [`HELLO_IPID`], so the client
//! needs no activation step to address it.

use async_trait::async_trait;
use msrpc_dcerpc::{
    CallOptions, Conn, ConnConfig, Operation, OpnumTable, Request, Response, RpcError,
    ServerHandle, StubData, SyntaxId, Uuid,
};
use msrpc_dcom::{
    serve_orpc, unknown_server_handle, Ipid, ObjectClient, UnknownClient, UnknownServer,
    UNKNOWN_OPNUM_COUNT,
};
use msrpc_ndr::{NdrReader, NdrWriter};
use std::net::SocketAddr;
use std::sync::Arc;

pub const IHELLO_UUID: Uuid = Uuid {
    time_low: 0x9b3f_6a10,
    time_mid: 0x2c4d,
    time_hi_and_version: 0x11d0,
    clock_seq_hi_and_reserved: 0xa1,
    clock_seq_low: 0x5e,
    node: [0x00, 0xc0, 0x4f, 0xd9, 0x1a, 0x77],
};

pub const IHELLO_SYNTAX_V0_0: SyntaxId = SyntaxId::new(IHELLO_UUID, 0, 0);

/// The one object the demo server exports
pub const HELLO_IPID: Ipid = Ipid(Uuid {
    time_low: 0x0000_7801,
    time_mid: 0x0b1c,
    time_hi_and_version: 0x4d2e,
    clock_seq_hi_and_reserved: 0x8f,
    clock_seq_low: 0x30,
    node: [0x41, 0x52, 0x63, 0x74, 0x85, 0x96],
});

pub mod opnum {
    pub const SAY_HELLO: u16 = 3;
}

#[derive(Debug, Default)]
pub struct SayHelloOperation {
    pub name: String,
    pub greeting: String,
    pub return_code: i32,
}

impl Operation for SayHelloOperation {
    fn opnum(&self) -> u16 {
        opnum::SAY_HELLO
    }

    fn opname(&self) -> &'static str {
        "/IHello/v0/SayHello"
    }

    fn marshal_request<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_unique_utf16_nstring(&self.name)?;
        w.write_deferred()
    }

    fn unmarshal_request<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_unique_utf16_nstring(&mut self.name)?;
        r.read_deferred()
    }

    fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_unique_utf16_nstring(&self.greeting)?;
        w.write_deferred()?;
        w.write_i32(self.return_code);
        Ok(())
    }

    fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_unique_utf16_nstring(&mut self.greeting)?;
        r.read_deferred()?;
        self.return_code = r.read_i32()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SayHelloRequest {
    pub name: String,
}

impl Request for SayHelloRequest {
    type Operation = SayHelloOperation;

    fn into_operation(self) -> SayHelloOperation {
        SayHelloOperation {
            name: self.name,
            ..Default::default()
        }
    }

    fn from_operation(op: &mut SayHelloOperation) -> Self {
        Self {
            name: std::mem::take(&mut op.name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SayHelloResponse {
    pub greeting: String,
    pub return_code: i32,
}

impl Response for SayHelloResponse {
    type Operation = SayHelloOperation;

    fn from_operation(op: &mut SayHelloOperation) -> Self {
        Self {
            greeting: std::mem::take(&mut op.greeting),
            return_code: op.return_code,
        }
    }

    fn into_operation(self, op: &mut SayHelloOperation) {
        op.greeting = self.greeting;
        op.return_code = self.return_code;
    }

    fn return_code(&self) -> Option<i32> {
        Some(self.return_code)
    }
}

/// IHello client
#[derive(Clone, Debug)]
pub struct HelloClient {
    object: ObjectClient,
}

impl HelloClient {
    /// Connect to `addr` and bind IHello for the object at `ipid`.
    pub async fn connect(addr: SocketAddr, ipid: Ipid) -> msrpc_dcom::Result<Self> {
        let conn = Conn::connect(addr, ConnConfig::default()).await?;
        let object = ObjectClient::bind(&conn, IHELLO_SYNTAX_V0_0, Some(ipid)).await?;
        Ok(Self { object })
    }

    pub fn conn(&self) -> &Conn {
        self.object.conn()
    }

    /// IUnknown methods of the same object
    pub fn unknown(&self) -> UnknownClient {
        UnknownClient::from_object(self.object.clone())
    }

    pub async fn say_hello(&self, name: &str) -> msrpc_dcom::Result<String> {
        let request = SayHelloRequest {
            name: name.to_string(),
        };
        let response: SayHelloResponse = self.object.call(request, &CallOptions::new()).await?;
        Ok(response.greeting)
    }
}

/// Server-side IHello
#[async_trait]
pub trait HelloServer: UnknownServer {
    async fn say_hello(
        &self,
        _ipid: Ipid,
        _request: SayHelloRequest,
    ) -> msrpc_dcerpc::Result<SayHelloResponse> {
        Err(RpcError::NotImplemented)
    }
}

struct HelloHandle<S> {
    server: Arc<S>,
}

#[async_trait]
impl<S: HelloServer + 'static> ServerHandle for HelloHandle<S> {
    async fn handle(&self, opnum: u16, stub: StubData) -> msrpc_dcerpc::Result<Box<dyn Operation>> {
        let server = &self.server;
        match opnum {
            opnum::SAY_HELLO => {
                serve_orpc(stub, |ipid, request: SayHelloRequest| {
                    server.say_hello(ipid, request)
                })
                .await
            }
            _ => Err(RpcError::NotImplemented),
        }
    }
}

/// IHello with IUnknown underneath, ready to register under
/// [`IHELLO_SYNTAX_V0_0`].
pub fn hello_server_handle<S: HelloServer + 'static>(server: Arc<S>) -> OpnumTable {
    OpnumTable::extend(
        unknown_server_handle(Arc::clone(&server)),
        UNKNOWN_OPNUM_COUNT,
        Arc::new(HelloHandle { server }),
    )
}
