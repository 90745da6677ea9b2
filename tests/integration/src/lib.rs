//! Shared fixtures for the integration tests
//!
//! The catalog interface has one method whose parameters carry the pointer
//! shapes that exercise the codec hardest: a unique string going in, and a
//! count coming back with two arrays sized by it, one of them an array of
//! unique strings.
//!
//! ```text
//! HRESULT ListModules(
//!     [in, unique, string] wchar_t *Path,
//!     [in] DWORD Limit,
//!     [out] DWORD *ModulesCount,
//!     [out, size_is(,*ModulesCount)] DWORD **ModuleFlags,
//!     [out, size_is(,*ModulesCount)] LPWSTR **Modules);
//! ```
//!
//! The same method is served over plain RPC at opnum 0 and, for the DCOM
//! tests, as the first method of an IUnknown-derived interface at opnum 3.

use async_trait::async_trait;
use msrpc_dcerpc::hresult::codes;
use msrpc_dcerpc::{
    serve, Conn, ConnConfig, DceRpcServer, DceRpcServerConfig, Operation, Request, Response,
    RpcError, ServerHandle, StubData, SyntaxId, Uuid,
};
use msrpc_ndr::{NdrError, NdrReader, NdrWriter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::io::duplex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const CATALOG_UUID: Uuid = Uuid {
    time_low: 0x6b5d_c2e1,
    time_mid: 0x3a41,
    time_hi_and_version: 0x4c8e,
    clock_seq_hi_and_reserved: 0x9f,
    clock_seq_low: 0x12,
    node: [0x00, 0x50, 0x56, 0xc0, 0x00, 0x08],
};

pub const CATALOG_SYNTAX: SyntaxId = SyntaxId::new(CATALOG_UUID, 1, 0);

pub const CATALOG_OBJECT_UUID: Uuid = Uuid {
    time_low: 0x6b5d_c2e2,
    time_mid: 0x3a41,
    time_hi_and_version: 0x4c8e,
    clock_seq_hi_and_reserved: 0x9f,
    clock_seq_low: 0x12,
    node: [0x00, 0x50, 0x56, 0xc0, 0x00, 0x08],
};

/// IUnknown-derived catalog interface
pub const CATALOG_OBJECT_SYNTAX: SyntaxId = SyntaxId::new(CATALOG_OBJECT_UUID, 0, 0);

/// Request parameters of ListModules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleQuery {
    /// Sent as a null referent when empty
    pub path: String,
    pub limit: u32,
}

impl ModuleQuery {
    pub fn new(path: impl Into<String>, limit: u32) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }

    pub fn marshal<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_unique_utf16_nstring(&self.path)?;
        w.write_deferred()?;
        w.write_u32(self.limit);
        Ok(())
    }

    pub fn unmarshal<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        r.read_unique_utf16_nstring(&mut self.path)?;
        r.read_deferred()?;
        self.limit = r.read_u32()?;
        Ok(())
    }
}

/// Response parameters of ListModules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleList {
    pub modules_count: u32,
    pub module_flags: Option<Vec<u32>>,
    pub modules: Option<Vec<String>>,
    pub return_code: i32,
}

impl ModuleList {
    /// Listing of `modules` with their flags; the count is derived at
    /// marshal time.
    pub fn new<S: Into<String>>(modules: impl IntoIterator<Item = (S, u32)>) -> Self {
        let (modules, flags): (Vec<String>, Vec<u32>) = modules
            .into_iter()
            .map(|(name, flags)| (name.into(), flags))
            .unzip();
        Self {
            modules_count: 0,
            module_flags: Some(flags),
            modules: Some(modules),
            return_code: codes::S_OK,
        }
    }

    /// Failure reply: no arrays, only the return code.
    pub fn failed(return_code: i32) -> Self {
        Self {
            return_code,
            ..Self::default()
        }
    }

    /// Derive `modules_count` from whichever arrays are present.
    pub fn prepare(&mut self) -> msrpc_dcerpc::Result<()> {
        let flags = self.module_flags.as_ref().map(Vec::len);
        let modules = self.modules.as_ref().map(Vec::len);
        let count = match (flags, modules) {
            (Some(flags), Some(modules)) if flags != modules => {
                return Err(NdrError::ArraySizeMismatch {
                    expected: modules,
                    got: flags,
                }
                .into());
            }
            (Some(n), _) | (None, Some(n)) => n,
            (None, None) => return Ok(()),
        };
        self.modules_count =
            u32::try_from(count).map_err(|_| NdrError::SizeOverflow(count as u64))?;
        Ok(())
    }

    pub fn marshal<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_u32(self.modules_count);
        w.write_pointer(self.module_flags.as_ref(), |w, flags| {
            w.write_size(flags.len() as u64)?;
            for flag in flags {
                w.write_u32(*flag);
            }
            Ok(())
        })?;
        w.write_pointer(self.modules.as_ref(), |w, modules| {
            w.write_size(modules.len() as u64)?;
            for module in modules {
                w.write_unique_utf16_nstring(module.as_str())?;
            }
            Ok(())
        })?;
        w.write_deferred()?;
        w.write_i32(self.return_code);
        Ok(())
    }

    pub fn unmarshal<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        self.modules_count = r.read_u32()?;
        let count = self.modules_count as usize;
        r.read_pointer(&mut self.module_flags, move |r, slot| {
            let n = read_sized_by(r, count, 4)?;
            let flags = slot.insert(Vec::with_capacity(n));
            for _ in 0..n {
                flags.push(r.read_u32()?);
            }
            Ok(())
        })?;
        r.read_pointer(&mut self.modules, move |r, slot| {
            let n = read_sized_by(r, count, 4)?;
            let modules = slot.insert(vec![String::new(); n]);
            for module in modules.iter_mut() {
                r.read_unique_utf16_nstring(module)?;
            }
            Ok(())
        })?;
        r.read_deferred()?;
        self.return_code = r.read_i32()?;
        Ok(())
    }
}

/// Conformance of an array whose `size_is` names `count`.
fn read_sized_by(
    r: &mut NdrReader<'_>,
    count: usize,
    element_size: usize,
) -> msrpc_ndr::Result<usize> {
    let n = r.read_array_size(element_size)?;
    if n != count {
        return Err(NdrError::ArraySizeMismatch {
            expected: count,
            got: n,
        });
    }
    Ok(n)
}

macro_rules! list_modules_method {
    ($op:ident, $request:ident, $response:ident, $opnum:expr, $opname:literal) => {
        #[derive(Debug, Default)]
        pub struct $op {
            pub query: ModuleQuery,
            pub list: ModuleList,
        }

        impl Operation for $op {
            fn opnum(&self) -> u16 {
                $opnum
            }

            fn opname(&self) -> &'static str {
                $opname
            }

            fn marshal_request<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
                self.query.marshal(w)
            }

            fn unmarshal_request<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
                self.query.unmarshal(r)
            }

            fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
                self.list.marshal(w)
            }

            fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
                self.list.unmarshal(r)
            }

            fn prepare_response(&mut self) -> msrpc_dcerpc::Result<()> {
                self.list.prepare()
            }
        }

        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $request(pub ModuleQuery);

        impl Request for $request {
            type Operation = $op;

            fn into_operation(self) -> $op {
                $op {
                    query: self.0,
                    ..Default::default()
                }
            }

            fn from_operation(op: &mut $op) -> Self {
                Self(std::mem::take(&mut op.query))
            }
        }

        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $response(pub ModuleList);

        impl Response for $response {
            type Operation = $op;

            fn from_operation(op: &mut $op) -> Self {
                Self(std::mem::take(&mut op.list))
            }

            fn into_operation(self, op: &mut $op) {
                op.list = self.0;
            }

            fn return_code(&self) -> Option<i32> {
                Some(self.0.return_code)
            }
        }
    };
}

list_modules_method!(
    ListModulesOperation,
    ListModulesRequest,
    ListModulesResponse,
    0,
    "ListModules"
);

list_modules_method!(
    ObjectListModulesOperation,
    ObjectListModulesRequest,
    ObjectListModulesResponse,
    3,
    "/ICatalogObject/v0/ListModules"
);

/// Opnum of ListModules on the derived interface
pub const OBJECT_LIST_MODULES: u16 = 3;

/// Catalog answer for `query`: `limit` modules under `path`, flags equal to
/// their index. An empty path is rejected with E_INVALIDARG.
pub fn catalog_listing(query: &ModuleQuery) -> ModuleList {
    if query.path.is_empty() {
        return ModuleList::failed(codes::E_INVALIDARG);
    }
    ModuleList::new((0..query.limit).map(|i| (module_name(&query.path, i), i)))
}

pub fn module_name(path: &str, index: u32) -> String {
    format!("{}\\m{:05}.dll", path, index)
}

/// Plain-RPC catalog service
#[derive(Debug, Default)]
pub struct CatalogService {
    pub calls: AtomicU64,
}

impl CatalogService {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServerHandle for CatalogService {
    async fn handle(&self, opnum: u16, stub: StubData) -> msrpc_dcerpc::Result<Box<dyn Operation>> {
        match opnum {
            0 => {
                serve(stub, |request: ListModulesRequest| async move {
                    self.calls.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, RpcError>(ListModulesResponse(catalog_listing(&request.0)))
                })
                .await
            }
            _ => Err(RpcError::NotImplemented),
        }
    }
}

/// Server with the catalog registered
pub async fn catalog_server(config: DceRpcServerConfig) -> (Arc<DceRpcServer>, Arc<CatalogService>) {
    let server = Arc::new(DceRpcServer::with_config(config));
    let service = Arc::new(CatalogService::default());
    server
        .register(CATALOG_SYNTAX, Arc::clone(&service) as Arc<dyn ServerHandle>)
        .await;
    (server, service)
}

/// Connection to `server` over an in-memory stream, not yet bound.
pub fn connect_in_memory(server: &DceRpcServer, config: ConnConfig) -> Conn {
    let (client, server_side) = duplex(256 * 1024);
    tokio::spawn(server.serve_stream(server_side));
    Conn::from_stream(client, config)
}

/// Server accepting TCP connections on an ephemeral local port
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<msrpc_dcerpc::Result<()>>,
}

impl RunningServer {
    pub async fn start(server: Arc<DceRpcServer>) -> msrpc_dcerpc::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve_listener(listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Stop accepting and wait, bounded, for open connections to drain.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(5), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

/// Install a fmt subscriber once per test binary; `RUST_LOG` overrides the
/// default level.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
