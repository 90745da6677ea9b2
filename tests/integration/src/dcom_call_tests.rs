//! DCOM Call Tests - IPID-addressed calls through the ORPC layer
//!
//! These tests host an IUnknown-derived catalog interface and exercise:
//! - The IPID precondition, checked before any I/O
//! - Sequential and overridden IPIDs on one connection
//! - Base methods reached through the derived interface's context
//! - Not-implemented methods at either inheritance level
//! - Sub-connections to another interface of the same object

use async_trait::async_trait;
use integration_tests::*;
use msrpc_dcerpc::hresult::codes;
use msrpc_dcerpc::{
    CallOptions, Conn, ConnConfig, DceRpcServer, Operation, OpnumTable, RpcError, ServerHandle,
    StubData, SyntaxId, Uuid,
};
use msrpc_dcom::iunknown::{
    AddRefRequest, AddRefResponse, QueryInterfaceRequest, QueryInterfaceResponse, ReleaseRequest,
};
use msrpc_dcom::{
    serve_orpc, unknown_server_handle, DcomError, InterfacePointer, Ipid, IpidOptions,
    ObjectClient, OrpcCall, UnknownClient, UnknownServer, UNKNOWN_OPNUM_COUNT,
    UNKNOWN_SYNTAX_V0_0,
};
use msrpc_ndr::{Bytes, NdrReader, NdrWriter, FIRST_REFERENT_ID};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog objects keyed by IPID, each rooted at its own path
#[derive(Default)]
struct CatalogObjects {
    roots: Mutex<HashMap<Ipid, String>>,
    refs: Mutex<HashMap<Ipid, u32>>,
    /// Object UUID and stub data of every ListModules request
    requests: Mutex<Vec<(Option<Uuid>, Bytes)>>,
}

impl CatalogObjects {
    fn export(&self, root: &str) -> Ipid {
        let ipid = Ipid::generate();
        self.roots.lock().insert(ipid, root.to_string());
        ipid
    }

    fn list(&self, ipid: Ipid, query: &ModuleQuery) -> ModuleList {
        let Some(root) = self.roots.lock().get(&ipid).cloned() else {
            return ModuleList::failed(codes::RPC_E_INVALID_IPID);
        };
        if query.path.is_empty() {
            return ModuleList::failed(codes::E_INVALIDARG);
        }
        catalog_listing(&ModuleQuery::new(
            format!("{}\\{}", root, query.path),
            query.limit,
        ))
    }
}

#[async_trait]
impl UnknownServer for CatalogObjects {
    async fn query_interface(
        &self,
        _ipid: Ipid,
        request: QueryInterfaceRequest,
    ) -> msrpc_dcerpc::Result<QueryInterfaceResponse> {
        if request.iid != CATALOG_OBJECT_UUID {
            return Ok(QueryInterfaceResponse {
                object: None,
                return_code: codes::E_NOINTERFACE,
            });
        }
        Ok(QueryInterfaceResponse {
            object: Some(InterfacePointer::new(b"MEOW\x01\x00\x00\x00".to_vec())),
            return_code: codes::S_OK,
        })
    }

    async fn add_ref(
        &self,
        ipid: Ipid,
        _request: AddRefRequest,
    ) -> msrpc_dcerpc::Result<AddRefResponse> {
        let mut refs = self.refs.lock();
        let count = refs.entry(ipid).or_insert(1);
        *count += 1;
        Ok(AddRefResponse { ref_count: *count })
    }
}

/// Methods of the catalog interface proper, from opnum 3 on
struct CatalogObjectHandle {
    objects: Arc<CatalogObjects>,
}

#[async_trait]
impl ServerHandle for CatalogObjectHandle {
    async fn handle(&self, opnum: u16, stub: StubData) -> msrpc_dcerpc::Result<Box<dyn Operation>> {
        match opnum {
            OBJECT_LIST_MODULES => {
                self.objects
                    .requests
                    .lock()
                    .push((stub.object, stub.data.clone()));
                let objects = &self.objects;
                serve_orpc(stub, |ipid, request: ObjectListModulesRequest| async move {
                    Ok::<_, RpcError>(ObjectListModulesResponse(objects.list(ipid, &request.0)))
                })
                .await
            }
            _ => Err(RpcError::NotImplemented),
        }
    }
}

/// `Ping()` at opnum 4, which the server does not provide
#[derive(Debug, Default)]
struct PingOperation {
    return_code: i32,
}

impl Operation for PingOperation {
    fn opnum(&self) -> u16 {
        4
    }

    fn opname(&self) -> &'static str {
        "/ICatalogObject/v0/Ping"
    }

    fn marshal_request<'a>(&'a self, _w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        Ok(())
    }

    fn unmarshal_request<'a>(&'a mut self, _r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        Ok(())
    }

    fn marshal_response<'a>(&'a self, w: &mut NdrWriter<'a>) -> msrpc_ndr::Result<()> {
        w.write_i32(self.return_code);
        Ok(())
    }

    fn unmarshal_response<'a>(&'a mut self, r: &mut NdrReader<'a>) -> msrpc_ndr::Result<()> {
        self.return_code = r.read_i32()?;
        Ok(())
    }
}

/// Client of the catalog interface
#[derive(Clone, Debug)]
struct CatalogObjectClient {
    object: ObjectClient,
}

impl CatalogObjectClient {
    async fn new(conn: &Conn, ipid: Option<Ipid>) -> msrpc_dcom::Result<Self> {
        let object = ObjectClient::bind(conn, CATALOG_OBJECT_SYNTAX, ipid).await?;
        Ok(Self { object })
    }

    fn with_ipid(&self, ipid: Ipid) -> Self {
        Self {
            object: self.object.with_ipid(ipid),
        }
    }

    /// IUnknown methods over this interface's context
    fn unknown(&self) -> UnknownClient {
        UnknownClient::from_object(self.object.clone())
    }

    async fn list_modules(
        &self,
        query: ModuleQuery,
        opts: &CallOptions,
    ) -> msrpc_dcom::Result<ModuleList> {
        let response: ObjectListModulesResponse =
            self.object.call(ObjectListModulesRequest(query), opts).await?;
        Ok(response.0)
    }
}

/// Host serving IUnknown on its own and as the base of the catalog
/// interface.
async fn catalog_host(objects: Arc<CatalogObjects>) -> Arc<DceRpcServer> {
    let server = Arc::new(DceRpcServer::new());
    server
        .register(
            UNKNOWN_SYNTAX_V0_0,
            Arc::new(unknown_server_handle(Arc::clone(&objects))),
        )
        .await;
    let catalog = OpnumTable::extend(
        unknown_server_handle(Arc::clone(&objects)),
        UNKNOWN_OPNUM_COUNT,
        Arc::new(CatalogObjectHandle { objects }),
    );
    server.register(CATALOG_OBJECT_SYNTAX, Arc::new(catalog)).await;
    server
}

fn unlisted_syntax() -> SyntaxId {
    SyntaxId::new(
        Uuid::parse("99fcfec4-5260-101b-bbcb-00aa0021347a").unwrap(),
        0,
        0,
    )
}

/// Test: A call with no IPID fails locally and sends nothing
#[tokio::test]
async fn test_missing_ipid_fails_before_any_io() {
    init_logging();

    let objects = Arc::new(CatalogObjects::default());
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());
    let client = CatalogObjectClient::new(&conn, None).await.unwrap();

    let err = client
        .list_modules(ModuleQuery::new("sys", 1), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DcomError::MissingIpid {
            operation: "/ICatalogObject/v0/ListModules"
        }
    ));
    assert_eq!(server.stats().snapshot().requests_received, 0);
    assert!(objects.requests.lock().is_empty());

    // the connection is untouched and serves the next call
    let ipid = objects.export("C:");
    let list = client
        .list_modules(ModuleQuery::new("sys", 1), &CallOptions::new().with_ipid(ipid))
        .await
        .unwrap();
    assert_eq!(list.modules, Some(vec![module_name("C:\\sys", 0)]));
}

/// Test: Two sequential calls with different IPIDs share nothing but the
/// transport
#[tokio::test]
async fn test_sequential_calls_with_different_ipids() {
    init_logging();

    let objects = Arc::new(CatalogObjects::default());
    let first = objects.export("C:\\one");
    let second = objects.export("D:\\two");
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());

    let client = CatalogObjectClient::new(&conn, Some(first)).await.unwrap();
    let one = client
        .list_modules(ModuleQuery::new("bin", 3), &CallOptions::new())
        .await
        .unwrap();
    let two = client
        .with_ipid(second)
        .list_modules(ModuleQuery::new("bin", 2), &CallOptions::new())
        .await
        .unwrap();

    let mut expected_one = catalog_listing(&ModuleQuery::new("C:\\one\\bin", 3));
    expected_one.modules_count = 3;
    let mut expected_two = catalog_listing(&ModuleQuery::new("D:\\two\\bin", 2));
    expected_two.modules_count = 2;
    assert_eq!(one, expected_one);
    assert_eq!(two, expected_two);

    let requests = objects.requests.lock();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, Some(first.0));
    assert_eq!(requests[1].0, Some(second.0));
    // Path referent follows the 32-byte ORPCTHIS; numbering restarts per call
    for (_, stub) in requests.iter() {
        let id = u32::from_le_bytes([stub[32], stub[33], stub[34], stub[35]]);
        assert_eq!(id, FIRST_REFERENT_ID);
    }
    assert_eq!(requests[0].1.len(), requests[1].1.len());
}

/// Test: An IPID in the call options overrides the client's own
#[tokio::test]
async fn test_call_options_ipid_overrides_default() {
    let objects = Arc::new(CatalogObjects::default());
    let default = objects.export("C:");
    let explicit = objects.export("E:");
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());

    let client = CatalogObjectClient::new(&conn, Some(default)).await.unwrap();
    let opts = CallOptions::new().with_ipid(explicit);
    let list = client
        .list_modules(ModuleQuery::new("x", 1), &opts)
        .await
        .unwrap();
    assert_eq!(list.modules, Some(vec![module_name("E:\\x", 0)]));
    assert_eq!(objects.requests.lock()[0].0, Some(explicit.0));
}

/// Test: IUnknown methods reach the base handler through the derived context
#[tokio::test]
async fn test_base_methods_through_derived_interface() {
    init_logging();

    let objects = Arc::new(CatalogObjects::default());
    let first = objects.export("C:");
    let second = objects.export("D:");
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());

    let catalog = CatalogObjectClient::new(&conn, Some(first)).await.unwrap();
    let unknown = catalog.unknown();
    assert_eq!(unknown.conn().scope(), Some(CATALOG_OBJECT_SYNTAX));

    let opts = CallOptions::new();
    assert_eq!(unknown.add_ref(AddRefRequest, &opts).await.unwrap().ref_count, 2);
    assert_eq!(unknown.add_ref(AddRefRequest, &opts).await.unwrap().ref_count, 3);
    let other = unknown.with_ipid(second);
    assert_eq!(other.add_ref(AddRefRequest, &opts).await.unwrap().ref_count, 2);

    let found = unknown
        .query_interface(
            QueryInterfaceRequest {
                iid: CATALOG_OBJECT_UUID,
            },
            &opts,
        )
        .await
        .unwrap();
    let pointer = found.object.expect("interface pointer");
    assert_eq!(pointer.objref_flags(), Some(1));

    let err = unknown
        .query_interface(
            QueryInterfaceRequest {
                iid: CATALOG_UUID,
            },
            &opts,
        )
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(codes::E_NOINTERFACE));
    assert!(err.to_string().contains("E_NOINTERFACE"));

    // no ListModules request was involved
    assert!(objects.requests.lock().is_empty());
}

/// Test: Methods missing at either level fault and leave the connection usable
#[tokio::test]
async fn test_unimplemented_methods_fault() {
    init_logging();

    let objects = Arc::new(CatalogObjects::default());
    let ipid = objects.export("C:");
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());
    let catalog = CatalogObjectClient::new(&conn, Some(ipid)).await.unwrap();

    // base level: Release keeps its default
    let err = catalog
        .unknown()
        .release(ReleaseRequest, &CallOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented(), "unexpected {:?}", err);

    // derived level: nothing serves opnum 4
    let mut ping = OrpcCall::new(PingOperation::default());
    let err = catalog
        .object
        .invoke(&mut ping, &CallOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented(), "unexpected {:?}", err);

    let list = catalog
        .list_modules(ModuleQuery::new("lib", 2), &CallOptions::new())
        .await
        .unwrap();
    assert_eq!(list.modules_count, 2);

    let stats = server.stats().snapshot();
    assert_eq!(stats.requests_received, 3);
    assert_eq!(stats.requests_failed, 2);
}

/// Test: A nonzero return code reaches the caller as a described error
#[tokio::test]
async fn test_remote_hresult_is_surfaced() {
    let objects = Arc::new(CatalogObjects::default());
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());
    let stale = CatalogObjectClient::new(&conn, Some(Ipid::generate()))
        .await
        .unwrap();

    let err = stale
        .list_modules(ModuleQuery::new("bin", 1), &CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(codes::RPC_E_INVALID_IPID));
    let text = err.to_string();
    assert!(text.contains("/ICatalogObject/v0/ListModules"), "{}", text);
    assert!(text.contains("RPC_E_INVALID_IPID"), "{}", text);

    let live = stale.with_ipid(objects.export("C:"));
    let err = live
        .list_modules(ModuleQuery::new("", 1), &CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(codes::E_INVALIDARG));
}

/// Test: Another interface of the same object gets its own context on the
/// same transport, and an unknown one falls back to the parent's
#[tokio::test]
async fn test_sub_connections_share_the_transport() {
    init_logging();

    let objects = Arc::new(CatalogObjects::default());
    let ipid = objects.export("C:");
    let server = catalog_host(Arc::clone(&objects)).await;
    let conn = connect_in_memory(&server, ConnConfig::default());

    let unknown = UnknownClient::new(&conn, Some(ipid)).await.unwrap();
    assert_eq!(unknown.conn().scope(), Some(UNKNOWN_SYNTAX_V0_0));

    let derived = unknown
        .object()
        .query(CATALOG_OBJECT_SYNTAX, ipid)
        .await
        .unwrap();
    assert_eq!(derived.conn().scope(), Some(CATALOG_OBJECT_SYNTAX));
    assert!(derived.conn().context_id(&UNKNOWN_SYNTAX_V0_0).is_some());
    let catalog = CatalogObjectClient { object: derived };
    let list = catalog
        .list_modules(ModuleQuery::new("etc", 1), &CallOptions::new())
        .await
        .unwrap();
    assert_eq!(list.modules, Some(vec![module_name("C:\\etc", 0)]));

    // the parent still talks IUnknown
    let count = unknown
        .add_ref(AddRefRequest, &CallOptions::new())
        .await
        .unwrap();
    assert_eq!(count.ref_count, 2);

    let fallback = unknown
        .object()
        .query(unlisted_syntax(), ipid)
        .await
        .unwrap();
    assert_eq!(fallback.conn().scope(), Some(UNKNOWN_SYNTAX_V0_0));

    assert_eq!(server.stats().snapshot().connections_accepted, 1);
}
