//! DCOM Hello Server
//!
//! Exports one IHello object under the well-known IPID and serves IUnknown
//! and IHello on it.
//!
//! Run with: cargo run --bin hello-server -- --port 5001

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dcom_hello::{hello_server_handle, HelloServer, SayHelloRequest, SayHelloResponse};
use dcom_hello::{HELLO_IPID, IHELLO_SYNTAX_V0_0};
use msrpc_dcerpc::hresult::codes;
use msrpc_dcerpc::{DceRpcServer, DceRpcServerConfig, ServerHandle};
use msrpc_dcom::iunknown::{AddRefRequest, AddRefResponse, ReleaseRequest, ReleaseResponse};
use msrpc_dcom::{unknown_server_handle, Ipid, UnknownServer, UNKNOWN_SYNTAX_V0_0};

/// The exported hello object
struct HelloImpl {
    refs: AtomicU32,
}

impl HelloImpl {
    fn new() -> Self {
        Self {
            refs: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl UnknownServer for HelloImpl {
    async fn add_ref(
        &self,
        _ipid: Ipid,
        _request: AddRefRequest,
    ) -> msrpc_dcerpc::Result<AddRefResponse> {
        let count = self.refs.fetch_add(1, Ordering::SeqCst) + 1;
        info!("AddRef -> {}", count);
        Ok(AddRefResponse { ref_count: count })
    }

    async fn release(
        &self,
        _ipid: Ipid,
        _request: ReleaseRequest,
    ) -> msrpc_dcerpc::Result<ReleaseResponse> {
        let count = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .map_or(0, |n| n.saturating_sub(1));
        info!("Release -> {}", count);
        Ok(ReleaseResponse { ref_count: count })
    }
}

#[async_trait]
impl HelloServer for HelloImpl {
    async fn say_hello(
        &self,
        ipid: Ipid,
        request: SayHelloRequest,
    ) -> msrpc_dcerpc::Result<SayHelloResponse> {
        if ipid != HELLO_IPID {
            return Ok(SayHelloResponse {
                return_code: codes::RPC_E_INVALID_IPID,
                ..Default::default()
            });
        }
        if request.name.is_empty() {
            return Ok(SayHelloResponse {
                return_code: codes::E_INVALIDARG,
                ..Default::default()
            });
        }
        info!("SayHello called with name: {}", request.name);
        Ok(SayHelloResponse {
            greeting: format!("Hello, {}! Welcome to DCOM!", request.name),
            return_code: codes::S_OK,
        })
    }
}

#[derive(Parser)]
#[command(name = "hello-server")]
#[command(about = "DCOM Hello Server")]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "5001")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let object = Arc::new(HelloImpl::new());
    let server = DceRpcServer::with_config(DceRpcServerConfig {
        max_connections: 64,
        ..Default::default()
    });
    server
        .register(
            UNKNOWN_SYNTAX_V0_0,
            Arc::new(unknown_server_handle(Arc::clone(&object))) as Arc<dyn ServerHandle>,
        )
        .await;
    server
        .register(
            IHELLO_SYNTAX_V0_0,
            Arc::new(hello_server_handle(object)) as Arc<dyn ServerHandle>,
        )
        .await;

    info!("Hello object exported as {}", HELLO_IPID);
    info!("DCOM Hello server listening on {}", addr);
    server.run(addr).await?;

    Ok(())
}
