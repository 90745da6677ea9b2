//! DCOM Hello Client
//!
//! Greets the hello server's exported object, then calls IUnknown's
//! methods on the same IPID through the IHello context.
//!
//! Run with: cargo run --bin hello-client -- --host 127.0.0.1 --port 5001

use std::net::SocketAddr;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use dcom_hello::{HelloClient, HELLO_IPID};
use msrpc_dcerpc::CallOptions;
use msrpc_dcom::iunknown::{AddRefRequest, ReleaseRequest};
use msrpc_dcom::DcomError;

#[derive(Parser)]
#[command(name = "hello-client")]
#[command(about = "DCOM Hello Client")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "5001")]
    port: u16,

    /// Name to greet
    #[arg(short, long, default_value = "World")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    info!("Connecting to DCOM Hello server at {}", addr);
    let client = HelloClient::connect(addr, HELLO_IPID).await?;
    info!("Connected! Running DCOM operations...");

    match client.say_hello(&args.name).await {
        Ok(greeting) => info!("SayHello result: {}", greeting),
        Err(DcomError::Rpc(e)) => warn!("SayHello failed: {}", e),
        Err(e) => return Err(e.into()),
    }

    let unknown = client.unknown();
    let opts = CallOptions::new();
    let added = unknown.add_ref(AddRefRequest, &opts).await?;
    info!("AddRef returned {}", added.ref_count);
    let released = unknown.release(ReleaseRequest, &opts).await?;
    info!("Release returned {}", released.ref_count);

    client.conn().close().await?;
    info!("All operations completed successfully!");

    Ok(())
}
