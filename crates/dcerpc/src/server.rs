//! DCE RPC Server
//!
//! # Scalability Features
//!
//! - Each connection handled in a separate Tokio task
//! - Each complete request dispatched in its own task, so one slow method
//!   does not hold up other calls on the same connection
//! - Semaphore-based connection limiting
//! - Server statistics tracking
//! - Graceful shutdown support

use crate::dispatch::ServerHandle;
use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::operation::{self, StubData};
use crate::pdu::{
    provider_reason, BindAckPdu, BindNakPdu, BindPdu, ContextResultEntry, FaultPdu, FaultStatus,
    Pdu, PduHeader, RequestPdu, ResponsePdu, SyntaxId, Uuid, DEFAULT_MAX_FRAG,
};
use crate::transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, trace, warn};

/// Default cap on half-received fragmented requests per association
pub const DEFAULT_MAX_PARTIAL_CALLS: usize = 64;

/// DCE RPC Server configuration
#[derive(Debug, Clone)]
pub struct DceRpcServerConfig {
    pub max_pdu_size: usize,
    pub max_connections: usize,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    /// Fragmented requests one association may have half-received at once
    pub max_partial_calls: usize,
}

impl Default for DceRpcServerConfig {
    fn default() -> Self {
        Self {
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_connections: 10000,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            max_partial_calls: DEFAULT_MAX_PARTIAL_CALLS,
        }
    }
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

type InterfaceMap = HashMap<SyntaxId, Arc<dyn ServerHandle>>;

/// DCE RPC Server
///
/// Interfaces are registered by abstract syntax. A client binds any subset
/// of them, on one connection, with BIND and ALTER_CONTEXT.
pub struct DceRpcServer {
    interfaces: Arc<RwLock<InterfaceMap>>,
    config: DceRpcServerConfig,
    assoc_group_counter: Arc<AtomicU32>,
    stats: Arc<ServerStats>,
}

impl DceRpcServer {
    pub fn new() -> Self {
        Self::with_config(DceRpcServerConfig::default())
    }

    pub fn with_config(config: DceRpcServerConfig) -> Self {
        Self {
            interfaces: Arc::new(RwLock::new(HashMap::new())),
            config,
            assoc_group_counter: Arc::new(AtomicU32::new(1)),
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn config(&self) -> &DceRpcServerConfig {
        &self.config
    }

    /// Get server statistics
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Register an interface with the server
    pub async fn register(&self, syntax: SyntaxId, handle: Arc<dyn ServerHandle>) {
        info!(%syntax, "registering interface");
        self.interfaces.write().await.insert(syntax, handle);
    }

    /// Run the server on the given address
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F: Future<Output = ()>>(
        &self,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Accept connections from `listener` until `shutdown` completes, then
    /// wait for open connections to finish.
    pub async fn serve_listener<F: Future<Output = ()>>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()> {
        info!(
            "DCE RPC server listening on {} (max_connections: {})",
            listener.local_addr()?,
            self.config.max_connections
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Server shutting down gracefully");
                    let _ = semaphore.acquire_many(self.config.max_connections as u32).await;
                    info!("All connections closed");
                    return Ok(());
                }

                result = listener.accept() => {
                    let (stream, peer_addr) = result?;

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                            drop(stream);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer_addr, e);
                    }
                    debug!("Accepted connection from {}", peer_addr);

                    let connection = self.serve_stream(stream);
                    tokio::spawn(async move {
                        // Permit is held until this task completes
                        let _permit = permit;
                        match connection.await {
                            Ok(()) => debug!("Connection closed from {}", peer_addr),
                            Err(e) => warn!("Connection error from {}: {}", peer_addr, e),
                        }
                    });
                }
            }
        }
    }

    /// Serve a single connection over any byte stream.
    pub fn serve_stream<S>(&self, stream: S) -> impl Future<Output = Result<()>> + Send + 'static
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Connection {
            interfaces: Arc::clone(&self.interfaces),
            config: self.config.clone(),
            assoc_group_counter: Arc::clone(&self.assoc_group_counter),
            stats: Arc::clone(&self.stats),
        };
        async move {
            connection.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
            connection.stats.connections_active.fetch_add(1, Ordering::Relaxed);
            let stats = Arc::clone(&connection.stats);
            let result = connection.run(stream).await;
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            match result {
                Err(RpcError::ConnectionClosed) => Ok(()),
                other => other,
            }
        }
    }
}

impl Default for DceRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one connection task needs from the server
struct Connection {
    interfaces: Arc<RwLock<InterfaceMap>>,
    config: DceRpcServerConfig,
    assoc_group_counter: Arc<AtomicU32>,
    stats: Arc<ServerStats>,
}

/// Per-connection negotiated state
struct Association {
    assoc_group_id: Option<u32>,
    contexts: HashMap<u16, Arc<dyn ServerHandle>>,
    max_xmit_frag: u16,
    partial: HashMap<u32, (FragmentAssembler, Option<Uuid>)>,
}

impl Connection {
    async fn run<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader =
            DceRpcTransport::new(read_half).with_max_pdu_size(self.config.max_pdu_size);
        let (tx, mut rx) = mpsc::channel::<Vec<Bytes>>(64);

        let stats = Arc::clone(&self.stats);
        let writer = tokio::spawn(async move {
            let mut transport = DceRpcTransport::new(write_half);
            while let Some(frames) = rx.recv().await {
                let len: usize = frames.iter().map(Bytes::len).sum();
                transport.write_frames(&frames).await?;
                stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
            }
            Ok::<(), RpcError>(())
        });

        let mut assoc = Association {
            assoc_group_id: None,
            contexts: HashMap::new(),
            max_xmit_frag: self.config.max_xmit_frag,
            partial: HashMap::new(),
        };

        let result = self.read_loop(&mut reader, &mut assoc, &tx).await;
        drop(tx);
        match writer.await {
            Ok(Err(e)) if result.is_ok() => return Err(e),
            Err(e) if result.is_ok() => return Err(e.into()),
            _ => {}
        }
        result
    }

    async fn read_loop<R>(
        &self,
        reader: &mut DceRpcTransport<R>,
        assoc: &mut Association,
        tx: &mpsc::Sender<Vec<Bytes>>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let data = match reader.read_pdu().await {
                Ok(data) => data,
                Err(RpcError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            self.stats
                .bytes_received
                .fetch_add(data.len() as u64, Ordering::Relaxed);

            let pdu = match Pdu::decode(&data) {
                Ok(pdu) => pdu,
                Err(e) => {
                    let header = PduHeader::decode(&data)?;
                    warn!(call_id = header.call_id, error = %e, "malformed PDU");
                    send(tx, fault_frames(&header, 0, e.fault_status())).await?;
                    continue;
                }
            };

            match pdu {
                Pdu::Bind(bind) => {
                    let reply = if !assoc.contexts.is_empty() {
                        warn!(call_id = bind.header.call_id, "second bind on a bound connection");
                        BindNakPdu::new(bind.header.call_id, BindNakPdu::REASON_NOT_SPECIFIED)
                            .encode()?
                    } else {
                        self.negotiate(&bind, assoc, false).await.encode()?
                    };
                    send(tx, vec![reply]).await?;
                }
                Pdu::AlterContext(alter) => {
                    let reply = self.negotiate(&alter, assoc, true).await;
                    send(tx, vec![reply.encode()?]).await?;
                }
                Pdu::Request(request) => {
                    if let Some(request) = self.reassemble(request, assoc, tx).await? {
                        self.dispatch(request, assoc, tx).await?;
                    }
                }
                Pdu::CoCancel(pdu) | Pdu::Orphaned(pdu) => {
                    // The client gave up on this call; nothing is sent back.
                    let call_id = pdu.header.call_id;
                    let dropped = assoc.partial.remove(&call_id).is_some();
                    debug!(
                        call_id,
                        packet_type = ?pdu.header.packet_type,
                        dropped,
                        "call abandoned by client"
                    );
                }
                other => {
                    warn!(
                        call_id = other.call_id(),
                        packet_type = ?other.header().packet_type,
                        "unexpected PDU from client"
                    );
                }
            }
        }
    }

    async fn negotiate(&self, bind: &BindPdu, assoc: &mut Association, alter: bool) -> BindAckPdu {
        let call_id = bind.header.call_id;
        let interfaces = self.interfaces.read().await;
        let ndr20 = SyntaxId::ndr20();

        let mut results = Vec::with_capacity(bind.context_list.len());
        for element in &bind.context_list {
            let wanted = element.abstract_syntax;
            let handle = interfaces.iter().find_map(|(syntax, handle)| {
                (syntax.uuid == wanted.uuid && syntax.major_version() == wanted.major_version())
                    .then_some(handle)
            });
            let entry = match handle {
                None => ContextResultEntry::rejected(provider_reason::ABSTRACT_SYNTAX_NOT_SUPPORTED),
                Some(_) if !element.transfer_syntaxes.contains(&ndr20) => ContextResultEntry::rejected(
                    provider_reason::PROPOSED_TRANSFER_SYNTAXES_NOT_SUPPORTED,
                ),
                Some(handle) => {
                    assoc.contexts.insert(element.context_id, Arc::clone(handle));
                    ContextResultEntry::accepted()
                }
            };
            debug!(
                call_id,
                context_id = element.context_id,
                syntax = %wanted,
                accepted = entry.is_accepted(),
                "presentation context"
            );
            results.push(entry);
        }

        let assoc_group_id = *assoc.assoc_group_id.get_or_insert_with(|| {
            if bind.assoc_group_id != 0 {
                bind.assoc_group_id
            } else {
                self.assoc_group_counter.fetch_add(1, Ordering::SeqCst)
            }
        });

        let mut ack = if alter {
            BindAckPdu::alter_context_resp(call_id, assoc_group_id, results)
        } else {
            BindAckPdu::new(call_id, assoc_group_id, results)
        };
        ack.header.data_rep = bind.header.data_rep;
        ack.max_xmit_frag = self.config.max_xmit_frag.min(bind.max_recv_frag);
        ack.max_recv_frag = self.config.max_recv_frag.min(bind.max_xmit_frag);
        if !alter {
            assoc.max_xmit_frag = ack.max_xmit_frag;
        }
        ack
    }

    /// Returns the whole request once its last fragment is in.
    async fn reassemble(
        &self,
        request: RequestPdu,
        assoc: &mut Association,
        tx: &mpsc::Sender<Vec<Bytes>>,
    ) -> Result<Option<RequestPdu>> {
        let call_id = request.header.call_id;
        let flags = request.header.packet_flags;
        if flags.is_first_frag() && flags.is_last_frag() && !assoc.partial.contains_key(&call_id) {
            return Ok(Some(request));
        }

        if !assoc.partial.contains_key(&call_id)
            && assoc.partial.len() >= self.config.max_partial_calls
        {
            warn!(
                call_id,
                in_flight = assoc.partial.len(),
                "too many fragmented requests in flight"
            );
            self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = FaultStatus::RemoteNoMemory;
            send(tx, fault_frames(&request.header, request.context_id, status)).await?;
            return Ok(None);
        }

        let (assembler, object) = assoc.partial.entry(call_id).or_insert_with(|| {
            (FragmentAssembler::new(call_id), request.object_uuid)
        });
        let object = *object;
        match assembler.add_fragment(
            &request.header,
            &request.stub_data,
            request.context_id,
            Some(request.opnum),
        ) {
            Ok(None) => {
                trace!(call_id, "request fragment buffered");
                Ok(None)
            }
            Ok(Some(stub)) => {
                assoc.partial.remove(&call_id);
                let mut whole = request;
                whole.alloc_hint = stub.len() as u32;
                whole.stub_data = stub;
                whole.object_uuid = object;
                Ok(Some(whole))
            }
            Err(e) => {
                assoc.partial.remove(&call_id);
                warn!(call_id, error = %e, "request reassembly failed");
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                send(tx, fault_frames(&request.header, request.context_id, e.fault_status())).await?;
                Ok(None)
            }
        }
    }

    async fn dispatch(
        &self,
        request: RequestPdu,
        assoc: &Association,
        tx: &mpsc::Sender<Vec<Bytes>>,
    ) -> Result<()> {
        self.stats.requests_received.fetch_add(1, Ordering::Relaxed);
        debug!(
            call_id = request.header.call_id,
            opnum = request.opnum,
            context_id = request.context_id,
            stub_len = request.stub_data.len(),
            "request"
        );

        let Some(handle) = assoc.contexts.get(&request.context_id).cloned() else {
            debug!(context_id = request.context_id, "request on unknown context");
            self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            return send(
                tx,
                fault_frames(&request.header, request.context_id, FaultStatus::UnkIf),
            )
            .await;
        };

        let stats = Arc::clone(&self.stats);
        let tx = tx.clone();
        let max_xmit_frag = assoc.max_xmit_frag;
        tokio::spawn(async move {
            let frames = execute(handle, request, max_xmit_frag, &stats).await;
            // A closed channel means the connection is gone.
            let _ = tx.send(frames).await;
        });
        Ok(())
    }
}

/// Run one request and produce the frames of its reply.
async fn execute(
    handle: Arc<dyn ServerHandle>,
    request: RequestPdu,
    max_xmit_frag: u16,
    stats: &ServerStats,
) -> Vec<Bytes> {
    let header = request.header;
    let ctx = header.ndr_context();
    let stub = StubData {
        data: request.stub_data,
        ctx,
        object: request.object_uuid,
    };

    let result = match handle.handle(request.opnum, stub).await {
        Ok(mut op) => operation::marshal_response(op.as_mut(), ctx).and_then(|data| {
            let mut response = ResponsePdu::new(header.call_id, data);
            response.header.data_rep = header.data_rep;
            response.context_id = request.context_id;
            FragmentGenerator::encode_response(&response, max_xmit_frag)
        }),
        Err(e) => Err(e),
    };

    match result {
        Ok(frames) => {
            stats.requests_processed.fetch_add(1, Ordering::Relaxed);
            frames
        }
        Err(e) => {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = e.fault_status();
            if e.is_not_implemented() {
                debug!(call_id = header.call_id, opnum = request.opnum, "operation not implemented");
            } else {
                warn!(call_id = header.call_id, opnum = request.opnum, error = %e, "operation failed");
            }
            fault_frames(&header, request.context_id, status)
        }
    }
}

fn fault_frames(header: &PduHeader, context_id: u16, status: FaultStatus) -> Vec<Bytes> {
    let mut fault = FaultPdu::new(header.call_id, status);
    fault.header.data_rep = header.data_rep;
    fault.context_id = context_id;
    match fault.encode() {
        Ok(frame) => vec![frame],
        Err(e) => {
            error!(call_id = header.call_id, error = %e, "failed to encode fault");
            Vec::new()
        }
    }
}

async fn send(tx: &mpsc::Sender<Vec<Bytes>>, frames: Vec<Bytes>) -> Result<()> {
    tx.send(frames).await.map_err(|_| RpcError::ConnectionClosed)
}
