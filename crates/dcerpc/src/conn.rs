//! Client connection
//!
//! A [`Conn`] is a cheaply cloneable handle to one transport. Any number of
//! calls may be in flight at once: every call registers a waiter keyed by its
//! call id, a background reader task routes incoming PDUs to the waiters and
//! reassembles fragmented responses, and a background writer task puts each
//! call's fragments on the wire back to back.
//!
//! The writer owns the outgoing half of the stream. A caller hands it the
//! complete list of fragments of one PDU and only then awaits, so dropping a
//! call future (timeout, cancellation) can never leave half a call on the
//! wire.
//!
//! # Connection state
//!
//! ```text
//! Unbound --bind--> Bound(syntaxes) --alter_context--> Bound(more syntaxes)
//!    |                    |
//!    +------close---------+--> Closed
//! ```

use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::hresult;
use crate::operation::{self, CallOptions, Operation, Request, Response};
use crate::pdu::{
    BindAckPdu, BindPdu, ContextElement, DataRepresentation, PacketFlags, Pdu, PduHeader,
    RequestPdu, ResponsePdu, SyntaxId, DEFAULT_MAX_FRAG,
};
use crate::transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default time a call waits for its reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Largest fragment we send; lowered to the server's receive size at bind
    pub max_xmit_frag: u16,
    /// Largest fragment we accept
    pub max_recv_frag: u16,
    pub call_timeout: Duration,
    pub data_representation: DataRepresentation,
    /// Association group to join; 0 asks the server for a new one
    pub assoc_group_id: u32,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            data_representation: DataRepresentation::ndr(),
            assoc_group_id: 0,
        }
    }
}

impl ConnConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_xmit_frag(mut self, size: u16) -> Self {
        self.max_xmit_frag = size;
        self
    }

    pub fn max_recv_frag(mut self, size: u16) -> Self {
        self.max_recv_frag = size;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn data_representation(mut self, data_rep: DataRepresentation) -> Self {
        self.data_representation = data_rep;
        self
    }

    pub fn assoc_group_id(mut self, assoc_group_id: u32) -> Self {
        self.assoc_group_id = assoc_group_id;
        self
    }
}

enum Outgoing {
    /// All fragments of one PDU sequence
    Frames(Vec<Bytes>),
    Shutdown(oneshot::Sender<()>),
}

type Waiter = oneshot::Sender<Result<Pdu>>;

/// Calls awaiting a reply
#[derive(Default)]
struct CallTable {
    pending: Mutex<HashMap<u32, Waiter>>,
    closed: AtomicBool,
}

impl CallTable {
    fn register(&self, call_id: u32, waiter: Waiter) -> Result<()> {
        let mut pending = self.pending.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionClosed);
        }
        pending.insert(call_id, waiter);
        Ok(())
    }

    fn complete(&self, call_id: u32, result: Result<Pdu>) {
        match self.pending.lock().remove(&call_id) {
            Some(waiter) => {
                // The caller may have given up already.
                let _ = waiter.send(result);
            }
            None => debug!(call_id, "dropping reply for unknown call"),
        }
    }

    fn is_pending(&self, call_id: u32) -> bool {
        self.pending.lock().contains_key(&call_id)
    }

    fn forget(&self, call_id: u32) {
        self.pending.lock().remove(&call_id);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection closed and fail every waiting call.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending calls");
        }
        for (_, waiter) in drained {
            let _ = waiter.send(Err(RpcError::ConnectionClosed));
        }
    }
}

/// Removes a call's waiter however the call ends.
struct PendingGuard<'a> {
    calls: &'a CallTable,
    call_id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.forget(self.call_id);
    }
}

/// Negotiated presentation contexts
#[derive(Debug, Default)]
struct ContextTable {
    ids: HashMap<SyntaxId, u16>,
    next_id: u16,
    bound: bool,
    assoc_group_id: u32,
}

struct Shared {
    config: ConnConfig,
    outgoing: mpsc::Sender<Outgoing>,
    calls: Arc<CallTable>,
    contexts: RwLock<ContextTable>,
    /// Serializes bind and alter-context exchanges
    negotiation: tokio::sync::Mutex<()>,
    next_call_id: AtomicU32,
    max_xmit_frag: AtomicU16,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Handle to a DCE/RPC connection
///
/// Clones share the transport and the negotiated contexts. A handle may be
/// scoped to one abstract syntax, which its calls use unless
/// [`CallOptions::abstract_syntax`] overrides it.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
    scope: Option<SyntaxId>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("scope", &self.scope)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Conn {
    /// Connect over TCP. The connection starts unbound.
    pub async fn connect(addr: SocketAddr, config: ConnConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(%addr, "connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Run the connection over an existing stream.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ConnConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let max_pdu = usize::from(config.max_recv_frag).max(DEFAULT_MAX_PDU_SIZE);
        let reader = DceRpcTransport::new(read_half).with_max_pdu_size(max_pdu);
        let writer = DceRpcTransport::new(write_half);

        let calls = Arc::new(CallTable::default());
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(write_loop(writer, rx, Arc::clone(&calls)));
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&calls)));

        let contexts = ContextTable {
            assoc_group_id: config.assoc_group_id,
            ..Default::default()
        };
        let max_xmit_frag = config.max_xmit_frag;
        Self {
            shared: Arc::new(Shared {
                config,
                outgoing: tx,
                calls,
                contexts: RwLock::new(contexts),
                negotiation: tokio::sync::Mutex::new(()),
                next_call_id: AtomicU32::new(1),
                max_xmit_frag: AtomicU16::new(max_xmit_frag),
                reader: Mutex::new(Some(reader)),
            }),
            scope: None,
        }
    }

    pub fn config(&self) -> &ConnConfig {
        &self.shared.config
    }

    /// Abstract syntax this handle calls by default
    pub fn scope(&self) -> Option<SyntaxId> {
        self.scope
    }

    pub fn is_bound(&self) -> bool {
        self.shared.contexts.read().bound
    }

    pub fn is_closed(&self) -> bool {
        self.shared.calls.is_closed()
    }

    /// Association group assigned by the server at bind
    pub fn assoc_group_id(&self) -> u32 {
        self.shared.contexts.read().assoc_group_id
    }

    /// Fragment size used for outgoing calls
    pub fn max_xmit_frag(&self) -> u16 {
        self.shared.max_xmit_frag.load(Ordering::Relaxed)
    }

    /// Presentation context id of a negotiated syntax
    pub fn context_id(&self, syntax: &SyntaxId) -> Option<u16> {
        self.shared.contexts.read().ids.get(syntax).copied()
    }

    /// Negotiate `syntaxes` and scope this handle to the first one accepted.
    ///
    /// Sends BIND on an unbound connection and ALTER_CONTEXT otherwise;
    /// syntaxes already negotiated are not proposed again.
    pub async fn bind(&mut self, syntaxes: &[SyntaxId]) -> Result<()> {
        if syntaxes.is_empty() {
            return Err(RpcError::BindFailed("no abstract syntax given".to_string()));
        }
        self.negotiate(syntaxes).await?;
        let scope = syntaxes.iter().copied().find(|s| self.context_id(s).is_some());
        self.scope = scope;
        Ok(())
    }

    /// Add presentation contexts to a bound connection.
    ///
    /// Calls on syntaxes negotiated earlier proceed while this runs.
    pub async fn alter_context(&self, syntaxes: &[SyntaxId]) -> Result<()> {
        if !self.is_bound() {
            return Err(RpcError::NotBound);
        }
        self.negotiate(syntaxes).await
    }

    /// Handle scoped to `syntax` on the same transport.
    ///
    /// The syntax is negotiated first if needed. When the server will not
    /// add it, the parent handle is returned unchanged and calls keep
    /// travelling over the parent's context.
    pub async fn sub_conn(&self, syntax: SyntaxId) -> Result<Conn> {
        if self.context_id(&syntax).is_none() {
            match self.negotiate(&[syntax]).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%syntax, error = %e, "sub-connection not negotiated, reusing parent");
                    return Ok(self.clone());
                }
            }
        }
        Ok(Conn {
            shared: Arc::clone(&self.shared),
            scope: Some(syntax),
        })
    }

    async fn negotiate(&self, syntaxes: &[SyntaxId]) -> Result<()> {
        self.ensure_open()?;
        let _negotiating = self.shared.negotiation.lock().await;

        let (bound, assoc_group_id, proposals) = {
            let table = self.shared.contexts.read();
            let mut next_id = table.next_id;
            let mut proposals: Vec<ContextElement> = Vec::new();
            for syntax in syntaxes {
                if table.ids.contains_key(syntax)
                    || proposals.iter().any(|p| p.abstract_syntax == *syntax)
                {
                    continue;
                }
                proposals.push(ContextElement::new(next_id, *syntax));
                next_id = next_id.wrapping_add(1);
            }
            (table.bound, table.assoc_group_id, proposals)
        };
        if proposals.is_empty() {
            return Ok(());
        }

        let call_id = self.next_call_id();
        let mut pdu = if bound {
            BindPdu::alter_context(call_id, proposals.clone())
        } else {
            BindPdu::new(call_id, proposals.clone())
        };
        pdu.header.data_rep = self.shared.config.data_representation;
        pdu.max_xmit_frag = self.shared.config.max_xmit_frag;
        pdu.max_recv_frag = self.shared.config.max_recv_frag;
        pdu.assoc_group_id = assoc_group_id;

        debug!(
            call_id,
            contexts = proposals.len(),
            alter = bound,
            "negotiating presentation contexts"
        );
        let reply = self
            .round_trip(call_id, vec![pdu.encode()?], self.shared.config.call_timeout)
            .await?;

        let ack = match (reply, bound) {
            (Pdu::BindAck(ack), false) | (Pdu::AlterContextResp(ack), true) => ack,
            (Pdu::BindNak(nak), _) => {
                warn!(call_id, reason = nak.reject_reason, "bind rejected");
                return Err(RpcError::BindRejected(nak.reject_reason));
            }
            (Pdu::Fault(fault), _) => return Err(RpcError::Fault(fault.status)),
            (other, _) => {
                return Err(RpcError::UnexpectedPdu {
                    expected: if bound { "alter_context_resp" } else { "bind_ack" },
                    got: format!("{:?}", other.header().packet_type),
                })
            }
        };
        self.apply_ack(&ack, &proposals, bound)
    }

    fn apply_ack(&self, ack: &BindAckPdu, proposals: &[ContextElement], alter: bool) -> Result<()> {
        let mut accepted = 0;
        let mut table = self.shared.contexts.write();
        for (i, proposal) in proposals.iter().enumerate() {
            match ack.results.get(i) {
                Some(entry) if entry.is_accepted() => {
                    table.ids.insert(proposal.abstract_syntax, proposal.context_id);
                    accepted += 1;
                    debug!(
                        syntax = %proposal.abstract_syntax,
                        context_id = proposal.context_id,
                        "presentation context accepted"
                    );
                }
                Some(entry) => debug!(
                    syntax = %proposal.abstract_syntax,
                    reason = entry.reason,
                    "presentation context rejected"
                ),
                None => debug!(syntax = %proposal.abstract_syntax, "presentation context missing from reply"),
            }
        }
        // Rejected ids are not reused.
        table.next_id = table.next_id.wrapping_add(proposals.len() as u16);

        if !alter {
            table.bound = accepted > 0;
            table.assoc_group_id = ack.assoc_group_id;
            let max_xmit = self.shared.config.max_xmit_frag.min(ack.max_recv_frag);
            self.shared.max_xmit_frag.store(max_xmit, Ordering::Relaxed);
            info!(
                assoc_group_id = ack.assoc_group_id,
                max_xmit_frag = max_xmit,
                accepted,
                "bound"
            );
        }

        if accepted == 0 {
            let names: Vec<String> = proposals
                .iter()
                .map(|p| p.abstract_syntax.to_string())
                .collect();
            return Err(RpcError::BindFailed(format!(
                "no presentation context accepted for {}",
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// Send `op` and fill in its response fields.
    ///
    /// Blocks the caller until the reply arrives or the timeout expires.
    pub async fn invoke(&self, op: &mut dyn Operation, opts: &CallOptions) -> Result<()> {
        opts.validate()?;
        self.ensure_open()?;
        let syntax = opts
            .abstract_syntax
            .or(self.scope)
            .ok_or(RpcError::NotBound)?;
        let context_id = self
            .context_id(&syntax)
            .ok_or(RpcError::ContextNotNegotiated(syntax))?;

        let data_rep = self.shared.config.data_representation;
        let stub = operation::marshal_request(op, data_rep.ndr_context())?;

        let call_id = self.next_call_id();
        let mut request = RequestPdu::new(call_id, op.opnum(), stub);
        request.header.data_rep = data_rep;
        request.context_id = context_id;
        request.object_uuid = opts.object;
        let frames = FragmentGenerator::encode_request(&request, self.max_xmit_frag())?;

        debug!(
            call_id,
            opnum = op.opnum(),
            opname = op.opname(),
            context_id,
            fragments = frames.len(),
            "invoking"
        );
        let timeout = opts.timeout.unwrap_or(self.shared.config.call_timeout);
        match self.round_trip(call_id, frames, timeout).await? {
            Pdu::Response(response) => {
                trace!(call_id, len = response.stub_data.len(), "response received");
                let ctx = response.header.ndr_context();
                operation::unmarshal_response(op, response.stub_data, ctx)
            }
            Pdu::Fault(fault) => {
                debug!(call_id, status = %format!("0x{:08x}", fault.status), "call faulted");
                Err(RpcError::Fault(fault.status))
            }
            other => Err(RpcError::UnexpectedPdu {
                expected: "response",
                got: format!("{:?}", other.header().packet_type),
            }),
        }
    }

    /// Invoke with request/response values and check the HRESULT return.
    pub async fn call<Req, Resp>(&self, request: Req, opts: &CallOptions) -> Result<Resp>
    where
        Req: Request,
        Resp: Response<Operation = Req::Operation>,
    {
        let mut op = request.into_operation();
        self.invoke(&mut op, opts).await?;
        let response = Resp::from_operation(&mut op);
        if let Some(code) = response.return_code() {
            hresult::check_return(op.opname(), code)?;
        }
        Ok(response)
    }

    /// Close the connection. Calls still waiting fail with
    /// [`RpcError::ConnectionClosed`], as does everything after.
    pub async fn close(&self) -> Result<()> {
        self.shared.calls.fail_all();
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .shared
            .outgoing
            .send(Outgoing::Shutdown(done_tx))
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
        debug!("connection closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        Ok(())
    }

    fn next_call_id(&self) -> u32 {
        self.shared.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn round_trip(&self, call_id: u32, frames: Vec<Bytes>, timeout: Duration) -> Result<Pdu> {
        let (tx, rx) = oneshot::channel();
        self.shared.calls.register(call_id, tx)?;
        let _pending = PendingGuard {
            calls: &self.shared.calls,
            call_id,
        };

        self.shared
            .outgoing
            .send(Outgoing::Frames(frames))
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                debug!(call_id, ?timeout, "call timed out");
                Err(RpcError::Timeout)
            }
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }
}

async fn write_loop<W>(
    mut transport: DceRpcTransport<W>,
    mut rx: mpsc::Receiver<Outgoing>,
    calls: Arc<CallTable>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        match message {
            Outgoing::Frames(frames) => {
                if let Err(e) = transport.write_frames(&frames).await {
                    warn!(error = %e, "write failed, tearing down connection");
                    calls.fail_all();
                    return;
                }
            }
            Outgoing::Shutdown(done) => {
                if let Err(e) = transport.shutdown().await {
                    debug!(error = %e, "shutdown failed");
                }
                let _ = done.send(());
                return;
            }
        }
    }
}

async fn read_loop<R>(mut transport: DceRpcTransport<R>, calls: Arc<CallTable>)
where
    R: AsyncRead + Unpin,
{
    let mut partial: HashMap<u32, FragmentAssembler> = HashMap::new();
    loop {
        let data = match transport.read_pdu().await {
            Ok(data) => data,
            Err(RpcError::ConnectionClosed) => {
                debug!("peer closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed, tearing down connection");
                break;
            }
        };

        let pdu = match Pdu::decode(&data) {
            Ok(pdu) => pdu,
            Err(e) => {
                match PduHeader::decode(&data) {
                    Ok(header) => calls.complete(header.call_id, Err(e)),
                    Err(_) => warn!(error = %e, "undecodable PDU"),
                }
                continue;
            }
        };

        let call_id = pdu.call_id();
        match pdu {
            // Only calls still awaiting a reply get a reassembly buffer.
            Pdu::Response(_) if !calls.is_pending(call_id) => {
                partial.remove(&call_id);
                debug!(call_id, "dropping response fragment for unknown call");
            }
            Pdu::Response(response) => {
                if let Some(result) = reassemble(&mut partial, response) {
                    calls.complete(call_id, result);
                }
            }
            Pdu::Shutdown(_) => {
                info!("server requested shutdown");
                break;
            }
            Pdu::CoCancel(_) | Pdu::Orphaned(_) => {
                warn!(call_id, "unexpected client-only PDU from server");
            }
            other => {
                partial.remove(&call_id);
                calls.complete(call_id, Ok(other));
            }
        }
    }
    calls.fail_all();
}

/// Feed one response fragment; returns the whole response once complete.
fn reassemble(
    partial: &mut HashMap<u32, FragmentAssembler>,
    response: ResponsePdu,
) -> Option<Result<Pdu>> {
    let flags = response.header.packet_flags;
    let call_id = response.header.call_id;
    if flags.is_first_frag() && flags.is_last_frag() && !partial.contains_key(&call_id) {
        return Some(Ok(Pdu::Response(response)));
    }

    let assembler = partial
        .entry(call_id)
        .or_insert_with(|| FragmentAssembler::new(call_id));
    let added = assembler.add_fragment(
        &response.header,
        &response.stub_data,
        response.context_id,
        None,
    );
    match added {
        Ok(None) => {
            trace!(call_id, "response fragment buffered");
            None
        }
        Ok(Some(stub)) => {
            partial.remove(&call_id);
            let mut whole = response;
            whole.alloc_hint = stub.len() as u32;
            whole.stub_data = stub;
            whole.header.packet_flags = PacketFlags::complete();
            Some(Ok(Pdu::Response(whole)))
        }
        Err(e) => {
            partial.remove(&call_id);
            Some(Err(e))
        }
    }
}
