//! Clients for remote COM objects
//!
//! An [`ObjectClient`] is a connection handle plus the IPID of the interface
//! it talks to. Clients for other interfaces of the same object are derived
//! from it and share its connection; only the IPID differs.

use crate::call::{IpidOptions, OrpcCall};
use crate::types::{DcomError, Ipid, Result};
use msrpc_dcerpc::{hresult, CallOptions, Conn, Operation, Request, Response, SyntaxId};
use tracing::debug;

/// Handle to one interface of a remote object
#[derive(Clone, Debug)]
pub struct ObjectClient {
    conn: Conn,
    ipid: Option<Ipid>,
}

impl ObjectClient {
    /// Client over a handle already scoped to the interface's syntax.
    pub fn new(conn: Conn, ipid: Option<Ipid>) -> Self {
        Self { conn, ipid }
    }

    /// Client for `syntax` on `conn`.
    ///
    /// An unbound connection is bound to `syntax`; a bound one gets a
    /// sub-connection for it, which falls back to the parent's context when
    /// the server will not add the syntax.
    pub async fn bind(conn: &Conn, syntax: SyntaxId, ipid: Option<Ipid>) -> Result<Self> {
        let conn = if conn.is_bound() {
            conn.sub_conn(syntax).await?
        } else {
            let mut conn = conn.clone();
            conn.bind(&[syntax]).await?;
            conn
        };
        Ok(Self { conn, ipid })
    }

    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// Default IPID for calls that do not name one
    pub fn ipid(&self) -> Option<Ipid> {
        self.ipid
    }

    /// Client for another interface pointer over the same connection.
    pub fn with_ipid(&self, ipid: Ipid) -> Self {
        Self {
            conn: self.conn.clone(),
            ipid: Some(ipid),
        }
    }

    /// Client for interface `syntax` of the same object, addressed by `ipid`.
    pub async fn query(&self, syntax: SyntaxId, ipid: Ipid) -> Result<Self> {
        let conn = self.conn.sub_conn(syntax).await?;
        debug!(%syntax, %ipid, "derived object client");
        Ok(Self {
            conn,
            ipid: Some(ipid),
        })
    }

    pub async fn alter_context(&self, syntaxes: &[SyntaxId]) -> Result<()> {
        Ok(self.conn.alter_context(syntaxes).await?)
    }

    /// Options carrying the IPID this call addresses.
    fn resolve(&self, opname: &'static str, opts: &CallOptions) -> Result<CallOptions> {
        if opts.has_ipid() {
            return Ok(opts.clone());
        }
        match self.ipid {
            Some(ipid) => Ok(opts.clone().with_ipid(ipid)),
            None => Err(DcomError::MissingIpid { operation: opname }),
        }
    }

    /// Invoke an operation that carries its own ORPC envelope, usually an
    /// [`OrpcCall`].
    ///
    /// Fails with [`DcomError::MissingIpid`] before sending anything when
    /// neither `opts` nor the client supplies an IPID.
    pub async fn invoke(&self, op: &mut dyn Operation, opts: &CallOptions) -> Result<()> {
        let opts = self.resolve(op.opname(), opts)?;
        Ok(self.conn.invoke(op, &opts).await?)
    }

    /// Call a method with request/response values inside a fresh ORPC
    /// envelope and check its HRESULT return.
    pub async fn call<Req, Resp>(&self, request: Req, opts: &CallOptions) -> Result<Resp>
    where
        Req: Request,
        Resp: Response<Operation = Req::Operation>,
    {
        let mut call = OrpcCall::new(request.into_operation());
        self.invoke(&mut call, opts).await?;
        let response = Resp::from_operation(&mut call.inner);
        if let Some(code) = response.return_code() {
            hresult::check_return(call.opname(), code)?;
        }
        Ok(response)
    }
}
