//! Server-side opnum routing
//!
//! An interface is served by a [`ServerHandle`]. Interfaces that extend a
//! base interface are served by an [`OpnumTable`]: an ordered list of
//! opnum ranges, most derived first, so every inheritance level is one more
//! entry in front of its base.
//!
//! ```text
//! IDerived2  [5..]  -> derived2 handle
//! IDerived   [3..5) -> derived handle
//! IUnknown   [0..3) -> unknown handle
//! ```
//!
//! Handles see absolute opnums.

use crate::error::{Result, RpcError};
use crate::operation::{Operation, Request, Response, StubData};
use async_trait::async_trait;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::trace;

/// Serves the methods of one interface.
///
/// Returns the operation with its response fields filled in; the server
/// marshals it. Methods the handle does not provide return
/// [`RpcError::NotImplemented`], which the server answers with a fault.
#[async_trait]
pub trait ServerHandle: Send + Sync {
    async fn handle(&self, opnum: u16, stub: StubData) -> Result<Box<dyn Operation>>;
}

#[derive(Clone)]
struct OpnumRange {
    opnums: RangeInclusive<u16>,
    handle: Arc<dyn ServerHandle>,
}

/// Ordered opnum ranges, evaluated first to last.
#[derive(Clone, Default)]
pub struct OpnumTable {
    entries: Vec<OpnumRange>,
}

impl std::fmt::Debug for OpnumTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.opnums.clone()))
            .finish()
    }
}

impl OpnumTable {
    /// Table whose every opnum goes to `handle`.
    pub fn new(handle: Arc<dyn ServerHandle>) -> Self {
        Self {
            entries: vec![OpnumRange {
                opnums: 0..=u16::MAX,
                handle,
            }],
        }
    }

    /// Opnums below `base_count` go to `base`, the rest to `handle`.
    pub fn extend(base: OpnumTable, base_count: u16, handle: Arc<dyn ServerHandle>) -> Self {
        let mut entries = vec![OpnumRange {
            opnums: base_count..=u16::MAX,
            handle,
        }];
        if let Some(last_base) = base_count.checked_sub(1) {
            entries.extend(base.entries.into_iter().filter_map(|entry| {
                let start = *entry.opnums.start();
                let end = (*entry.opnums.end()).min(last_base);
                (start <= end).then(|| OpnumRange {
                    opnums: start..=end,
                    handle: entry.handle,
                })
            }));
        }
        Self { entries }
    }

    /// Handle serving `opnum`
    pub fn lookup(&self, opnum: u16) -> Option<&Arc<dyn ServerHandle>> {
        self.entries
            .iter()
            .find(|entry| entry.opnums.contains(&opnum))
            .map(|entry| &entry.handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ServerHandle for OpnumTable {
    async fn handle(&self, opnum: u16, stub: StubData) -> Result<Box<dyn Operation>> {
        let handle = self
            .lookup(opnum)
            .ok_or(RpcError::OperationUnavailable(opnum))?;
        trace!(opnum, "dispatching");
        handle.handle(opnum, stub).await
    }
}

/// Run one method on the server side.
///
/// Decodes the request into a fresh operation, passes the request value to
/// `handler`, and stores its response in the operation for marshaling.
pub async fn serve<Req, Resp, F, Fut>(stub: StubData, handler: F) -> Result<Box<dyn Operation>>
where
    Req: Request,
    Req::Operation: 'static,
    Resp: Response<Operation = Req::Operation>,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp>>,
{
    let mut op = Req::Operation::default();
    stub.unmarshal_request(&mut op)?;
    let request = Req::from_operation(&mut op);
    let response = handler(request).await?;
    response.into_operation(&mut op);
    Ok(Box::new(op))
}
