//! Handle on a submitted transaction's result

use doradb_core::{Error, Result, TrxResult, TxnId};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::stats::TrxKind;

/// Resolves once the transaction's terminal RVP has finalized
///
/// Await it from async code or call [`TrxFuture::wait`] from a plain
/// thread. Resolves to [`Error::Abandoned`] if the engine dropped the
/// transaction without finalizing it.
#[derive(Debug)]
#[must_use = "a transaction result is only observable through its future"]
pub struct TrxFuture {
    txn_id: TxnId,
    kind: TrxKind,
    rx: oneshot::Receiver<TrxResult>,
}

impl TrxFuture {
    pub(crate) fn new(txn_id: TxnId, kind: TrxKind, rx: oneshot::Receiver<TrxResult>) -> Self {
        TrxFuture { txn_id, kind, rx }
    }

    /// Transaction id assigned at submission
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Transaction type
    pub fn kind(&self) -> TrxKind {
        self.kind
    }

    /// Block the current thread until the result arrives
    ///
    /// Panics when called from inside an async runtime; await the future
    /// there instead.
    pub fn wait(self) -> Result<TrxResult> {
        let txn = self.txn_id;
        self.rx.blocking_recv().map_err(|_| Error::Abandoned(txn))
    }

    /// The result, if it is already there
    ///
    /// Returns `None` while the transaction is in flight. Once a result was
    /// returned, later calls report the transaction as abandoned.
    pub fn try_result(&mut self) -> Option<Result<TrxResult>> {
        match self.rx.try_recv() {
            Ok(result) => Some(Ok(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Error::Abandoned(self.txn_id))),
        }
    }
}

impl Future for TrxFuture {
    type Output = Result<TrxResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let txn = self.txn_id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::Abandoned(txn)))
    }
}
