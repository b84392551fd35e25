//! Single-writer transaction queue.
//!
//! All state-changing transactions from every job go through one task, so
//! two transactions are never in flight with the same nonce. Requests whose
//! caller has gone away (e.g. the cycle timed out) are dropped unsent;
//! a request already being submitted runs to completion.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{TxRequest, TxSubmitter};
use crate::error::{ChainError, TxOutcome};

/// Queue depth before `submit` waits.
pub const DEFAULT_WRITER_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<TxOutcome, ChainError>>;

struct WriteJob {
    request: TxRequest,
    reply: Reply,
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct TxWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl TxWriter {
    /// Spawn the writer task.
    ///
    /// The task exits once every `TxWriter` clone is dropped and the queue
    /// has drained.
    pub fn spawn(submitter: Arc<dyn TxSubmitter>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(submitter, rx));
        (Self { tx }, handle)
    }

    /// Queue a request and return the receiver for its result.
    pub async fn enqueue(
        &self,
        request: TxRequest,
    ) -> Result<oneshot::Receiver<Result<TxOutcome, ChainError>>, ChainError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteJob { request, reply })
            .await
            .map_err(|_| ChainError::WriterClosed)?;
        Ok(rx)
    }

    /// Queue a request and wait for its outcome.
    pub async fn submit(&self, request: TxRequest) -> Result<TxOutcome, ChainError> {
        let rx = self.enqueue(request).await?;
        rx.await.map_err(|_| ChainError::WriterClosed)?
    }
}

impl std::fmt::Debug for TxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxWriter")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_writer(submitter: Arc<dyn TxSubmitter>, mut rx: mpsc::Receiver<WriteJob>) {
    info!("Transaction writer started");
    let mut processed = 0u64;

    while let Some(job) = rx.recv().await {
        if job.reply.is_closed() {
            debug!(label = %job.request.target, "Caller gone, dropping queued transaction");
            continue;
        }

        let target = job.request.target.clone();
        let result = submitter.submit(job.request).await;
        processed += 1;

        if let Err(e) = &result {
            warn!(label = %target, error = %e, "Queued transaction failed");
        }
        if job.reply.send(result).is_err() {
            debug!(label = %target, "Caller gone before result was delivered");
        }
    }

    info!(processed, "Transaction writer stopped");
}
