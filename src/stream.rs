//! Streaming of operation output to a caller
//!
//! Long operations produce a channel of whole lines plus a one-shot
//! completion signal. [`relay`] pushes both to a [`LineSink`], interleaving a
//! keep-alive marker so idle transports are not reaped while a build runs.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::{ClusterError, ExecError, TeresaError};

/// Zero-width space: invisible on a terminal, enough to keep a stream alive
pub const KEEP_ALIVE_MARKER: &str = "\u{200B}";

/// Lines buffered between an operation and its reader
pub const PROGRESS_BUFFER: usize = 128;

/// Completion of a streamed operation
pub type Completion = oneshot::Receiver<Result<(), TeresaError>>;

/// Cloneable writer of progress lines.
///
/// Writes never fail: once the reader is gone lines are dropped and the
/// operation carries on.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: mpsc::Sender<String>,
}

impl Progress {
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    pub async fn line(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).await.is_err() {
            debug!("progress reader gone, dropping line");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cancels the [`OpContext`]s it was created with
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Cancellation and deadline of one caller operation
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that is never canceled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn cancellable() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle(tx),
            Self {
                cancel: Some(rx),
                deadline: None,
            },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Why the context ended, if it did
    pub fn err(&self) -> Option<ExecError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(ExecError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ExecError::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is canceled or its deadline passes; pending forever otherwise
    pub async fn done(&self) -> ExecError {
        let canceled = async {
            match self.cancel.clone() {
                // a dropped handle can no longer cancel
                Some(mut rx) => {
                    if rx.wait_for(|c| *c).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = canceled => ExecError::Canceled,
            _ = expired => ExecError::DeadlineExceeded,
        }
    }
}

/// Push transport for relayed lines
#[async_trait]
pub trait LineSink: Send {
    async fn send_line(&mut self, line: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl LineSink for mpsc::Sender<String> {
    async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.send(line.to_string())
            .await
            .map_err(|_| anyhow::anyhow!("line sink closed"))
    }
}

fn lost_completion() -> TeresaError {
    ClusterError::Internal(anyhow::anyhow!("operation ended without a result")).into()
}

async fn send(sink: &mut impl LineSink, line: &str) -> Result<(), TeresaError> {
    sink.send_line(line).await.map_err(|e| {
        debug!(error = %e, "caller stream gone");
        TeresaError::from(ExecError::Canceled)
    })
}

/// Relay `lines` to `sink` until the operation completes.
///
/// An error completion or a canceled context returns at once and drops
/// whatever lines are still queued. A successful completion is only
/// returned after the line channel closes, so no output is lost.
pub async fn relay<S: LineSink>(
    keep_alive: Duration,
    mut lines: mpsc::Receiver<String>,
    mut done: Completion,
    ctx: &OpContext,
    sink: &mut S,
) -> Result<(), TeresaError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut finished = false;

    loop {
        tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            res = &mut done, if !finished => {
                match res {
                    Ok(Ok(())) => finished = true,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(lost_completion()),
                }
            }
            line = lines.recv() => match line {
                Some(line) => send(sink, &line).await?,
                None => break,
            },
            _ = ticker.tick() => send(sink, KEEP_ALIVE_MARKER).await?,
        }
    }

    if finished {
        return Ok(());
    }
    tokio::select! {
        err = ctx.done() => Err(err.into()),
        res = done => res.unwrap_or_else(|_| Err(lost_completion())),
    }
}
