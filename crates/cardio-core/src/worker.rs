use crate::clock::Clock;
use crate::complete::CompletionSink;
use crate::engine::{BlockEngine, RequestOutcome};
use crate::error::{EngineError, EngineErrorKind, EngineResult};
use crate::lifecycle::DeviceLifecycle;
use crate::request::Request;
use crate::transport::CommandTransport;
use futures_channel::{mpsc, oneshot};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Handle used to queue requests onto a device's worker.
#[derive(Clone)]
pub struct IoWorkerHandle {
    cmd_tx: mpsc::UnboundedSender<WorkerCmd>,
}

/// Future that drives the worker. Callers spawn this on their executor of
/// choice.
pub struct IoWorkerTask {
    inner: BoxFuture<'static, ()>,
}

impl Future for IoWorkerTask {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

enum WorkerCmd {
    Submit {
        request: Request,
        sink: Box<dyn CompletionSink>,
        reply: oneshot::Sender<EngineResult<RequestOutcome>>,
    },
    Shutdown,
}

/// Start the sequential worker for one device.
///
/// Requests are processed strictly in submission order, one at a time; the
/// single worker mirrors the single shared bus underneath the transport.
pub fn start_io_worker<T, L, K>(engine: BlockEngine<T, L, K>) -> (IoWorkerHandle, IoWorkerTask)
where
    T: CommandTransport + 'static,
    L: DeviceLifecycle + 'static,
    K: Clock + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded();
    let task = IoWorkerTask {
        inner: run_worker(engine, cmd_rx).boxed(),
    };
    (IoWorkerHandle { cmd_tx }, task)
}

impl IoWorkerHandle {
    /// Queue a request and wait for its resolution.
    pub async fn submit(
        &self,
        request: Request,
        sink: Box<dyn CompletionSink>,
    ) -> EngineResult<RequestOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .unbounded_send(WorkerCmd::Submit {
                request,
                sink,
                reply: reply_tx,
            })
            .map_err(|_| worker_gone())?;
        reply_rx.await.unwrap_or_else(|_| Err(worker_gone()))
    }

    /// Ask the worker to stop after the in-flight request, if any.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.unbounded_send(WorkerCmd::Shutdown);
    }
}

async fn run_worker<T, L, K>(
    engine: BlockEngine<T, L, K>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCmd>,
) where
    T: CommandTransport,
    L: DeviceLifecycle,
    K: Clock,
{
    while let Some(cmd) = cmd_rx.next().await {
        match cmd {
            WorkerCmd::Submit {
                request,
                mut sink,
                reply,
            } => {
                let result = engine.submit(&request, sink.as_mut()).await;
                let _ = reply.send(result);
            }
            WorkerCmd::Shutdown => break,
        }
    }
}

fn worker_gone() -> EngineError {
    EngineError::with_message(EngineErrorKind::Internal, "worker not running")
}
