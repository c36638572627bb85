//! Single-owner async front end for [`Calibrator`].
//!
//! The transport receive path and the UI both talk to one task through
//! channels; that task is the only place session state is touched. Cancels
//! travel on their own channel and are polled first, so a cancel never queues
//! behind protocol traffic.

use fcal_proto::{Inbound, Outbound, SensorKind, SessionId};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::calibrator::Calibrator;
use crate::error::EngineError;
use crate::session::CalibrationSession;
use crate::snapshot::StateSnapshot;
use crate::EngineConfig;

const REQUEST_QUEUE: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Request {
    Start { sensor: SensorKind, reply: Reply<SessionId> },
    Confirm { reply: Reply<()> },
    Inbound(Inbound),
    Session { reply: oneshot::Sender<Option<CalibrationSession>> },
}

pub struct CalibrationService {
    calibrator: Calibrator,
    requests: mpsc::Receiver<Request>,
    cancels: mpsc::Receiver<Reply<()>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    snapshots: watch::Sender<StateSnapshot>,
}

impl CalibrationService {
    /// Builds the service and the handle used to drive it. Outbound commands
    /// are pushed to `outbound` without waiting for the transport.
    pub fn new(
        cfg: &EngineConfig,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Result<(Self, CalibrationHandle), EngineError> {
        let calibrator = Calibrator::new(cfg)?;
        let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE);
        let (cancel_tx, cancel_rx) = mpsc::channel(8);
        let (snap_tx, snap_rx) = watch::channel(calibrator.snapshot());

        let service = Self {
            calibrator,
            requests: req_rx,
            cancels: cancel_rx,
            outbound,
            snapshots: snap_tx,
        };
        let handle = CalibrationHandle { requests: req_tx, cancels: cancel_tx, snapshots: snap_rx };
        Ok((service, handle))
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        info!("calibration service running");
        loop {
            tokio::select! {
                biased;
                Some(reply) = self.cancels.recv() => {
                    let res = self.calibrator.cancel(OffsetDateTime::now_utc());
                    self.flush();
                    let _ = reply.send(res);
                }
                req = self.requests.recv() => match req {
                    Some(req) => self.handle(req),
                    None => break,
                },
            }
        }
        info!("calibration service stopped");
    }

    // Effects are flushed before replying so callers observe the new snapshot.
    fn handle(&mut self, req: Request) {
        let now = OffsetDateTime::now_utc();
        match req {
            Request::Start { sensor, reply } => {
                let res = self.calibrator.start(sensor, now);
                self.flush();
                let _ = reply.send(res);
            }
            Request::Confirm { reply } => {
                let res = self.calibrator.confirm_current_position(now);
                self.flush();
                let _ = reply.send(res);
            }
            Request::Inbound(inbound) => {
                self.calibrator.handle_inbound(inbound, now);
                self.flush();
            }
            Request::Session { reply } => {
                let _ = reply.send(self.calibrator.session().cloned());
            }
        }
    }

    fn flush(&mut self) {
        for out in self.calibrator.take_outbound() {
            if self.outbound.send(out).is_err() {
                warn!(session = %out.session, "transport gone; {} not delivered", out.command);
            }
        }
        let next = self.calibrator.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("snapshot: {:?} {}%", next.state, next.progress);
            *current = next;
            true
        });
    }
}

/// Cloneable entry point shared by the UI and the transport reader.
#[derive(Clone)]
pub struct CalibrationHandle {
    requests: mpsc::Sender<Request>,
    cancels: mpsc::Sender<Reply<()>>,
    snapshots: watch::Receiver<StateSnapshot>,
}

impl CalibrationHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).await.map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)?
    }

    pub async fn start(&self, sensor: SensorKind) -> Result<SessionId, EngineError> {
        self.call(|reply| Request::Start { sensor, reply }).await
    }

    pub async fn confirm_current_position(&self) -> Result<(), EngineError> {
        self.call(|reply| Request::Confirm { reply }).await
    }

    pub async fn cancel(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cancels.send(tx).await.map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)?
    }

    pub async fn deliver(&self, inbound: Inbound) -> Result<(), EngineError> {
        self.requests.send(Request::Inbound(inbound)).await.map_err(|_| EngineError::ServiceClosed)
    }

    /// For transport readers running on a blocking thread.
    pub fn deliver_blocking(&self, inbound: Inbound) -> Result<(), EngineError> {
        self.requests.blocking_send(Request::Inbound(inbound)).map_err(|_| EngineError::ServiceClosed)
    }

    /// Copy of the current (or last finished) session, diagnostics included.
    pub async fn session(&self) -> Result<Option<CalibrationSession>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(Request::Session { reply: tx }).await.map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshots.clone()
    }
}
