//! Threaded service shell around the deterministic core.
//!
//! The control plane itself is single-threaded by construction; this module
//! gives it a thread to live on. One worker thread owns the [`ControlPlane`]
//! and serializes all access to it through a bounded request channel, so
//! there is exactly one writer of canonical state no matter how many
//! [`ControlHandle`] clones exist.
//!
//! Arbitration passes come from two places: every accepted snapshot
//! triggers one immediately, and a timer guarantees one per configured
//! `tick_interval_ms` even when no traffic arrives.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::arbiter::{
    ArbiterStats, ControlEvent, ControlPlane, IngestError, SubmitError, TickRecord,
};
use crate::autonomy::{AutonomyRecord, RestoreStats};
use crate::config::{ConfigError, ControlConfig};
use crate::ids::{IntersectionId, SourceId, SubscriberId};
use crate::proposal::CommandProposal;
use crate::snapshot::NetworkSnapshot;
use crate::store::AutonomyStore;

/// In-flight requests tolerated before senders block.
pub const DEFAULT_REQUEST_QUEUE_DEPTH: usize = 1_024;

const THREAD_NAME: &str = "greenwave-control";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn the control thread")]
    Spawn(#[source] std::io::Error),
    #[error("the control thread is not running")]
    Disconnected,
    #[error("the control thread panicked")]
    ThreadPanicked,
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

enum Request {
    Ingest {
        snapshot: NetworkSnapshot,
        reply: Sender<Result<(), IngestError>>,
    },
    Submit {
        proposal: CommandProposal,
        reply: Sender<Result<(), SubmitError>>,
    },
    Heartbeat {
        source_id: SourceId,
    },
    SetSourceEnabled {
        source_id: SourceId,
        enabled: bool,
        reply: Sender<bool>,
    },
    SetIntersectionHold {
        intersection_id: IntersectionId,
        held: bool,
        reply: Sender<bool>,
    },
    Subscribe {
        subscriber_id: SubscriberId,
        reply: Sender<bool>,
    },
    Unsubscribe {
        subscriber_id: SubscriberId,
        reply: Sender<bool>,
    },
    DrainFeed {
        subscriber_id: SubscriberId,
        reply: Sender<Option<Vec<TickRecord>>>,
    },
    DrainEvents {
        reply: Sender<Vec<ControlEvent>>,
    },
    Stats {
        reply: Sender<ArbiterStats>,
    },
    ExportAutonomy {
        reply: Sender<BTreeMap<IntersectionId, AutonomyRecord>>,
    },
    ImportAutonomy {
        records: BTreeMap<IntersectionId, AutonomyRecord>,
        reply: Sender<RestoreStats>,
    },
    TickNow {
        reply: Sender<TickRecord>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable client of the control thread. Every call is a synchronous
/// request/reply over the channel.
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: SyncSender<Request>,
}

impl ControlHandle {
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> Result<T, RuntimeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| RuntimeError::Disconnected)?;
        reply_rx.recv().map_err(|_| RuntimeError::Disconnected)
    }

    /// Feeds a snapshot in. An accepted snapshot triggers an arbitration
    /// pass before this call returns.
    pub fn ingest(&self, snapshot: NetworkSnapshot) -> Result<(), RuntimeError> {
        self.request(|reply| Request::Ingest { snapshot, reply })??;
        Ok(())
    }

    /// Buffers a proposal for the next arbitration pass.
    pub fn submit(&self, proposal: CommandProposal) -> Result<(), RuntimeError> {
        self.request(|reply| Request::Submit { proposal, reply })??;
        Ok(())
    }

    /// Fire-and-forget heartbeat.
    pub fn heartbeat(&self, source_id: &SourceId) -> Result<(), RuntimeError> {
        self.tx
            .send(Request::Heartbeat {
                source_id: source_id.clone(),
            })
            .map_err(|_| RuntimeError::Disconnected)
    }

    pub fn set_source_enabled(
        &self,
        source_id: &SourceId,
        enabled: bool,
    ) -> Result<bool, RuntimeError> {
        let source_id = source_id.clone();
        self.request(|reply| Request::SetSourceEnabled {
            source_id,
            enabled,
            reply,
        })
    }

    /// Operator hold: pin one intersection to its fallback plan until
    /// released.
    pub fn set_intersection_hold(
        &self,
        intersection_id: &IntersectionId,
        held: bool,
    ) -> Result<bool, RuntimeError> {
        let intersection_id = intersection_id.clone();
        self.request(|reply| Request::SetIntersectionHold {
            intersection_id,
            held,
            reply,
        })
    }

    pub fn subscribe(&self, subscriber_id: &SubscriberId) -> Result<bool, RuntimeError> {
        let subscriber_id = subscriber_id.clone();
        self.request(|reply| Request::Subscribe {
            subscriber_id,
            reply,
        })
    }

    pub fn unsubscribe(&self, subscriber_id: &SubscriberId) -> Result<bool, RuntimeError> {
        let subscriber_id = subscriber_id.clone();
        self.request(|reply| Request::Unsubscribe {
            subscriber_id,
            reply,
        })
    }

    pub fn drain_feed(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Option<Vec<TickRecord>>, RuntimeError> {
        let subscriber_id = subscriber_id.clone();
        self.request(|reply| Request::DrainFeed {
            subscriber_id,
            reply,
        })
    }

    pub fn drain_events(&self) -> Result<Vec<ControlEvent>, RuntimeError> {
        self.request(|reply| Request::DrainEvents { reply })
    }

    pub fn stats(&self) -> Result<ArbiterStats, RuntimeError> {
        self.request(|reply| Request::Stats { reply })
    }

    pub fn export_autonomy_state(
        &self,
    ) -> Result<BTreeMap<IntersectionId, AutonomyRecord>, RuntimeError> {
        self.request(|reply| Request::ExportAutonomy { reply })
    }

    pub fn import_autonomy_state(
        &self,
        records: BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> Result<RestoreStats, RuntimeError> {
        self.request(|reply| Request::ImportAutonomy { records, reply })
    }

    /// Forces an arbitration pass now instead of waiting for the timer.
    pub fn tick_now(&self) -> Result<TickRecord, RuntimeError> {
        self.request(|reply| Request::TickNow { reply })
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ControlRuntime {
    handle: ControlHandle,
    join: Option<JoinHandle<ControlPlane>>,
}

impl ControlRuntime {
    /// Validates the configuration, restores governance state, and spawns
    /// the control thread.
    pub fn start(
        config: ControlConfig,
        store: Box<dyn AutonomyStore>,
    ) -> Result<Self, RuntimeError> {
        let plane = ControlPlane::new(config, store, now_ms())?;
        let (tx, rx) = mpsc::sync_channel(DEFAULT_REQUEST_QUEUE_DEPTH);
        let join = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(plane, rx))
            .map_err(RuntimeError::Spawn)?;
        Ok(Self {
            handle: ControlHandle { tx },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Stops the control thread and returns the plane, so callers can
    /// inspect or re-host its final state.
    pub fn shutdown(mut self) -> Result<ControlPlane, RuntimeError> {
        let _ = self.handle.tx.send(Request::Shutdown);
        match self.join.take() {
            Some(join) => join.join().map_err(|_| RuntimeError::ThreadPanicked),
            None => Err(RuntimeError::Disconnected),
        }
    }
}

impl Drop for ControlRuntime {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.handle.tx.send(Request::Shutdown);
            let _ = join.join();
        }
    }
}

fn run(mut plane: ControlPlane, rx: Receiver<Request>) -> ControlPlane {
    let interval = Duration::from_millis(plane.config().tick.tick_interval_ms.max(1));
    let mut next_tick = Instant::now() + interval;
    loop {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(Request::Ingest { snapshot, reply }) => {
                let now = now_ms();
                let result = plane.ingest(snapshot, now);
                if result.is_ok() {
                    plane.tick(now);
                    next_tick = Instant::now() + interval;
                }
                let _ = reply.send(result);
            }
            Ok(Request::Submit { proposal, reply }) => {
                let _ = reply.send(plane.submit(proposal, now_ms()));
            }
            Ok(Request::Heartbeat { source_id }) => {
                plane.heartbeat(&source_id, now_ms());
            }
            Ok(Request::SetSourceEnabled {
                source_id,
                enabled,
                reply,
            }) => {
                let _ = reply.send(plane.set_source_enabled(&source_id, enabled, now_ms()));
            }
            Ok(Request::SetIntersectionHold {
                intersection_id,
                held,
                reply,
            }) => {
                let _ = reply.send(plane.set_intersection_hold(&intersection_id, held, now_ms()));
            }
            Ok(Request::Subscribe {
                subscriber_id,
                reply,
            }) => {
                let _ = reply.send(plane.subscribe(&subscriber_id, now_ms()));
            }
            Ok(Request::Unsubscribe {
                subscriber_id,
                reply,
            }) => {
                let _ = reply.send(plane.unsubscribe(&subscriber_id, now_ms()));
            }
            Ok(Request::DrainFeed {
                subscriber_id,
                reply,
            }) => {
                let _ = reply.send(plane.drain_feed(&subscriber_id));
            }
            Ok(Request::DrainEvents { reply }) => {
                let _ = reply.send(plane.drain_events());
            }
            Ok(Request::Stats { reply }) => {
                let _ = reply.send(plane.stats());
            }
            Ok(Request::ExportAutonomy { reply }) => {
                let _ = reply.send(plane.export_autonomy_state());
            }
            Ok(Request::ImportAutonomy { records, reply }) => {
                let _ = reply.send(plane.import_autonomy_state(records, now_ms()));
            }
            Ok(Request::TickNow { reply }) => {
                let record = plane.tick(now_ms());
                next_tick = Instant::now() + interval;
                let _ = reply.send(record);
            }
            Ok(Request::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                plane.tick(now_ms());
                next_tick = Instant::now() + interval;
            }
        }
    }
    plane
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
