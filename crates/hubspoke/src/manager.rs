//! The manager: single owner of hub/spoke membership.
//!
//! One tokio task drains a command channel and applies each command to a
//! [`Registry`]. Nothing else touches membership, so every operation on a
//! hub is totally ordered and no partial update is ever visible. Hub
//! callbacks run on this task.
//!
//! Per spoke, within its hub record:
//!
//! ```text
//! join (unlocked) ──allowed──▶ Joined ──leave/stop──▶ Left (+ leave callback)
//!        │          └─refused─▶ Left
//! join (locked) ──▶ Pending ──unlock, allowed──▶ Joined (+ buffered feedback)
//!                      │      └─unlock, refused──▶ Left
//!                      └─leave/stop──▶ Left (no callback)
//! ```
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{ContractViolation, HubError};
use crate::hub::{Hub, HubConfig};
use crate::id::{HubId, Id, SpokeId};
use crate::messenger::Messenger;

// ── Commands ─────────────────────────────────────────────────────────

/// Commands handles send to the manager task.
pub(crate) enum Command {
    NewHub {
        hub: HubId,
        config: HubConfig,
    },
    Stop {
        hub: HubId,
    },
    Send {
        hub: HubId,
        message: Bytes,
    },
    Lock {
        hub: HubId,
        ack: oneshot::Sender<()>,
    },
    Unlock {
        hub: HubId,
    },
    Join {
        hub: HubId,
        spoke: SpokeId,
        messenger: Arc<Messenger>,
        param: Bytes,
        outcome: Option<oneshot::Sender<bool>>,
    },
    Leave {
        hub: HubId,
        spoke: SpokeId,
    },
    Feedback {
        hub: HubId,
        spoke: SpokeId,
        data: Bytes,
    },
    Find {
        hub: HubId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

impl Command {
    /// Settle a command the manager will never see.
    fn abandon(self) {
        // A join against a dead manager behaves like a join against an
        // unknown hub.
        if let Command::Join { messenger, .. } = self {
            messenger.close();
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// A join deferred by an open lock window.
struct PendingJoin {
    messenger: Arc<Messenger>,
    param: Bytes,
    /// Feedback submitted while pending, replayed in order once joined.
    feedback: Vec<Bytes>,
    outcome: Option<oneshot::Sender<bool>>,
}

struct HubRecord {
    config: HubConfig,
    /// Present only while a lock window is open. Keeps arrival order.
    locked: Option<IndexMap<SpokeId, PendingJoin>>,
    unlocked: HashMap<SpokeId, Arc<Messenger>>,
}

/// Dropping a record that still holds spokes closes them all without
/// callbacks. `stop` empties the record first, so this only matters when
/// the manager aborts.
impl Drop for HubRecord {
    fn drop(&mut self) {
        if let Some(pending) = self.locked.take() {
            for (_, join) in pending {
                join.messenger.close();
                resolve(join.outcome, false);
            }
        }
        for (_, messenger) in self.unlocked.drain() {
            messenger.close();
        }
    }
}

fn resolve(outcome: Option<oneshot::Sender<bool>>, joined: bool) {
    if let Some(tx) = outcome {
        let _ = tx.send(joined);
    }
}

/// Membership state for every hub. Pure: no I/O, no channels of its own.
#[derive(Default)]
pub(crate) struct Registry {
    hubs: HashMap<HubId, HubRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command. `Shutdown` is handled by the loop, not here.
    pub fn apply(&mut self, command: Command) -> Result<(), ContractViolation> {
        match command {
            Command::NewHub { hub, config } => self.new_hub(hub, config),
            Command::Stop { hub } => self.stop(hub),
            Command::Send { hub, message } => self.send(hub, message),
            Command::Lock { hub, ack } => {
                self.lock(hub)?;
                let _ = ack.send(());
            }
            Command::Unlock { hub } => self.unlock(hub)?,
            Command::Join {
                hub,
                spoke,
                messenger,
                param,
                outcome,
            } => self.join(hub, spoke, messenger, param, outcome),
            Command::Leave { hub, spoke } => self.leave(hub, spoke),
            Command::Feedback { hub, spoke, data } => self.feedback(hub, spoke, data),
            Command::Find { hub, reply } => {
                let _ = reply.send(self.contains(hub));
            }
            Command::Shutdown => self.shutdown(),
        }
        Ok(())
    }

    pub fn contains(&self, hub: HubId) -> bool {
        self.hubs.contains_key(&hub)
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    pub fn new_hub(&mut self, hub: HubId, config: HubConfig) {
        debug!(%hub, "hub registered");
        self.hubs.insert(
            hub,
            HubRecord {
                config,
                locked: None,
                unlocked: HashMap::new(),
            },
        );
    }

    /// Close every spoke of the hub and forget it.
    pub fn stop(&mut self, hub: HubId) {
        let Some(mut record) = self.hubs.remove(&hub) else {
            return;
        };
        if let Some(pending) = record.locked.take() {
            for (_, join) in pending {
                join.messenger.close();
                resolve(join.outcome, false);
            }
        }
        for (spoke, messenger) in record.unlocked.drain() {
            messenger.close();
            record.config.leave(spoke);
        }
        debug!(%hub, "hub stopped");
    }

    pub fn send(&mut self, hub: HubId, message: Bytes) {
        let Some(record) = self.hubs.get(&hub) else {
            return;
        };
        trace!(%hub, members = record.unlocked.len(), len = message.len(), "broadcast");
        for messenger in record.unlocked.values() {
            messenger.send(message.clone());
        }
    }

    pub fn lock(&mut self, hub: HubId) -> Result<(), ContractViolation> {
        let Some(record) = self.hubs.get_mut(&hub) else {
            return Ok(());
        };
        if record.locked.is_some() {
            return Err(ContractViolation::AlreadyLocked(hub));
        }
        record.locked = Some(IndexMap::new());
        debug!(%hub, "lock window opened");
        Ok(())
    }

    /// Close the lock window, evaluating every pending join exactly once in
    /// arrival order.
    pub fn unlock(&mut self, hub: HubId) -> Result<(), ContractViolation> {
        let Some(record) = self.hubs.get_mut(&hub) else {
            return Ok(());
        };
        let pending = record
            .locked
            .take()
            .ok_or(ContractViolation::NotLocked(hub))?;
        debug!(%hub, pending = pending.len(), "lock window closing");

        let HubRecord {
            config, unlocked, ..
        } = record;
        for (spoke, join) in pending {
            let decision = config.join(spoke, &join.param);
            if decision.allowed {
                unlocked.insert(spoke, join.messenger.clone());
                for message in decision.backlog {
                    join.messenger.send(message);
                }
                for data in join.feedback {
                    config.feedback(spoke, data);
                }
                debug!(%hub, %spoke, "pending spoke joined");
                resolve(join.outcome, true);
            } else {
                join.messenger.close();
                debug!(%hub, %spoke, "pending spoke rejected");
                resolve(join.outcome, false);
            }
        }
        Ok(())
    }

    pub fn join(
        &mut self,
        hub: HubId,
        spoke: SpokeId,
        messenger: Arc<Messenger>,
        param: Bytes,
        outcome: Option<oneshot::Sender<bool>>,
    ) {
        let Some(record) = self.hubs.get_mut(&hub) else {
            debug!(%hub, %spoke, "join for unknown hub");
            messenger.close();
            resolve(outcome, false);
            return;
        };

        if let Some(pending) = record.locked.as_mut() {
            debug!(%hub, %spoke, "join deferred by lock window");
            pending.insert(
                spoke,
                PendingJoin {
                    messenger,
                    param,
                    feedback: Vec::new(),
                    outcome,
                },
            );
            return;
        }

        let decision = record.config.join(spoke, &param);
        if decision.allowed {
            record.unlocked.insert(spoke, messenger.clone());
            for message in decision.backlog {
                messenger.send(message);
            }
            debug!(%hub, %spoke, "spoke joined");
            resolve(outcome, true);
        } else {
            messenger.close();
            debug!(%hub, %spoke, "spoke rejected");
            resolve(outcome, false);
        }
    }

    /// Remove a spoke. Only members get the leave callback; unknown spokes
    /// are ignored.
    pub fn leave(&mut self, hub: HubId, spoke: SpokeId) {
        let Some(record) = self.hubs.get_mut(&hub) else {
            return;
        };
        if let Some(messenger) = record.unlocked.remove(&spoke) {
            messenger.close();
            record.config.leave(spoke);
            debug!(%hub, %spoke, "spoke left");
        } else if let Some(join) = record
            .locked
            .as_mut()
            .and_then(|pending| pending.shift_remove(&spoke))
        {
            join.messenger.close();
            resolve(join.outcome, false);
            debug!(%hub, %spoke, "pending spoke left");
        }
    }

    pub fn feedback(&mut self, hub: HubId, spoke: SpokeId, data: Bytes) {
        let Some(record) = self.hubs.get_mut(&hub) else {
            return;
        };
        if record.unlocked.contains_key(&spoke) {
            record.config.feedback(spoke, data);
        } else if let Some(join) = record
            .locked
            .as_mut()
            .and_then(|pending| pending.get_mut(&spoke))
        {
            join.feedback.push(data);
        }
    }

    /// Stop every hub.
    pub fn shutdown(&mut self) {
        let hubs: Vec<HubId> = self.hubs.keys().copied().collect();
        for hub in hubs {
            self.stop(hub);
        }
    }

    /// Forget every hub without running callbacks. Member and pending
    /// spokes see end of stream.
    pub fn abort(&mut self) {
        debug!(hubs = self.hubs.len(), "dropping hubs");
        self.hubs.clear();
    }
}

// ── Manager loop ─────────────────────────────────────────────────────

async fn manager_loop(mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let mut registry = Registry::new();
    while let Some(command) = cmd_rx.recv().await {
        if matches!(command, Command::Shutdown) {
            break;
        }
        if let Err(violation) = registry.apply(command) {
            error!(%violation, "lock protocol violated, aborting manager");
            cmd_rx.close();
            while let Ok(queued) = cmd_rx.try_recv() {
                queued.abandon();
            }
            registry.abort();
            panic!("{violation}");
        }
    }
    debug!(hubs = registry.hub_count(), "manager shutting down");
    registry.shutdown();
    debug!("manager stopped");
}

// ── ManagerHandle ────────────────────────────────────────────────────

/// Handle to a running manager.
///
/// Cheap to clone. Every method is a non-blocking channel send except
/// [`ManagerHandle::find_hub`], which waits for the answer.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
    pub(crate) fn submit(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.cmd_tx.send(command) {
            command.abandon();
        }
    }

    /// Register a new hub with a fresh identity.
    pub fn new_hub(&self, config: HubConfig) -> Hub {
        let id = Id::new();
        self.submit(Command::NewHub { hub: id, config });
        Hub::new(id, self.clone())
    }

    /// Look up a live hub by identity.
    pub async fn find_hub(&self, id: HubId) -> Option<Hub> {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Find { hub: id, reply });
        match answer.await {
            Ok(true) => Some(Hub::new(id, self.clone())),
            _ => None,
        }
    }

    /// True while the manager task is accepting commands.
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

// ── Manager ──────────────────────────────────────────────────────────

/// The running manager task. Spawn one per process (or per test).
#[derive(Debug)]
pub struct Manager {
    handle: ManagerHandle,
    task: JoinHandle<()>,
}

impl Manager {
    /// Start the manager task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(manager_loop(cmd_rx));
        Self {
            handle: ManagerHandle { cmd_tx },
            task,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    pub fn new_hub(&self, config: HubConfig) -> Hub {
        self.handle.new_hub(config)
    }

    pub async fn find_hub(&self, id: HubId) -> Option<Hub> {
        self.handle.find_hub(id).await
    }

    /// Stop every hub and end the manager task.
    ///
    /// Reports [`HubError::ManagerPanicked`] if the task had already aborted
    /// on a lock protocol violation.
    pub async fn shutdown(self) -> Result<(), HubError> {
        self.handle.submit(Command::Shutdown);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let reason = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(HubError::ManagerPanicked(reason))
            }
            Err(_) => Err(HubError::ManagerStopped),
        }
    }
}
