//! Hub handle and hub configuration.
//!
//! A `Hub` owns no mutable state: every operation is a command to the
//! manager, which holds membership for all hubs.
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::id::{HubId, Id, SpokeId};
use crate::manager::{Command, ManagerHandle};
use crate::messenger::Messenger;
use crate::spoke::{LocalSpoke, Spoke};

type JoinFn = Box<dyn FnMut(SpokeId, &[u8]) -> JoinDecision + Send>;
type LeaveFn = Box<dyn FnMut(SpokeId) + Send>;
type FeedbackFn = Box<dyn FnMut(SpokeId, Bytes) + Send>;

// ── JoinDecision ─────────────────────────────────────────────────────

/// What a hub's join callback decided for one spoke.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinDecision {
    /// Messages enqueued to the spoke, in order, before any later `send`.
    pub backlog: Vec<Bytes>,
    /// Whether the spoke becomes a member.
    pub allowed: bool,
}

impl JoinDecision {
    /// Admit the spoke and replay `backlog` to it.
    pub fn accept(backlog: Vec<Bytes>) -> Self {
        Self {
            backlog,
            allowed: true,
        }
    }

    /// Refuse the spoke. Its queue is closed immediately.
    pub fn reject() -> Self {
        Self::default()
    }
}

// ── HubConfig ────────────────────────────────────────────────────────

/// Application callbacks for a hub.
///
/// All three are optional. Without `on_join` every join is rejected.
///
/// Callbacks run on the manager task, one command at a time, for every hub
/// in the process. They must return quickly and must not block: a slow
/// callback stalls all hubs.
///
/// ```rust
/// use hubspoke::{HubConfig, JoinDecision};
///
/// let config = HubConfig::new()
///     .on_join(|_spoke, _param| JoinDecision::accept(Vec::new()))
///     .on_feedback(|spoke, data| println!("{spoke}: {} bytes", data.len()));
/// ```
#[derive(Default)]
pub struct HubConfig {
    join: Option<JoinFn>,
    leave: Option<LeaveFn>,
    feedback: Option<FeedbackFn>,
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a spoke may join, given its join parameter.
    pub fn on_join<F>(mut self, f: F) -> Self
    where
        F: FnMut(SpokeId, &[u8]) -> JoinDecision + Send + 'static,
    {
        self.join = Some(Box::new(f));
        self
    }

    /// Called exactly once for every spoke that was admitted, when it leaves.
    pub fn on_leave<F>(mut self, f: F) -> Self
    where
        F: FnMut(SpokeId) + Send + 'static,
    {
        self.leave = Some(Box::new(f));
        self
    }

    /// Called for data a member spoke sends back to the hub.
    pub fn on_feedback<F>(mut self, f: F) -> Self
    where
        F: FnMut(SpokeId, Bytes) + Send + 'static,
    {
        self.feedback = Some(Box::new(f));
        self
    }

    pub(crate) fn join(&mut self, spoke: SpokeId, param: &[u8]) -> JoinDecision {
        match self.join.as_mut() {
            Some(f) => f(spoke, param),
            None => JoinDecision::reject(),
        }
    }

    pub(crate) fn leave(&mut self, spoke: SpokeId) {
        if let Some(f) = self.leave.as_mut() {
            f(spoke);
        }
    }

    pub(crate) fn feedback(&mut self, spoke: SpokeId, data: Bytes) {
        if let Some(f) = self.feedback.as_mut() {
            f(spoke, data);
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("on_join", &self.join.is_some())
            .field("on_leave", &self.leave.is_some())
            .field("on_feedback", &self.feedback.is_some())
            .finish()
    }
}

// ── Hub ──────────────────────────────────────────────────────────────

/// Handle to a hub registered with a manager.
///
/// Cheap to clone. All methods except [`Hub::lock`] are non-blocking
/// channel sends.
#[derive(Debug, Clone)]
pub struct Hub {
    id: HubId,
    manager: ManagerHandle,
}

impl Hub {
    pub(crate) fn new(id: HubId, manager: ManagerHandle) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> HubId {
        self.id
    }

    /// Join the hub and return the new spoke.
    ///
    /// Returns immediately. If the hub rejects the spoke, is unknown, or was
    /// stopped, the spoke's first `receive` returns `None`. During a lock
    /// window the join stays pending until [`Hub::unlock`].
    pub fn join(&self, param: impl Into<Bytes>) -> Spoke {
        Spoke::Local(self.join_local(param.into(), None))
    }

    /// Join and get notified once the join is resolved: `true` when the
    /// spoke became a member, `false` (or a dropped sender) otherwise.
    pub(crate) fn join_local(
        &self,
        param: Bytes,
        outcome: Option<tokio::sync::oneshot::Sender<bool>>,
    ) -> LocalSpoke {
        let messenger = Arc::new(Messenger::new());
        let spoke = LocalSpoke::new(Id::new(), self.id, messenger.clone(), self.manager.clone());
        self.manager.submit(Command::Join {
            hub: self.id,
            spoke: spoke.id(),
            messenger,
            param,
            outcome,
        });
        spoke
    }

    /// Broadcast a message to every current member.
    ///
    /// Pending spokes do not get it: whoever supplies the join backlog must
    /// include it there.
    pub fn send(&self, message: impl Into<Bytes>) {
        self.manager.submit(Command::Send {
            hub: self.id,
            message: message.into(),
        });
    }

    /// Open a lock window. Joins arriving while it is open stay pending
    /// until [`Hub::unlock`], where they are evaluated against the
    /// backlog as it stands then.
    ///
    /// Waits until the manager has opened the window, so every join the
    /// manager saw before this call has already been evaluated when it
    /// returns.
    ///
    /// Locking a hub that is already locked is a fatal usage error: the
    /// manager aborts.
    pub async fn lock(&self) {
        let (ack, done) = tokio::sync::oneshot::channel();
        self.manager.submit(Command::Lock { hub: self.id, ack });
        let _ = done.await;
    }

    /// Close the lock window and resolve every pending join.
    ///
    /// Unlocking a hub that is not locked is a fatal usage error: the
    /// manager aborts.
    pub fn unlock(&self) {
        self.manager.submit(Command::Unlock { hub: self.id });
    }

    /// Open a lock window that closes when the returned guard drops.
    pub async fn lock_window(&self) -> LockWindow<'_> {
        self.lock().await;
        LockWindow { hub: self }
    }

    /// Remove the hub. Every spoke is closed; members get their leave
    /// callback, pending spokes do not.
    pub fn stop(&self) {
        self.manager.submit(Command::Stop { hub: self.id });
    }
}

/// An open lock window; unlocks the hub on drop.
#[derive(Debug)]
pub struct LockWindow<'a> {
    hub: &'a Hub,
}

impl Drop for LockWindow<'_> {
    fn drop(&mut self) {
        self.hub.unlock();
    }
}
