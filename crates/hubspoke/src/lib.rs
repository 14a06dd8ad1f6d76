//! Hub/spoke publish-subscribe broker.
//!
//! A hub broadcasts messages to the spokes joined to it; spokes send
//! feedback back. Membership for every hub is owned by one manager task,
//! so joins, leaves, broadcasts and lock windows are totally ordered.
//! Spokes attach in-process or over TCP.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//! use bytes::Bytes;
//! use hubspoke::{HubConfig, JoinDecision, Manager};
//!
//! # async fn example() -> Result<(), hubspoke::HubError> {
//! let manager = Manager::spawn();
//! let backlog: Arc<Mutex<Vec<Bytes>>> = Arc::default();
//!
//! let replay = backlog.clone();
//! let hub = manager.new_hub(HubConfig::new().on_join(move |_spoke, _param| {
//!     JoinDecision::accept(replay.lock().unwrap().clone())
//! }));
//!
//! // Publish without a race against joins: new spokes see the message
//! // either in their backlog or as a broadcast, never both.
//! {
//!     let _window = hub.lock_window().await;
//!     backlog.lock().unwrap().push(Bytes::from("hello"));
//!     hub.send("hello");
//! }
//!
//! let spoke = hub.join("");
//! assert_eq!(spoke.receive().await, Some(Bytes::from("hello")));
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod hub;
mod id;
mod manager;
mod messenger;
pub mod remote;
mod spoke;
pub mod wire;

pub use config::RemoteConfig;
pub use error::{ContractViolation, FrameError, HubError};
pub use hub::{Hub, HubConfig, JoinDecision, LockWindow};
pub use id::{HubId, Id, SpokeId, ID_SIZE};
pub use manager::{Manager, ManagerHandle};
pub use messenger::Messenger;
pub use remote::{attach, dial, serve_connection, Listener, RemoteSpoke};
pub use spoke::{LocalSpoke, Spoke};
pub use wire::{Frame, FrameCodec, MAGIC};
