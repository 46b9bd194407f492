//! Core module - world state, subscription control and room selection
//!
//! Everything here is transport-independent and driven through the
//! [`io_traits`] seams.

pub mod activity_log;
pub mod constants;
pub mod controller;
pub mod format;
pub mod identity;
pub mod io_traits;
pub mod merge;
pub mod policy;
pub mod protocol;
pub mod publisher;
pub mod reconciler;
pub mod room;
pub mod scoreboard;
pub mod spectator;
pub mod speedrun;
pub mod terrain;
pub mod types;

pub use controller::RoomSubscriptionController;
pub use io_traits::{FeedEvent, FeedEventReceiver, FeedSink, Renderer};
pub use policy::{FixedFocus, Pinned, PvpRotation, RoomSelectionPolicy, RotationTimer};
pub use reconciler::ObjectReconciler;
pub use room::RoomName;
pub use spectator::{DashboardView, Spectator, SpectatorSettings};
