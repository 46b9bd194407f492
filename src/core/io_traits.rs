//! I/O traits for spectator operations
//!
//! These traits abstract the upstream feed and the downstream renderer,
//! so the controller and the spectator context can be tested with mock
//! implementations.

use thiserror::Error;

use super::publisher::RenderState;
use super::room::RoomName;
use super::terrain::{Terrain, TerrainError};
use super::types::{DiffBatch, MapStats, PvpRoom};

// =============================================================================
// ERRORS
// =============================================================================

/// Failure talking to the upstream feed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed is not connected")]
    NotConnected,
    #[error("feed command queue is full")]
    QueueFull,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http request failed: {0}")]
    Http(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Terrain(#[from] TerrainError),
}

/// Failure handing state to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("renderer rejected state: {0}")]
    Rejected(String),
    #[error("renderer output failed: {0}")]
    Output(String),
}

// =============================================================================
// CONNECTION STATUS
// =============================================================================

/// Connection status of the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Socket opening or authenticating
    Connecting,
    /// Connected and authenticated
    Connected,
    /// Connection failed; the session cannot continue
    Error,
}

// =============================================================================
// FEED EVENTS
// =============================================================================

/// Events produced by the feed, consumed by the spectator loop
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// A room diff message arrived
    RoomBatch(DiffBatch),
    /// Terrain fetch completed
    TerrainLoaded(Terrain),
    /// Terrain fetch failed
    TerrainFailed { room: RoomName, reason: String },
    /// Server reported its tick duration in milliseconds
    TickDuration(u32),
    /// PvP query answered
    PvpRooms { game_time: u64, rooms: Vec<PvpRoom> },
    /// Map-stats query answered
    MapStats(MapStats),
    /// A non-fatal feed error
    Error(String),
    /// The upstream connection is gone
    Disconnected(String),
}

// =============================================================================
// I/O TRAITS
// =============================================================================

/// Commands sent upstream
///
/// All operations are asynchronous: results come back as [`FeedEvent`]s.
/// An `Err` means the command could not be issued at all.
pub trait FeedSink {
    /// Subscribe to a feed topic
    fn subscribe(&self, topic: &str) -> Result<(), FeedError>;

    /// Unsubscribe from a feed topic
    fn unsubscribe(&self, topic: &str) -> Result<(), FeedError>;

    /// Request the terrain of `room` (answered by `TerrainLoaded`/`TerrainFailed`)
    fn request_terrain(&self, room: &RoomName) -> Result<(), FeedError>;

    /// Request recent PvP activity (answered by `PvpRooms`)
    fn request_pvp(&self) -> Result<(), FeedError>;

    /// Request ownership stats for `rooms` (answered by `MapStats`)
    fn request_map_stats(&self, rooms: &[RoomName]) -> Result<(), FeedError>;
}

/// Trait for receiving events from the feed
pub trait FeedEventReceiver {
    /// Poll for the next feed event (non-blocking)
    fn poll_event(&mut self) -> Option<FeedEvent>;
}

/// Downstream display of the subscribed room
pub trait Renderer {
    /// Replace the terrain layer
    fn set_terrain(&mut self, terrain: &Terrain) -> Result<(), RenderError>;

    /// Show a new world state, animating over `tick_duration` seconds
    fn apply_state(&mut self, state: &RenderState, tick_duration: f32) -> Result<(), RenderError>;

    /// Drop everything currently displayed
    fn erase(&mut self);
}

// =============================================================================
// MOCK IMPLEMENTATIONS FOR TESTING
// =============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::cell::RefCell;

    /// A command recorded by [`MockFeed`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum FeedCall {
        Subscribe(String),
        Unsubscribe(String),
        Terrain(RoomName),
        Pvp,
        MapStats(usize),
    }

    /// Mock feed for testing
    ///
    /// Records every command and can be told to fail terrain or
    /// subscribe requests.
    pub struct MockFeed {
        pub calls: RefCell<Vec<FeedCall>>,
        pub fail_terrain: RefCell<bool>,
        pub fail_subscribe: RefCell<bool>,
        pub pending_events: RefCell<Vec<FeedEvent>>,
    }

    impl MockFeed {
        pub fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_terrain: RefCell::new(false),
                fail_subscribe: RefCell::new(false),
                pending_events: RefCell::new(Vec::new()),
            }
        }

        pub fn set_fail_terrain(&self, fail: bool) {
            *self.fail_terrain.borrow_mut() = fail;
        }

        pub fn set_fail_subscribe(&self, fail: bool) {
            *self.fail_subscribe.borrow_mut() = fail;
        }

        pub fn queue_event(&self, event: FeedEvent) {
            self.pending_events.borrow_mut().push(event);
        }

        /// Take all recorded calls, leaving the log empty
        pub fn take_calls(&self) -> Vec<FeedCall> {
            std::mem::take(&mut *self.calls.borrow_mut())
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|c| match c {
                    FeedCall::Subscribe(t) => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn unsubscriptions(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|c| match c {
                    FeedCall::Unsubscribe(t) => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn terrain_requests(&self) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| matches!(c, FeedCall::Terrain(_)))
                .count()
        }
    }

    impl Default for MockFeed {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FeedSink for MockFeed {
        fn subscribe(&self, topic: &str) -> Result<(), FeedError> {
            if *self.fail_subscribe.borrow() {
                return Err(FeedError::NotConnected);
            }
            self.calls
                .borrow_mut()
                .push(FeedCall::Subscribe(topic.to_string()));
            Ok(())
        }

        fn unsubscribe(&self, topic: &str) -> Result<(), FeedError> {
            self.calls
                .borrow_mut()
                .push(FeedCall::Unsubscribe(topic.to_string()));
            Ok(())
        }

        fn request_terrain(&self, room: &RoomName) -> Result<(), FeedError> {
            if *self.fail_terrain.borrow() {
                return Err(FeedError::QueueFull);
            }
            self.calls.borrow_mut().push(FeedCall::Terrain(room.clone()));
            Ok(())
        }

        fn request_pvp(&self) -> Result<(), FeedError> {
            self.calls.borrow_mut().push(FeedCall::Pvp);
            Ok(())
        }

        fn request_map_stats(&self, rooms: &[RoomName]) -> Result<(), FeedError> {
            self.calls.borrow_mut().push(FeedCall::MapStats(rooms.len()));
            Ok(())
        }
    }

    impl FeedEventReceiver for MockFeed {
        fn poll_event(&mut self) -> Option<FeedEvent> {
            let mut events = self.pending_events.borrow_mut();
            if events.is_empty() {
                None
            } else {
                Some(events.remove(0))
            }
        }
    }

    /// A call recorded by [`MockRenderer`]
    #[derive(Debug, Clone, PartialEq)]
    pub enum RenderCall {
        Terrain(RoomName),
        State {
            room: RoomName,
            tick: u64,
            objects: Vec<String>,
            tick_duration: f32,
        },
        Erase,
    }

    /// Mock renderer recording what it was shown
    #[derive(Default)]
    pub struct MockRenderer {
        pub calls: Vec<RenderCall>,
        /// Reject the next N `apply_state` calls
        pub reject_states: usize,
    }

    impl MockRenderer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn states(&self) -> Vec<&RenderCall> {
            self.calls
                .iter()
                .filter(|c| matches!(c, RenderCall::State { .. }))
                .collect()
        }

        pub fn last_state(&self) -> Option<&RenderCall> {
            self.states().into_iter().last()
        }
    }

    impl Renderer for MockRenderer {
        fn set_terrain(&mut self, terrain: &Terrain) -> Result<(), RenderError> {
            self.calls.push(RenderCall::Terrain(terrain.room().clone()));
            Ok(())
        }

        fn apply_state(&mut self, state: &RenderState, tick_duration: f32) -> Result<(), RenderError> {
            if self.reject_states > 0 {
                self.reject_states -= 1;
                return Err(RenderError::Rejected("mock".into()));
            }
            self.calls.push(RenderCall::State {
                room: state.room.clone(),
                tick: state.tick,
                objects: state.objects.iter().map(|o| o.id.clone()).collect(),
                tick_duration,
            });
            Ok(())
        }

        fn erase(&mut self) {
            self.calls.push(RenderCall::Erase);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[test]
    fn test_mock_feed_records_calls() {
        let feed = MockFeed::new();
        let room: RoomName = "E1N1".parse().unwrap();
        feed.subscribe(&room.topic()).unwrap();
        feed.request_terrain(&room).unwrap();
        feed.unsubscribe(&room.topic()).unwrap();

        assert_eq!(feed.subscriptions(), vec!["room:E1N1"]);
        assert_eq!(feed.unsubscriptions(), vec!["room:E1N1"]);
        assert_eq!(feed.terrain_requests(), 1);
        assert_eq!(feed.take_calls().len(), 3);
        assert!(feed.calls.borrow().is_empty());
    }

    #[test]
    fn test_mock_feed_failures() {
        let feed = MockFeed::new();
        feed.set_fail_terrain(true);
        feed.set_fail_subscribe(true);
        let room: RoomName = "E1N1".parse().unwrap();
        assert_eq!(feed.request_terrain(&room), Err(FeedError::QueueFull));
        assert_eq!(feed.subscribe("room:E1N1"), Err(FeedError::NotConnected));
    }

    #[test]
    fn test_mock_feed_poll_in_order() {
        let mut feed = MockFeed::new();
        feed.queue_event(FeedEvent::TickDuration(500));
        feed.queue_event(FeedEvent::Error("x".into()));
        assert_eq!(feed.poll_event(), Some(FeedEvent::TickDuration(500)));
        assert_eq!(feed.poll_event(), Some(FeedEvent::Error("x".into())));
        assert_eq!(feed.poll_event(), None);
    }
}
