//! WebSocket connection & broadcast core.
//!
//! - `registry`: user ↔ socket bidirectional map, single source of truth for
//!   "is this user online and on which socket"
//! - `rooms`: named groups of sockets used for conversation fan-out
//! - `broadcast`: stateless dispatcher targeting rooms or user-id lists
//! - `router`: inbound event dispatch and REST-triggered notifications
//! - `event`: wire envelope and event definitions

pub mod broadcast;
pub mod event;
pub mod registry;
pub mod rooms;
pub mod router;

pub use broadcast::BroadcastDispatcher;
pub use registry::{Connection, ConnectionRegistry};
pub use rooms::RoomManager;
pub use router::{ConnContext, EventRouter};
