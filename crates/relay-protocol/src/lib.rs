//! Wire types shared between the relay server's components: peer/room ids,
//! the signaling JSON message catalog, and the producer frame header.
//!
//! Nothing in this crate touches sockets, processes, or crypto — it is the
//! vocabulary the other crates speak, kept dependency-light so it can be
//! shared by the server and by test tooling without pulling in tokio.

pub mod error;
pub mod frame;
pub mod ids;
pub mod messages;
pub mod sample;

pub use error::ProtocolError;
pub use frame::{Frame, FrameHeader, PixelFormat, FRAME_MAGIC, HEADER_LEN, MAX_FRAME_SIZE};
pub use ids::{PeerId, RoomId};
pub use messages::{ClientMessage, Hand, HandTrackingPayload, Landmark, ServerMessage};
pub use sample::{Sample, SampleKind};
