//! peertty-core: session protocol and lifecycle for sharing a terminal over a peer channel.
//!
//! A host exposes a command running on a pty; a client drives it from its own
//! terminal. The two endpoints exchange an encoded [`signaling::SessionDescription`]
//! out of band (pasted by hand, or through a polling [`relay`]), then talk over
//! an ordered message channel ([`transport::DataChannel`]):
//!
//! - binary messages carry raw terminal bytes,
//! - text messages carry the `quit` sentinel or a JSON control message
//!   ([`protocol::ControlMessage`]).
//!
//! [`session::HostSession`] and [`session::ClientSession`] run the pumps for
//! each side and funnel every end condition into a single
//! [`session::Completion`], so cleanup happens exactly once.

pub mod protocol;
pub mod pty;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod terminal;
pub mod transport;

pub use protocol::{ControlMessage, Payload};
pub use pty::WindowSize;
pub use session::{ClientSession, HostSession, SessionError, SessionResult};
pub use signaling::SessionDescription;
