mod connection;
mod session;
mod state;
mod timers;

pub use connection::Connection;
pub use session::{Action, PeerSession};
pub use state::{PeerState, Phase};
