//! Connection lifecycle: one authenticated session with the chat network, kept alive across
//! pairing, disconnects, logouts and credential wipes.

mod collaborator;
mod machine;
mod manager;
mod mock;
mod pairing;
mod policy;
mod state;

pub use collaborator::{Connector, EventSink, SessionEvent, SessionHandle};
pub use machine::{ConnectionMachine, ConnectionSnapshot, Context, Effect};
pub use manager::{spawn, ConnectionHandle, ConnectionSettings};
#[cfg(test)]
pub(crate) use manager::Input;
pub use mock::MockConnector;
pub use pairing::{Offer, PairingChallenge, PairingManager, PairingView, DEFAULT_EXPIRY};
pub use policy::ReconnectPolicy;
pub use state::{ConnectionState, DisconnectCause};
