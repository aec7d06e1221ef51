//! The encrypted parent↔child control plane.

pub mod crypto;
pub mod endpoint;
pub mod frame;
pub mod session;

pub use crypto::{RootKey, SessionKey};
pub use endpoint::IpcEndpoint;
pub use frame::{Frame, MessageType};
pub use session::{
    child_handshake, parent_handshake, Message, Session, SessionReader, SessionWriter, PARENT_ID,
};
