//! Multi-device end-to-end encrypted messaging.
//!
//! A [`Messenger`] encrypts every message once under a fresh content key and
//! wraps that key separately for each recipient device over a pairwise
//! Double Ratchet session. Devices without a trust decision are refused
//! unless the caller approves them for the call.

mod address;
pub use address::*;

mod types;
pub use types::*;

mod keys;
pub use keys::*;

mod x3dh;
pub use x3dh::*;

mod ratchet;
pub use ratchet::*;

mod session;
pub use session::*;

mod proto;

pub mod store;
pub use store::{MemoryStore, Store};

pub mod cipher;
pub use cipher::{KeyTransport, RatchetCipher, SessionCipher, Unwrapped};

pub mod directory;
pub use directory::{DeviceAdvertisement, Directory, MemoryDirectory, RoomInfo};

mod transport;
pub use transport::*;

mod envelope;
pub use envelope::*;

mod resolver;
pub use resolver::DeviceResolver;

mod trust;
pub use trust::*;

mod messenger;
pub use messenger::*;

mod config;
pub use config::*;

mod error;
pub use error::Error;
