//! KNXnet/IP protocol implementation.
//!
//! This module contains the wire structures and parsing logic for
//! KNXnet/IP frames, the typed [`Message`] codec, and the tunneling
//! session built on top of them.

pub mod constants;
pub mod frame;
pub mod message;
pub mod services;
pub mod tunnel;

pub use constants::*;
pub use frame::*;
pub use message::*;
pub use services::*;
pub use tunnel::*;
