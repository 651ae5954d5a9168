//! weft-core — wire format, payload codecs, cryptography, and identity.
//! The mesh runtime crate depends on this one.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod payload;
pub mod tlv;
pub mod wire;

pub use wire::{Packet, PacketType, PeerId};
