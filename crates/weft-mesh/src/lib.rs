//! weft-mesh — the mesh runtime: flood relay, peer directory, sessions,
//! chunked transfers, and the host-facing node surface.
//!
//! The radio driver lives behind [`link::Link`]; everything else in this
//! crate is driver-agnostic. See [`node::MeshNode`] for the entry point.

pub mod chunker;
pub mod dedup;
mod dispatch;
pub mod error;
pub mod event;
pub mod link;
pub mod node;
pub mod peer;
pub mod relay;
pub mod session;

pub use error::MeshError;
pub use event::MeshEvent;
pub use link::{Link, LinkEvent, LinkHandle, MemoryHub, MemoryLink};
pub use node::{MeshNode, SendOutcome};
