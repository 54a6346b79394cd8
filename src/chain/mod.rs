//! Chain dispatch module
//!
//! One wallet API drives many ledger implementations. Each chain type plugs
//! in through the [`ChainAdapter`] trait; a [`ChainRegistry`] built at
//! configuration time maps chain type tags to adapters. There is no global
//! registration: the registry is passed explicitly to whatever needs
//! dispatch.

pub mod adapter;
pub mod reference;
pub mod registry;

pub use adapter::{AccountKind, ChainAdapter, DecodedTransfer, SignedEnvelope};
pub use reference::ReferenceAdapter;
pub use registry::ChainRegistry;
