//! Core domain types for the Mirage deception endpoint
//!
//! This crate carries the pure data model shared by the daemon:
//! - Inbound request identity (fingerprint, semantic key, canonical signature)
//! - Fabricated resources and their stored encodings
//! - Model replies and the default honeypot header set
//! - The attack-signature catalog and its matcher
//! - Append-only interaction records

pub mod catalog;
pub mod interaction;
pub mod reply;
pub mod request;
pub mod resource;

pub use catalog::{AttackCatalog, AttackSignature};
pub use interaction::InteractionRecord;
pub use reply::{default_headers, ModelReply};
pub use request::{InboundRequest, PathError, RequestBody};
pub use resource::{
    decode_headers, encode_headers, FabricatedResource, NewResource, ResourceBody,
};
