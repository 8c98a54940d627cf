//! # cdfsync Protocol
//!
//! Content document fragment (CDF) types and hub wire formats for cdfsync.
//!
//! This crate provides:
//! - `EntityUuid` and `ContentHash` identity types
//! - `Cdf` and `CdfDocument` for exported entities and their dependency edges
//! - `LocalReference` for tagging local objects as real or stub
//! - Republish webhook payloads and HMAC request signing
//! - JSON encoding/decoding of hub documents
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cdf;
mod document;
mod error;
mod hash;
mod id;
mod local;
mod signature;
mod webhook;

pub use cdf::{Cdf, CdfAttribute, CdfMetadata, CdfType, Dependencies};
pub use document::CdfDocument;
pub use error::{ProtocolError, ProtocolResult};
pub use hash::ContentHash;
pub use id::EntityUuid;
pub use local::{LocalId, LocalReference};
pub use signature::{RequestSigner, SIGNATURE_SCHEME};
pub use webhook::{CrudOperation, EntityDescriptor, WebhookEndpoint, WebhookPayload};
