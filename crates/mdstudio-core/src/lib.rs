//! Core building blocks for MDStudio client components.
//!
//! This crate provides:
//! - `AsyncValue` - Chainable result of a remote call
//! - `ClaimsContext` - Identity and claim scoping for calls
//! - `RpcSurface` - The call side of the component bus
//! - `Error` - Failure taxonomy shared by all components

pub mod context;
pub mod deferred;
pub mod error;
pub mod traits;

pub use context::{CacheType, ClaimKind, Claims, ClaimsContext, ConnectionType, LogType, Scope};
pub use deferred::{AsyncValue, Member, Resolver, offload};
pub use error::{Error, FailureKind, Result};
pub use traits::{Document, RpcSurface, SessionId};
