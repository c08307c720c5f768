// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warren: a stateful-actor runtime.
//!
//! Actors are long-lived, singleton-keyed objects with durable CBOR state.
//! They accept remote action invocations, broadcast events to subscribed
//! connections, schedule future work through a storage-driver alarm, and
//! hibernate when idle. The manager gateway (the `warrenmgr` crate)
//! resolves client queries to actor ids and routes streams here.

pub mod actor;
pub mod config;
pub mod definition;
pub mod driver;
pub mod error;
pub mod persist;
pub mod protocol;
pub mod runner;
pub mod transport;

pub use actor::{ActionContext, ActorContext, ActorInstance};
pub use config::RunnerConfig;
pub use definition::{ActorDefinition, ActorOptions, RawRequest, RawResponse, Registry};
pub use driver::{MemoryStorage, StorageDriver};
pub use error::{ErrorCode, WarrenError};
pub use protocol::{Encoding, Value};
pub use runner::Runner;
