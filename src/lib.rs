//! `gatehouse_core` is a common library to build Gatehouse client SDKs for different host
//! environments. If you're a Gatehouse user, you probably want to take a look at one of the
//! existing SDKs.
//!
//! # Overview
//!
//! `gatehouse_core` is organized as a set of building blocks that help to build client SDKs.
//! Different environments have different constraints. Some bindings use all building blocks and
//! others substitute pieces with host-platform implementations.
//!
//! [`evaluations::EvaluationPayload`] is the heart of an SDK: the full resolved dataset (gates,
//! dynamic configs/experiments, layers) for one user at one point in time. It is immutable and
//! only ever replaced wholesale.
//!
//! [`EvaluationsDataAdapter`](data_adapter::EvaluationsDataAdapter) obtains payloads from a
//! prioritized set of sources (explicitly injected bootstrap data, prefetched data, the
//! network, and a persisted cache) and keeps an in-memory shadow so synchronous callers never
//! block.
//!
//! [`EvaluationStore`](evaluation_store::EvaluationStore) holds the single most-recent payload
//! and answers per-feature lookups with provenance: every result carries a reason derived from
//! the data source and whether the name was recognized.
//!
//! [`EventLogger`](events::event_logger::EventLogger) is the telemetry pipeline: exposures are
//! deduplicated, buffered, and flushed on size/time/visibility triggers; failed batches are
//! persisted and replayed at startup and on refocus, so delivery is eventual-best-effort across
//! process restarts.
//!
//! External collaborators sit behind traits: [`storage::StorageGateway`] for persistence,
//! [`network::EvaluationsApi`]/[`network::EventTransport`] for the wire (a default reqwest
//! implementation is provided), and [`visibility::VisibilityNotifier`] for
//! foreground/background transitions.
//!
//! [`Client`](client::Client) wires all of the above together for one user at a time; most
//! bindings are built from a `Client` plus host-side glue.
//!
//! # Versioning
//!
//! This library follows semver. However, it is considered an internal library, so expect
//! frequent breaking changes and major version bumps.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod data_adapter;
pub mod evaluation_store;
pub mod evaluations;
pub mod events;
pub mod network;
pub mod storage;
pub mod user;
pub mod visibility;

mod error;
mod sdk_metadata;

pub use error::{Error, Result};
pub use sdk_metadata::{EventMetaData, SdkMetadata};
pub use user::User;
