// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave Key Store - trust core of a key-encryption service
//!
//! This crate unifies heterogeneous secret-storage backends behind one strict
//! [`Store`](store::Store) contract and layers a policy/identity
//! authorization model on top, partitioned into enclaves for multi-tenant
//! isolation.
//!
//! ## Modules
//!
//! - `store` - Store contract and bundled connectors (memory, filesystem, redb)
//! - `repository` - Typed key, policy and identity records
//! - `policy` - Allow/deny rule sets and their evaluation
//! - `enclave` - Enclave registry and per-enclave operations
//! - `auth` - Request paths and authorization decisions
//! - `service` - Authorization-gated administrative surface
//! - `cancel` - Cancellation and deadlines for every operation

pub mod audit;
pub mod auth;
pub mod cancel;
pub mod config;
pub mod enclave;
pub mod error;
pub mod identity;
pub mod layout;
pub mod pattern;
pub mod policy;
pub mod repository;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod validate;

pub use cancel::Context;
pub use error::{KmsError, KmsResult};
pub use identity::Identity;
pub use policy::{Decision, Policy};
pub use service::Service;
