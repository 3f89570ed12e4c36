//! Shared test utilities for rbl-ota.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`assertions`] - Assertion macros for flash contents and OTA errors
//! - [`mock`] - Fault-injecting partition store and counting key provider
//! - [`fixtures`] - Firmware images, keys and staged flash layouts
//! - [`prelude`] - Convenience re-exports
//!
//! Only use this crate from integration tests (`tests/`). Unit tests inside
//! `rbl-ota` see a different copy of its types.
//!
//! ```rust,ignore
//! use rbl_ota_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assertions;
pub mod must;
pub mod prelude;

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

#[cfg(feature = "fixtures")]
#[cfg_attr(docsrs, doc(cfg(feature = "fixtures")))]
pub mod fixtures;

pub use must::*;
