#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Core engine of the masque file-encryption service: worker pool, framed
//! transport, parallel XOR transform, directory walker and configuration
//! store. The `warden` and `envoy` binaries are thin shells around this
//! crate.

pub mod cmdlog;
pub mod config;
pub mod endec;
pub mod logging;
pub mod net;
pub mod pool;
pub mod proto;
pub mod walker;
