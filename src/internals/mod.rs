//! Internal utilities for erniebot
//!
//! Implementation details shared by the transport and resource layers.
//! `retry` is re-exported through `lib.rs` for public use (RetryPolicy).

pub mod retry;
pub(crate) mod sse;
