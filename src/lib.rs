//! Purpose: Shared library crate used by the `frames` CLI, its server, and tests.
//! Exports: `api` (stable surface), `core` (frame model, iteration, codecs, errors).
//! Role: Library backing the binary; storage backends plug in through `api::Backend`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
