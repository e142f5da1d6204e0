//! Purpose: Library crate for hsekv, an embedded transactional multi-store key-value database.
//! Exports: `api` (the public access layer), `abi` (C bindings), `core` (engine internals).
//! Role: Backs the `hsekv` CLI, the C ABI, and Rust callers.
//! Invariants: Rust callers go through `api`; `core` is public only for the binary and tests.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod abi;
pub mod api;
pub mod core;
