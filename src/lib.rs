//! Purpose: Library crate behind the `filestate` CLI and embedding applications.
//! Exports: `api` (public surface), `core` (identity, cache, storage, errors).
//! Role: Persist user-assigned labels per file and keep them stable across renames.
//! Invariants: Embedders go through `api`; `core` is public for tests and diagnostics.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
pub mod store_paths;
