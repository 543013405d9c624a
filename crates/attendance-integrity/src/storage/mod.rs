//! Storage layer for engine state.
//!
//! # Directory layout
//!
//! ```text
//! <state>/
//! ├── config.json
//! ├── directory.json
//! ├── sessions.json
//! ├── ledger.json
//! └── devices.json
//! ```

pub mod state_store;

pub use state_store::{DeviceBinding, EngineState, StateStore};
