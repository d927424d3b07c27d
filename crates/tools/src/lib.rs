//! Minimal test-grade `Tool` implementations exercising
//! `dominds_core::collab::tools::Tool` end to end. Building a full tool
//! catalog is out of scope for this crate — these are the adequate
//! default concrete tools: an echo tool for smoke tests and sandboxed
//! read/write-file tools scoped to a workspace root.

pub mod builtins;

pub use builtins::{EchoTool, ReadFileTool, WriteFileTool};
