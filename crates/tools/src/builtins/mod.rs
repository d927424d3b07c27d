//! Built-in tool implementations.

mod echo;
mod fs;

pub use echo::EchoTool;
pub use fs::{ReadFileTool, WriteFileTool};
