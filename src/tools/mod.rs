pub mod base;
pub mod filesystem;
pub mod registry;
pub mod shell;
pub mod skill_tool;
pub mod subagent_tools;
pub mod web;

pub use base::{ExecutionContext, SubagentAccess, Tool, ToolResult};
pub use registry::{SchemaDialect, ToolRegistry};
