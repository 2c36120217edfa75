// MCP boundary: JSON-RPC server and tool handlers

pub mod server;
pub mod tools;
