// Railgraph: persistent structural index and retrieval engine for Ruby on
// Rails codebases, exposed to agents over MCP.

pub mod cli;
pub mod config;
pub mod index;
pub mod indexer;
pub mod mcp;
pub mod query;
