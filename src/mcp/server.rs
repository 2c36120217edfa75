// MCP server implementation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::indexer::Indexer;
use crate::mcp::tools;
use crate::query::engine::QueryEngine;

/// JSON-RPC message
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcMessage {
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    data: Option<Value>,
}

/// MCP tool definition
#[derive(Debug, Serialize, Deserialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// MCP server over stdio
pub struct McpServer {
    engine: Arc<QueryEngine>,
    indexer: Arc<Indexer>,
}

impl McpServer {
    pub fn new(engine: Arc<QueryEngine>, indexer: Arc<Indexer>) -> Self {
        Self { engine, indexer }
    }

    /// Run the MCP server until stdin closes
    pub async fn run(self) -> Result<()> {
        info!("Starting MCP server");

        let (tx, mut rx) = mpsc::unbounded_channel();

        // Stdin reads block, so they live on a blocking task and feed the
        // async loop over a channel.
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error reading from stdin: {}", e);
                        break;
                    }
                }
            }
        });

        while let Some(line) = rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            match self.handle_message(&line).await {
                Ok(Some(response)) => {
                    println!("{}", response);
                    io::stdout().flush()?;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error handling message: {}", e);
                    let error_response = json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": {
                            "code": -32603,
                            "message": format!("Internal error: {}", e)
                        }
                    });
                    println!("{}", error_response);
                    io::stdout().flush()?;
                }
            }
        }

        Ok(())
    }

    /// Handle a JSON-RPC message
    async fn handle_message(&self, message: &str) -> Result<Option<String>> {
        let msg: JsonRpcMessage = serde_json::from_str(message)?;

        match msg.method.as_deref() {
            Some("initialize") => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": "railgraph",
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    }
                });

                Ok(Some(serde_json::to_string(&response)?))
            }

            Some("tools/list") => {
                let tools = self.list_tools();
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "result": { "tools": tools }
                });

                Ok(Some(serde_json::to_string(&response)?))
            }

            Some("tools/call") => {
                if let Some(params) = &msg.params {
                    let result = self.call_tool(params).await?;
                    let response = json!({
                        "jsonrpc": "2.0",
                        "id": msg.id,
                        "result": result
                    });

                    Ok(Some(serde_json::to_string(&response)?))
                } else {
                    let error = json!({
                        "jsonrpc": "2.0",
                        "id": msg.id,
                        "error": {
                            "code": -32602,
                            "message": "Invalid params"
                        }
                    });
                    Ok(Some(serde_json::to_string(&error)?))
                }
            }

            Some("shutdown") => {
                info!("Received shutdown request");
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "result": null
                });
                Ok(Some(serde_json::to_string(&response)?))
            }

            // Notifications carry no id and expect no response
            Some(method) if method.starts_with("notifications/") => Ok(None),

            _ => {
                let error = json!({
                    "jsonrpc": "2.0",
                    "id": msg.id,
                    "error": {
                        "code": -32601,
                        "message": "Method not found"
                    }
                });
                Ok(Some(serde_json::to_string(&error)?))
            }
        }
    }

    /// List available tools
    fn list_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "search_symbols".to_string(),
                description: "Search for symbols (classes, methods, modules) in the codebase"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query"
                        },
                        "k": {
                            "type": "integer",
                            "description": "Number of results to return",
                            "default": 10
                        },
                        "file_types": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "File types to search"
                        }
                    },
                    "required": ["query"]
                }),
            },
            Tool {
                name: "get_snippet".to_string(),
                description: "Get a code snippet from a file".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Path to the file"
                        },
                        "start_line": {
                            "type": "integer",
                            "description": "Starting line number"
                        },
                        "end_line": {
                            "type": "integer",
                            "description": "Ending line number"
                        },
                        "symbol_name": {
                            "type": "string",
                            "description": "Name of symbol to extract"
                        }
                    },
                    "required": ["file_path"]
                }),
            },
            Tool {
                name: "call_graph".to_string(),
                description: "Get the call graph for a symbol".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "symbol": {
                            "type": "string",
                            "description": "Symbol to analyze (Class, Class#method or Class.method)"
                        },
                        "direction": {
                            "type": "string",
                            "enum": ["callers", "callees", "both"],
                            "default": "both"
                        },
                        "depth": {
                            "type": "integer",
                            "default": 1
                        }
                    },
                    "required": ["symbol"]
                }),
            },
            Tool {
                name: "find_similar".to_string(),
                description: "Find similar code patterns".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "code_snippet": {
                            "type": "string",
                            "description": "Code snippet to find similar patterns for"
                        },
                        "k": {
                            "type": "integer",
                            "default": 5
                        },
                        "min_similarity": {
                            "type": "number",
                            "default": 0.7
                        }
                    },
                    "required": ["code_snippet"]
                }),
            },
            Tool {
                name: "get_file_summary".to_string(),
                description: "Get a summary of a file".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Path to the file"
                        }
                    },
                    "required": ["file_path"]
                }),
            },
            Tool {
                name: "find_tests".to_string(),
                description: "Find test files for a given file".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Path to the implementation file"
                        }
                    },
                    "required": ["file_path"]
                }),
            },
            Tool {
                name: "index_status".to_string(),
                description: "Get index status".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "reindex".to_string(),
                description: "Reindex the codebase".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "paths": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Paths to reindex"
                        },
                        "full": {
                            "type": "boolean",
                            "description": "Perform full reindex",
                            "default": false
                        }
                    }
                }),
            },
        ]
    }

    /// Call a tool. Unknown tool names are a hard error.
    async fn call_tool(&self, params: &Value) -> Result<Value> {
        let tool_name = params["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing tool name"))?;
        let empty = serde_json::Map::new();
        let args = params["arguments"].as_object().unwrap_or(&empty);

        match tool_name {
            "search_symbols" => tools::search_symbols(&self.engine, args),
            "get_snippet" => tools::get_snippet(&self.engine, args),
            "call_graph" => tools::call_graph(&self.engine, args),
            "find_similar" => tools::find_similar(&self.engine, args).await,
            "get_file_summary" => tools::get_file_summary(&self.engine, args).await,
            "find_tests" => tools::find_tests(&self.engine, args),
            "index_status" => tools::index_status(&self.engine),
            "reindex" => tools::reindex(&self.indexer, args).await,
            _ => Err(anyhow::anyhow!("Unknown tool: {}", tool_name)),
        }
    }
}
