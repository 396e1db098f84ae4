//! LSP client for communication with gopls.
//!
//! This module provides the connection to a long-lived `gopls serve`
//! subprocess over stdio using JSON-RPC 2.0 with Content-Length framing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      stdin/stdout pipes      ┌─────────────────────┐
//! │   realias       │  ◄──────────────────────────►│   gopls serve       │
//! │   (LspClient)   │    JSON-RPC 2.0 + framing    │                     │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! A background task reads and dispatches frames for the lifetime of the
//! connection; callers block on [`RequestRegistry`] slots until their
//! response arrives, a 30 second timeout fires, or the connection is
//! closed.
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use realias::lsp::LspClient;
//!
//! let client = LspClient::spawn(Path::new("."))?;
//! client.initialize().await?;
//! let edit = client.rename(path, line, character, "newalias").await?;
//! client.close().await?;
//! ```

mod client;
mod framing;
mod registry;

pub use client::{ClientState, LspClient, LspError};
pub use framing::{read_message, write_message};
pub use registry::RequestRegistry;
