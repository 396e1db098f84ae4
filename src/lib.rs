//! realias library
//!
//! This library provides the core components for the realias CLI:
//!
//! - `protocol` - JSON-RPC 2.0 and LSP wire types
//! - `lsp` - client for the gopls subprocess (framing, request
//!   correlation, handshake, rename)
//! - `edit` - applies workspace edits to files, or previews them
//! - `discovery` - finds import sites via `go list` and file scanning
//!
//! # Typical flow
//!
//! ```ignore
//! use realias::{discovery, edit, lsp::LspClient};
//!
//! let hits = discovery::find_imports(&patterns, "github.com/user/repo")?;
//! let client = LspClient::spawn(Path::new("."))?;
//! client.initialize().await?;
//! for hit in hits {
//!     let ws_edit = client
//!         .rename(Path::new(&hit.file), hit.line - 1, hit.column - 1, "repo")
//!         .await?;
//!     edit::apply_workspace_edit(&ws_edit, false, &mut std::io::stdout())?;
//! }
//! client.close().await?;
//! ```

pub mod discovery;
pub mod edit;
pub mod lsp;
pub mod protocol;
