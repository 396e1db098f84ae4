//! LSP client for driving gopls over stdio.
//!
//! The client owns the gopls subprocess and its pipes, runs a background
//! reader task that dispatches framed responses to the request registry,
//! and exposes the two typed operations this tool needs: the `initialize`
//! handshake and `textDocument/rename`.
//!
//! # Process Cleanup Safety
//!
//! The client owns the child process and guarantees termination on every
//! exit path: `close()` walks the graceful shutdown ladder (shutdown
//! request, exit notification, stdin close, bounded wait, kill), and the
//! child is spawned with `kill_on_drop` so an early return or panic before
//! `close()` still reaps it.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, Message, WorkspaceEdit};

use super::framing::{read_message, write_message};
use super::registry::RequestRegistry;

/// Settling delay after the `initialized` notification. gopls processes the
/// notification asynchronously; issuing the next request immediately can
/// race its internal setup.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How long `close()` waits for a graceful exit before killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Handshake lifecycle of the connection.
///
/// Transitions are one-way: Uninitialized → Initializing → Ready → Closed.
/// Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// LSP client error types.
///
/// These cover the failure taxonomy of the connection: transport failures
/// are fatal, request failures are scoped to one caller, state errors are
/// synchronous and side-effect free.
#[derive(Debug, Error)]
pub enum LspError {
    /// Failed to spawn the gopls subprocess.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error talking to the subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error (framing, encoding, malformed result).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request timed out waiting for a response.
    #[error("request timed out after {secs}s for method {method}")]
    Timeout { method: String, secs: u64 },

    /// Server returned a JSON-RPC error response.
    #[error("server error {code}: {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// The connection was cancelled/closed while the request was in flight.
    #[error("request cancelled: connection closed")]
    Cancelled,

    /// Operation attempted outside the required handshake state.
    #[error("client not ready (state: {0:?})")]
    NotReady(ClientState),
}

/// LSP client bound to a spawned gopls process.
pub struct LspClient {
    /// Write side of the connection. Taken on close; the lock serializes
    /// concurrent writers so frames are never interleaved.
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    /// Child process handle. Taken on close.
    child: tokio::sync::Mutex<Option<Child>>,
    registry: Arc<RequestRegistry>,
    state: Mutex<ClientState>,
    root_uri: Url,
}

impl LspClient {
    /// Spawn `gopls serve` rooted at the given workspace path.
    pub fn spawn(root_path: &Path) -> Result<Self, LspError> {
        Self::spawn_server("gopls", &["serve"], root_path)
    }

    /// Spawn an arbitrary LSP server command. Split out from [`spawn`] so
    /// tests can substitute a mock server script.
    pub fn spawn_server(program: &str, args: &[&str], root_path: &Path) -> Result<Self, LspError> {
        let abs_root = std::fs::canonicalize(root_path)?;
        let root_uri = Url::from_file_path(&abs_root)
            .map_err(|_| LspError::Protocol(format!("invalid workspace root: {:?}", abs_root)))?;

        info!("Spawning LSP server: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LspError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Protocol("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Protocol("child stdout not captured".to_string()))?;

        let registry = Arc::new(RequestRegistry::new());

        tokio::spawn(Self::reader_loop(stdout, Arc::clone(&registry)));

        Ok(Self {
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
            child: tokio::sync::Mutex::new(Some(child)),
            registry,
            state: Mutex::new(ClientState::Uninitialized),
            root_uri,
        })
    }

    /// Background task that reads and dispatches frames for the lifetime of
    /// the connection.
    ///
    /// Malformed frames are skipped rather than fatal (the skip is logged);
    /// only end-of-stream or a transport error terminates the loop.
    async fn reader_loop(stdout: ChildStdout, registry: Arc<RequestRegistry>) {
        let mut reader = BufReader::new(stdout);

        loop {
            if registry.is_cancelled() {
                debug!("Reader loop exiting: connection cancelled");
                return;
            }

            let body = match read_message(&mut reader).await {
                Ok(body) => body,
                Err(e) => {
                    if is_stream_end(&e) {
                        debug!("Reader loop exiting: {:#}", e);
                        // No response can arrive anymore; fail the senders
                        // still blocked instead of letting them time out.
                        registry.cancel();
                        return;
                    }
                    // Header-level garbage; the framing layer has consumed
                    // through the blank line so the next read can realign.
                    warn!("Skipping malformed frame: {:#}", e);
                    continue;
                }
            };

            let value: Value = match serde_json::from_str(&body) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping frame with malformed JSON body: {}", e);
                    continue;
                }
            };

            match Message::classify(value) {
                Some(Message::Response(response)) => registry.deliver(response),
                Some(Message::Notification { method, .. }) => {
                    debug!("Ignoring server notification: {}", method);
                }
                Some(Message::Request { method, .. }) => {
                    // gopls sends e.g. workspace/configuration; we declare no
                    // support for it and let the request go unanswered.
                    debug!("Ignoring server request: {}", method);
                }
                None => {
                    warn!("Skipping frame that is not JSON-RPC shaped");
                }
            }
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Roll a failed handshake back to Uninitialized, unless the connection
    /// was closed underneath it (Closed is terminal).
    fn abort_initializing(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state == ClientState::Initializing {
            *state = ClientState::Uninitialized;
        }
    }

    /// Perform the LSP handshake.
    ///
    /// Declares support for workspace edits as documentChanges batches and
    /// for rename without a prepare step, sends the `initialized`
    /// notification on success, then waits out the settling delay before
    /// reporting Ready. Calling again once Ready is a no-op.
    pub async fn initialize(&self) -> Result<(), LspError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ClientState::Ready => return Ok(()),
                ClientState::Uninitialized => *state = ClientState::Initializing,
                other => return Err(LspError::NotReady(other)),
            }
        }

        let root_name = self
            .root_uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("workspace")
            .to_string();

        let params = json!({
            "processId": std::process::id(),
            "rootUri": self.root_uri.as_str(),
            "capabilities": {
                "workspace": {
                    "workspaceEdit": {
                        "documentChanges": true
                    }
                },
                "textDocument": {
                    "rename": {
                        "dynamicRegistration": false,
                        "prepareSupport": false
                    }
                }
            },
            "workspaceFolders": [{
                "uri": self.root_uri.as_str(),
                "name": root_name
            }]
        });

        if let Err(e) = self.request("initialize", params).await {
            self.abort_initializing();
            return Err(e);
        }

        if let Err(e) = self.notify("initialized", json!({})).await {
            self.abort_initializing();
            return Err(e);
        }

        // Let the server process the notification before the next request.
        tokio::time::sleep(SETTLE_DELAY).await;

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ClientState::Initializing {
                *state = ClientState::Ready;
            }
        }
        debug!("LSP handshake complete, client ready");
        Ok(())
    }

    /// Ask the server to rename the symbol at the given zero-based position.
    pub async fn rename(
        &self,
        file_path: &Path,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Result<WorkspaceEdit, LspError> {
        match self.state() {
            ClientState::Ready => {}
            other => return Err(LspError::NotReady(other)),
        }

        let abs_path = std::fs::canonicalize(file_path)?;
        let uri = Url::from_file_path(&abs_path)
            .map_err(|_| LspError::Protocol(format!("invalid file path: {:?}", abs_path)))?;

        let params = json!({
            "textDocument": { "uri": uri.as_str() },
            "position": { "line": line, "character": character },
            "newName": new_name
        });

        let result = self.request("textDocument/rename", params).await?;

        // A null result means the server found nothing to rename.
        if result.is_null() {
            return Ok(WorkspaceEdit::default());
        }

        serde_json::from_value(result)
            .map_err(|e| LspError::Protocol(format!("malformed workspace edit: {}", e)))
    }

    /// Shut the connection down. Idempotent and safe to call before
    /// `initialize()`.
    ///
    /// Cancels outstanding requests, walks the graceful shutdown protocol,
    /// closes the write side and waits for the subprocess to exit, killing
    /// it after a grace period. On return the subprocess has exited.
    pub async fn close(&self) -> Result<(), LspError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(()); // already closed
        };

        self.set_state(ClientState::Closed);

        // Best-effort graceful shutdown before pulling the plug.
        let (shutdown_id, _rx) = self.registry.register();
        self.registry.remove(shutdown_id);
        let shutdown = JsonRpcRequest::new("shutdown", Value::Null, shutdown_id);
        if let Ok(body) = serde_json::to_string(&shutdown) {
            let _ = self.write_frame(&body).await;
        }
        let exit = JsonRpcNotification::new("exit", Value::Null);
        if let Ok(body) = serde_json::to_string(&exit) {
            let _ = self.write_frame(&body).await;
        }

        // Fail blocked senders and let the reader loop wind down.
        self.registry.cancel();

        // Close the write side so a well-behaved server sees EOF.
        self.stdin.lock().await.take();

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("LSP server exited: {}", status);
            }
            Ok(Err(e)) => {
                warn!("Error waiting for LSP server: {}", e);
            }
            Err(_) => {
                warn!("LSP server did not exit gracefully, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        Ok(())
    }

    /// Send a request and block until its response, timeout or cancellation.
    async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        if self.registry.is_cancelled() {
            return Err(LspError::Cancelled);
        }

        let (id, rx) = self.registry.register();
        let request = JsonRpcRequest::new(method, params, id);
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                self.registry.remove(id);
                return Err(LspError::Protocol(format!(
                    "failed to serialize {} request: {}",
                    method, e
                )));
            }
        };

        if let Err(e) = self.write_frame(&body).await {
            self.registry.remove(id);
            return Err(e);
        }

        let response = self.registry.wait(id, method, rx).await?;

        if let Some(err) = response.error {
            return Err(LspError::Server {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        let notification = JsonRpcNotification::new(method, params);
        let body = serde_json::to_string(&notification).map_err(|e| {
            LspError::Protocol(format!("failed to serialize {} notification: {}", method, e))
        })?;
        self.write_frame(&body).await
    }

    /// Write one frame while holding the stdin lock.
    async fn write_frame(&self, body: &str) -> Result<(), LspError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or(LspError::NotReady(ClientState::Closed))?;
        write_message(stdin, body)
            .await
            .map_err(|e| LspError::Protocol(format!("failed to send message: {:#}", e)))
    }
}

/// True when a framing error means the stream has ended rather than a
/// single frame being malformed.
fn is_stream_end(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
        || err.to_string().contains("Connection closed")
}
