//! Unix socket server
//!
//! Accepts local connections, registers each peer's credentials with the
//! caller registry and answers JSON line requests. Calls are serialized
//! through one lock around the service.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ovpn_configmgr::{CallerRegistry, ConfigEvent, ConfigMgrError, ConfigService};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};

use crate::protocol::{self, EventMessage, Request, Response, SUBSCRIBE};

/// Shared server state
pub struct Server {
    service: Mutex<ConfigService>,
    registry: Arc<CallerRegistry>,
}

impl Server {
    pub fn new(service: ConfigService, registry: Arc<CallerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            service: Mutex::new(service),
            registry,
        })
    }

    /// Listen on `socket_path` until Ctrl-C
    pub async fn run(self: Arc<Self>, socket_path: &Path) -> anyhow::Result<()> {
        if socket_path.exists() {
            fs::remove_file(socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        // Access control happens per call, any local user may connect
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o666))?;
        tracing::info!("Configuration manager listening on {}", socket_path.display());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }

        let _ = fs::remove_file(socket_path);
        Ok(())
    }

    /// Serve one client until it disconnects
    pub async fn handle_connection(&self, stream: UnixStream) {
        let cred = match stream.peer_cred() {
            Ok(cred) => cred,
            Err(e) => {
                tracing::error!("Could not read peer credentials: {}", e);
                return;
            }
        };
        let pid = cred.pid().and_then(|p| u32::try_from(p).ok()).unwrap_or(0);
        let caller = self.registry.connect(cred.uid(), pid);
        tracing::debug!("Client connected: {} (uid {}, pid {})", caller, cred.uid(), pid);

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut events: Option<broadcast::Receiver<ConfigEvent>> = None;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let response = self.handle_line(&caller, &line, &mut events).await;
                            if write_line(&mut writer, &response).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Read error from {}: {}", caller, e);
                            break;
                        }
                    }
                }

                event = async {
                    if let Some(ref mut rx) = events {
                        rx.recv().await
                    } else {
                        std::future::pending().await
                    }
                } => {
                    match event {
                        Ok(event) => {
                            if write_line(&mut writer, &EventMessage { event: &event }).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("{} missed {} events", caller, missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => events = None,
                    }
                }
            }
        }

        self.registry.disconnect(&caller);
        tracing::debug!("Client disconnected: {}", caller);
    }

    async fn handle_line(
        &self,
        caller: &str,
        line: &str,
        events: &mut Option<broadcast::Receiver<ConfigEvent>>,
    ) -> Response {
        let req: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("Malformed request from {}: {}", caller, e);
                return Response::failure(0, &ConfigMgrError::from(e));
            }
        };

        let mut service = self.service.lock().await;
        if req.method == SUBSCRIBE {
            *events = Some(service.subscribe());
            return Response::success(req.id, Value::Null);
        }

        tracing::debug!("{} -> {} {}", caller, req.method, req.target);
        Response::from_result(
            req.id,
            protocol::dispatch(&mut service, &self.registry, caller, &req),
        )
    }
}

async fn write_line<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> std::io::Result<()> {
    let mut data = serde_json::to_vec(msg)?;
    data.push(b'\n');
    writer.write_all(&data).await
}
