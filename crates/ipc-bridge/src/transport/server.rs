//! Unix socket listener.
//!
//! Each accepted connection gets a reader loop that dispatches frames to the
//! [`BridgeRouter`] in arrival order, and a writer task draining the
//! connection's outbound queue. When the reader stops, the connection is
//! marked closed and the router drops everything it owned.

use crate::domain::config::EndpointConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::ipc::connection::ConnectionHandle;
use crate::ipc::router::BridgeRouter;
use crate::transport::codec::{encode_frame, FrameCodec, FrameError};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    max_message_size: usize,
    outbound_buffer: usize,
}

impl IpcServer {
    /// Bind to a Unix socket path, replacing a stale socket file.
    pub fn bind(path: &Path, config: &EndpointConfig) -> BridgeResult<Self> {
        // Remove stale socket
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| BridgeError::Bind(format!("{}: {}", path.display(), e)))?;
        }

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| BridgeError::Bind(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "IPC endpoint listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            max_message_size: config.max_message_size,
            outbound_buffer: config.outbound_buffer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(self, router: Arc<BridgeRouter>, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            connections.spawn(serve_connection(
                                stream,
                                Arc::clone(&router),
                                self.max_message_size,
                                self.outbound_buffer,
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown.changed() => {
                    info!("IPC endpoint shutting down");
                    break;
                }
            }
        }

        while connections.join_next().await.is_some() {}

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Socket file not removed");
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    router: Arc<BridgeRouter>,
    max_message_size: usize,
    outbound_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let (connection, mut outbound) = ConnectionHandle::new(outbound_buffer);
    let connection_id = connection.id();
    info!(connection_id = %connection_id, "IPC connection accepted");

    let (reader, mut writer) = stream.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = match encode_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&frame).await {
                debug!(connection_id = %connection_id, error = %e, "Write failed, stopping writer");
                break;
            }
        }
    });

    let mut frames = FramedRead::new(reader, FrameCodec::new(max_message_size));
    while !*shutdown.borrow() {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = shutdown.changed() => break,
        };

        match frame {
            None => break,
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "Read failed");
                break;
            }
            Some(Ok(Ok(data))) => router.handle_raw(data, &connection).await,
            Some(Ok(Err(FrameError::Empty))) => {
                warn!(connection_id = %connection_id, "Received empty IPC message");
            }
            Some(Ok(Err(e))) => {
                warn!(connection_id = %connection_id, error = %e, "Ignoring invalid message");
            }
        }
    }

    connection.mark_closed();
    router.connection_closed(connection_id);
    writer_task.abort();
}
