//! HTTP server: accept loop and per-connection service wiring.
//!
//! Each connection runs on its own task with HTTP/1.1 and HTTP/2 support;
//! every request is handed to the [`RequestPipeline`]. Shutdown is signaled
//! through a watch channel: the accept loop stops and in-flight requests
//! finish on their own tasks.

pub mod handler;
pub mod response;
pub mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub use handler::RequestPipeline;

/// HTTP server dispatching requests into the hook pipeline.
pub struct Server {
    listener: TcpListener,
    pipeline: Arc<RequestPipeline>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Bind the listen address. The bound address is available through
    /// [`Server::local_addr`] (useful with port 0).
    pub async fn bind(
        addr: SocketAddr,
        pipeline: Arc<RequestPipeline>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            pipeline,
            shutdown_rx,
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown is signaled.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(address = %self.local_addr()?, "serving hooks");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown signaled, no longer accepting connections");
                        return Ok(());
                    }
                }

                accepted = self.listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            error!(error = %err, "error accepting connection");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&self.pipeline);
                    tokio::spawn(async move {
                        handle_connection(stream, remote_addr, pipeline).await;
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    pipeline: Arc<RequestPipeline>,
) {
    let service = service_fn(move |req| {
        let pipeline = Arc::clone(&pipeline);
        async move {
            Ok::<_, std::convert::Infallible>(pipeline.handle(req, remote_addr).await)
        }
    });

    let io = TokioIo::new(stream);
    if let Err(err) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        debug!(error = ?err, remote_addr = %remote_addr, "connection error");
    }
}
