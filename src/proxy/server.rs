//! Proxy server implementation

use crate::config::settings::ProxyConfig;
use crate::proxy::core::ProxyRequest;
use crate::proxy::pipeline::Pipeline;
use crate::{log_debug, log_error, log_info};
use anyhow::{Context, Result};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tracing::info;

pub struct ProxyServer {
    config: ProxyConfig,
    pipeline: Arc<Pipeline>,
}

impl ProxyServer {
    /// Create a proxy server with the production pipeline
    pub fn with_config(config: ProxyConfig) -> Result<Self> {
        let pipeline = Pipeline::from_config(&config).context("Failed to build request pipeline")?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: ProxyConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;

        self.serve(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_info!("Shutdown signal received, draining connections");
            }
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!("🚀 Secure proxy listening on {}", local_addr);
        log_info!(
            "Profile: {:?}, route prefix: {}, health: GET|HEAD {}",
            self.config.profile,
            self.config.route_prefix,
            self.config.health_path
        );
        log_info!(
            "Rate limit: {} requests per {}s per client",
            self.config.rate_limit.max_requests,
            self.config.rate_limit.window_secs
        );

        let sweeper = self
            .pipeline
            .gate()
            .spawn_sweeper(self.pipeline.clock(), self.config.rate_limit.cleanup_interval());

        let pipeline = Arc::clone(&self.pipeline);
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            let pipeline = Arc::clone(&pipeline);
            log_debug!("New connection from: {}", remote_addr);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let pipeline = Arc::clone(&pipeline);
                    async move { handle_request(req, remote_addr, pipeline).await }
                }))
            }
        });

        let server = Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown);

        let result = server.await;
        sweeper.abort();

        if let Err(e) = result {
            log_error!("Server error: {}", e);
            return Err(e.into());
        }
        log_info!("Server stopped");
        Ok(())
    }
}

/// Adapt a hyper request to the pipeline.
///
/// When the client disconnects, hyper drops this future, which drops the
/// in-flight upstream request with it.
pub async fn handle_request(
    req: Request<Body>,
    remote_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
) -> Result<Response<Body>, Infallible> {
    let (parts, body) = req.into_parts();
    let request = ProxyRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        remote_addr,
    };

    Ok(pipeline.handle(request).await.into_hyper())
}
