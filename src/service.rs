//! Deployable service: the HTTP router plus the subscription monitor, with
//! graceful shutdown on SIGTERM / Ctrl+C.
//!
//! On shutdown the HTTP server stops accepting requests first, then the
//! monitor timer is stopped and any cycle in progress runs to completion
//! (including its dedup write) before `bind` returns.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::monitor::MonitorHandle;

pub struct RelayService {
    router: Router,
    monitor: Option<MonitorHandle>,
}

impl RelayService {
    /// `monitor` is the running timer, if subscriptions are enabled.
    pub fn new(router: Router, monitor: Option<MonitorHandle>) -> Self {
        Self { router, monitor }
    }

    /// Serve on `listener` until `shutdown` resolves, then drain the monitor.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().ok();
        info!(?addr, "weibo relay listening");

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server");

        if let Some(monitor) = self.monitor {
            info!("stopping subscription monitor");
            monitor.shutdown().await;
        }
        info!("weibo relay stopped");
        served
    }
}

#[async_trait]
impl shuttle_runtime::Service for RelayService {
    async fn bind(self, addr: SocketAddr) -> Result<(), shuttle_runtime::Error> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        self.serve(listener, shutdown_signal()).await?;
        Ok(())
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
        _ = terminate => info!("received SIGTERM, initiating shutdown"),
    }
}
