use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::state::State;
use crate::web::app::App;

/// The maximum backlog for TCP listen sockets before refusing connections.
const TCP_LISTEN_BACKLOG: u32 = 1024;

/// Runs the invoker until a termination signal arrives.
///
/// Handles SIGTERM, SIGINT, SIGHUP and SIGQUIT. In-flight invocations complete before the
/// function returns.
pub async fn server(config: Config) -> Result<()> {
    merni::counter!("server.start": 1);

    let listener = bind(config.http_addr).context("failed to start TCP listener")?;
    let state = State::new(config).await?;
    tracing::info!(
        runtime = state.config.telemetry.runtime.as_deref(),
        "invoker ready"
    );

    let app = App::new(state).graceful_shutdown(true);
    let server_handle = tokio::spawn(app.serve(listener));

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;
    tracing::info!("Shutting down ...");

    let result = match server_handle.await {
        Ok(result) => result,
        Err(join_error) => Err(join_error.into()),
    };
    tracing::info!("Shutdown complete");
    result
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(TCP_LISTEN_BACKLOG)?;
    tracing::info!("HTTP server listening on {addr}");

    Ok(listener)
}
