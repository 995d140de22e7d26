use frpc_panel::api::{PanelServer, PKG_NAME, VERSION};
use frpc_panel::auth::{Credentials, PASSWORD_ENV};
use frpc_panel::config::Config;
use frpc_panel::panel::ControlPanel;
use frpc_panel::process::{Supervisor, SupervisorConfig};
use frpc_panel::store::ConfigStore;
use frpc_panel::tls;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("frpc_panel=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, source) = Config::load_or_default(settings_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No settings file found, using defaults"),
    }

    print_startup_banner(&config);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let tls_acceptor = tls::acceptor_for(&config.server)?;

    // Credentials first, then the proxy
    let credentials = Credentials::resolve(
        std::env::var(PASSWORD_ENV).ok(),
        Path::new(&config.server.password_file),
    );

    let supervisor = Supervisor::new(
        SupervisorConfig::from_proxy_config(&config.proxy),
        config.proxy.default_config.clone(),
    );
    let panel = ControlPanel::new(ConfigStore::new(config.proxy.config_dir()), supervisor);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server = PanelServer::new(
        bind_addr,
        panel.clone(),
        credentials,
        &config.server.static_dir,
        shutdown_rx,
    );
    if let Some(acceptor) = tls_acceptor {
        server = server.with_tls(acceptor);
    }

    // The proxy only starts once the API is listening
    let server = server.bind().await.map_err(|e| {
        error!(error = %e, "Failed to bind panel server");
        e
    })?;

    panel.supervisor().restart().await;

    let mut server_handle = tokio::spawn(server.run());

    let server_failed = tokio::select! {
        _ = wait_for_shutdown_signal() => false,
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => error!("Panel server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Panel server error"),
                Err(e) => error!(error = %e, "Panel server task failed"),
            }
            true
        }
    };

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    info!("Stopping frpc...");
    panel.stop().await;

    if server_failed {
        anyhow::bail!("panel server stopped, frpc has been shut down");
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting frpc control panel");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        tls = config.server.tls_enabled(),
        static_dir = %config.server.static_dir,
        "Server configuration"
    );
    info!(
        binary = %config.proxy.binary,
        args = ?config.proxy.args,
        config_dir = %config.proxy.config_dir,
        default_config = %config.proxy.default_config,
        log_file = %config.proxy.log_file,
        shutdown_grace_period_secs = config.proxy.shutdown_grace_period_secs,
        "Proxy configuration"
    );
}
