//! # CLI Command Implementations

use provkernel::config::KernelConfig;
use provkernel::server::{Listener, ServerContext, Service};
use provkernel::{Client, ServerError, tls};
use provkernel_core::{Kernel, QueryReply, dispatch};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_rustls::{TlsAcceptor, TlsConnector};

// =============================================================================
// START COMMAND
// =============================================================================

/// Run the kernel until SIGINT or SIGTERM.
pub async fn cmd_start(config: KernelConfig) -> Result<(), ServerError> {
    std::fs::create_dir_all(config.cfg_dir())?;
    let pid_file = config.pid_file();
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))?;

    println!("Provenance Kernel Starting...");
    println!();
    println!("Configuration:");
    println!("  Root:     {}", config.root.display());
    println!("  Control:  {}:{}", config.listen.local, config.ports.control);
    println!("  Query:    {}:{}", config.listen.local, config.ports.query);
    println!("  Remote:   {}:{}", config.listen.remote, config.ports.remote_query);
    println!("  Sketches: {}:{}", config.listen.remote, config.ports.remote_sketch);
    println!("  TLS:      {}", if config.tls.enabled { "mutual" } else { "off" });
    println!();

    let kernel = Arc::new(Kernel::with_builtins(config.settings()));
    let dispatcher = dispatch::spawn(Arc::clone(&kernel))?;

    replay_script(&config, &kernel).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let context = ServerContext {
        kernel: Arc::clone(&kernel),
        control_read_timeout: config.control_read_timeout(),
    };
    let listeners = match server_tls(&config) {
        Ok(acceptor) => bind_all(&config, acceptor).await,
        Err(e) => {
            tracing::error!(error = %e, "TLS material unavailable; no listener started");
            Vec::new()
        }
    };
    let tasks: Vec<_> = listeners
        .into_iter()
        .map(|listener| listener.spawn(context.clone(), shutdown_rx.clone()))
        .collect();

    shutdown_signal().await;

    {
        let kernel = Arc::clone(&kernel);
        if let Err(e) = tokio::task::spawn_blocking(move || kernel.shutdown()).await {
            tracing::error!(error = %e, "kernel shutdown task failed");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "listener task failed");
        }
    }

    if dispatcher.join().is_err() {
        tracing::error!("dispatch thread panicked");
    }
    if let Err(e) = std::fs::remove_file(&pid_file) {
        tracing::warn!(path = %pid_file.display(), error = %e, "cannot remove PID file");
    }
    tracing::info!("provkernel stopped");
    Ok(())
}

async fn replay_script(config: &KernelConfig, kernel: &Arc<Kernel>) {
    let script = config.script_file();
    if !script.exists() {
        return;
    }
    tracing::info!(path = %script.display(), "replaying configuration");
    let kernel = Arc::clone(kernel);
    let path = script.clone();
    match tokio::task::spawn_blocking(move || kernel.load_config(&path)).await {
        Ok(Ok(output)) => {
            for line in output.lines() {
                tracing::info!(path = %script.display(), "{}", line);
            }
        }
        Ok(Err(e)) => tracing::error!(path = %script.display(), error = %e, "configuration replay failed"),
        Err(e) => tracing::error!(error = %e, "configuration replay task failed"),
    }
}

fn server_tls(config: &KernelConfig) -> Result<Option<TlsAcceptor>, ServerError> {
    if !config.tls.enabled {
        tracing::warn!("TLS disabled; listeners accept plain TCP");
        return Ok(None);
    }
    tls::server_acceptor(&config.tls_paths()).map(Some)
}

async fn bind_all(config: &KernelConfig, tls: Option<TlsAcceptor>) -> Vec<Listener> {
    let endpoints = [
        (Service::Control, &config.listen.local, config.ports.control),
        (Service::Query, &config.listen.local, config.ports.query),
        (Service::RemoteQuery, &config.listen.remote, config.ports.remote_query),
        (Service::RemoteSketch, &config.listen.remote, config.ports.remote_sketch),
    ];

    let mut listeners = Vec::with_capacity(endpoints.len());
    for (service, host, port) in endpoints {
        let addr = format!("{}:{}", host, port);
        match Listener::bind(service, &addr, tls.clone()).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => tracing::error!(service = service.name(), error = %e, "listener not started"),
        }
    }
    listeners
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}

// =============================================================================
// CLIENT COMMANDS
// =============================================================================

fn client_tls(config: &KernelConfig) -> Result<Option<TlsConnector>, ServerError> {
    if !config.tls.enabled {
        return Ok(None);
    }
    tls::client_connector(&config.tls_paths()).map(Some)
}

/// Send one control command and print its output.
pub async fn cmd_control(config: &KernelConfig, command: &str) -> Result<(), ServerError> {
    let connector = client_tls(config)?;
    let mut client =
        Client::connect(&config.listen.local, config.ports.control, connector.as_ref()).await?;
    let output = client.control(command).await?;
    client.close().await?;
    println!("{}", output);
    Ok(())
}

/// Send one query and print the graph as pretty JSON, or the help text.
pub async fn cmd_query(config: &KernelConfig, query: &str) -> Result<(), ServerError> {
    let connector = client_tls(config)?;
    let mut client =
        Client::connect(&config.listen.local, config.ports.query, connector.as_ref()).await?;
    let reply = client.query(query).await?;
    client.close().await?;

    match reply {
        QueryReply::Graph(graph) => {
            let json = serde_json::to_string_pretty(&graph)
                .map_err(|e| ServerError::Protocol(e.to_string()))?;
            println!("{}", json);
        }
        QueryReply::Help(text) => println!("{}", text),
    }
    Ok(())
}

// =============================================================================
// CHECK-CONFIG COMMAND
// =============================================================================

/// Print the effective configuration and the resolved paths.
pub fn cmd_check_config(config: &KernelConfig) -> Result<(), ServerError> {
    let json =
        serde_json::to_string_pretty(config).map_err(|e| ServerError::Config(e.to_string()))?;
    println!("{}", json);
    println!();
    println!("Configuration script: {}", config.script_file().display());
    println!("PID file:             {}", config.pid_file().display());
    if config.tls.enabled {
        let paths = config.tls_paths();
        for (label, path) in [
            ("server certificate", &paths.server_cert),
            ("server key", &paths.server_key),
            ("client CA", &paths.client_ca),
            ("server CA", &paths.server_ca),
            ("client certificate", &paths.client_cert),
            ("client key", &paths.client_key),
        ] {
            let state = if path.exists() { "ok" } else { "missing" };
            println!("  {:<19} {} ({})", label, path.display(), state);
        }
    }
    Ok(())
}
