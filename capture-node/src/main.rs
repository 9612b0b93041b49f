//! Capture node daemon.
//!
//! Wires the pieces together: config -> supervisor -> API server, plus
//! optional platform registration and heartbeats. Exits 0 on clean shutdown,
//! 1 on config load or supervisor construction failure; individual channel
//! failures at runtime only log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use capture_engine::{CaptureConfig, Supervisor};
use platform_client::{
    AgentCapabilities, AgentHeartbeatRequest, AgentStatus, PlatformClient, PlatformConfig,
    PlatformError, RegisterAgentRequest,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "capture-node", version, about = "Live capture and instant-replay node")]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let cfg = match CaptureConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(config = %args.config.display(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let platform = if cfg.platform.enabled && !cfg.platform.url.is_empty() {
        tracing::info!(url = %cfg.platform.url, "platform integration enabled");
        Some(Arc::new(PlatformClient::new(PlatformConfig {
            url: cfg.platform.url.clone(),
            api_key: cfg.platform.api_key.clone(),
        })))
    } else {
        None
    };

    let supervisor = match Supervisor::new(&cfg, platform.clone()) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            tracing::error!(error = %e, "failed to build supervisor");
            std::process::exit(1);
        }
    };

    // Register with the platform and keep it updated; failure logs and the
    // node runs standalone.
    let mut heartbeat_task = None;
    if let Some(platform) = platform.clone() {
        match register_agent(&platform, &cfg).await {
            Ok(agent_id) => {
                tracing::info!(agent = %agent_id, "registered with platform");
                heartbeat_task = Some(tokio::spawn(run_heartbeat(
                    platform,
                    agent_id,
                    cfg.clone(),
                    Arc::clone(&supervisor),
                )));
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register with platform");
            }
        }
    }

    supervisor.start().await;

    let host = if cfg.api.host.is_empty() {
        "0.0.0.0"
    } else {
        cfg.api.host.as_str()
    };
    let addr = format!("{host}:{}", cfg.api.port);

    let api_task = tokio::spawn(capture_api::serve(addr, Arc::clone(&supervisor), {
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.wait().await }
    }));

    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown signal received");

    supervisor.stop().await;

    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }
    match api_task.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "API server error"),
        Err(e) => tracing::warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    tracing::info!("capture stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("install SIGINT handler")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

async fn register_agent(
    platform: &PlatformClient,
    cfg: &CaptureConfig,
) -> Result<String, PlatformError> {
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());

    let agent_id = if cfg.platform.agent_id.is_empty() {
        format!("agent-{hostname}")
    } else {
        cfg.platform.agent_id.clone()
    };
    let agent_name = if cfg.platform.agent_name.is_empty() {
        format!("Capture Agent ({hostname})")
    } else {
        cfg.platform.agent_name.clone()
    };

    let url_host = if cfg.api.host.is_empty() || cfg.api.host == "0.0.0.0" {
        hostname.clone()
    } else {
        cfg.api.host.clone()
    };

    let request = RegisterAgentRequest {
        id: agent_id,
        name: agent_name,
        url: format!("http://{url_host}:{}", cfg.api.port),
        channel_id: cfg.session.channel_id.clone(),
        capabilities: AgentCapabilities::default(),
        version: VERSION.to_string(),
        hostname,
    };

    let agent = platform.register_agent(&request).await?;
    Ok(agent.id)
}

/// Periodic status heartbeat; sends a final offline heartbeat when the
/// supervisor shuts down.
async fn run_heartbeat(
    platform: Arc<PlatformClient>,
    agent_id: String,
    cfg: CaptureConfig,
    supervisor: Arc<Supervisor>,
) {
    let mut interval = tokio::time::interval(cfg.heartbeat_interval());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = supervisor.wait() => {
                let request = AgentHeartbeatRequest {
                    status: AgentStatus::Offline,
                    session_id: cfg.session.session_id.clone(),
                    channel_id: cfg.session.channel_id.clone(),
                    error_message: String::new(),
                };
                if let Err(e) = platform.heartbeat(&agent_id, &request).await {
                    tracing::warn!(error = %e, "offline heartbeat failed");
                }
                return;
            }
            _ = interval.tick() => {
                let error_message = supervisor.last_error().unwrap_or_default();
                let status = if !error_message.is_empty() {
                    AgentStatus::Error
                } else if supervisor.is_recording() {
                    AgentStatus::Recording
                } else {
                    AgentStatus::Online
                };

                let request = AgentHeartbeatRequest {
                    status,
                    session_id: cfg.session.session_id.clone(),
                    channel_id: cfg.session.channel_id.clone(),
                    error_message,
                };
                if let Err(e) = platform.heartbeat(&agent_id, &request).await {
                    tracing::warn!(error = %e, "heartbeat failed");
                }
            }
        }
    }
}
