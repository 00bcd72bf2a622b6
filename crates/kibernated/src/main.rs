//! kibernate: scale-to-zero activation proxy for a Kubernetes deployment.
//!
//! Sits in front of one service, forwards traffic while the deployment is
//! running, scales it up on demand, and scales it down after a
//! configurable idle period. Uptime monitors always receive a success
//! reply and never wake the deployment.
//!
//! # Usage
//!
//! ```text
//! kibernate --service my-svc --deployment my-app --idleTimeoutSecs 600 \
//!     --defaultWaitType loading --uptimeMonitorUserAgentMatch '^UptimeBot'
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use kibernate_control::{ControlPlane, KubeControlPlane};
use kibernate_lifecycle::{
    ActivityTracker, IdlenessSupervisor, LifecycleController, LifecycleOptions, AUTOSTART_TICK,
    DEACTIVATION_TICK,
};
use kibernate_policy::{
    compile_flag, ConfigError, ProxyConfig, Selector, TimeWindow, WaitType, WeeklySchedule,
};
use kibernate_proxy::{build_router, Forwarder, ProxyState};

/// Public listener port.
const LISTEN_PORT: u16 = 8080;

#[derive(Debug, Parser)]
#[command(name = "kibernate", about = "Scale-to-zero activation proxy for a Kubernetes deployment")]
struct Cli {
    /// The namespace of the service and deployment.
    #[arg(long, default_value = "default")]
    namespace: String,

    /// The name of the service to be proxied.
    #[arg(long)]
    service: String,

    /// The name of the deployment to be activated/deactivated.
    #[arg(long)]
    deployment: String,

    /// The port of the service to be proxied.
    #[arg(long = "servicePort", default_value_t = 8080)]
    service_port: u16,

    /// Seconds to wait for activity before deactivating the deployment.
    #[arg(long = "idleTimeoutSecs", default_value_t = 600)]
    idle_timeout_secs: u16,

    /// The type of wait to perform by default: connect, loading, none.
    #[arg(long = "defaultWaitType", default_value = "connect")]
    default_wait_type: String,

    /// Regex matching paths that count as activity.
    #[arg(long = "activityPathMatch", default_value = ".*")]
    activity_path_match: String,

    /// Regex excluding paths from counting as activity.
    #[arg(long = "activityPathExclude", default_value = "")]
    activity_path_exclude: String,

    /// Regex matching User-Agent headers that count as activity.
    #[arg(long = "activityUserAgentMatch", default_value = ".*")]
    activity_user_agent_match: String,

    /// Regex excluding User-Agent headers from counting as activity.
    #[arg(long = "activityUserAgentExclude", default_value = "")]
    activity_user_agent_exclude: String,

    /// Regex matching paths that hold the request until readiness.
    #[arg(long = "waitConnectPathMatch", default_value = "")]
    wait_connect_path_match: String,

    /// Regex excluding paths from the connect wait.
    #[arg(long = "waitConnectPathExclude", default_value = "")]
    wait_connect_path_exclude: String,

    /// Regex matching paths that receive the loading page while waiting.
    #[arg(long = "waitLoadingPathMatch", default_value = "")]
    wait_loading_path_match: String,

    /// Regex excluding paths from the loading page.
    #[arg(long = "waitLoadingPathExclude", default_value = "")]
    wait_loading_path_exclude: String,

    /// Regex matching paths that should not wait for readiness.
    #[arg(long = "waitNonePathMatch", default_value = "")]
    wait_none_path_match: String,

    /// Regex excluding paths from the no-wait handling.
    #[arg(long = "waitNonePathExclude", default_value = "")]
    wait_none_path_exclude: String,

    /// Regex matching User-Agent headers of uptime monitoring requests.
    #[arg(long = "uptimeMonitorUserAgentMatch", default_value = "")]
    uptime_monitor_user_agent_match: String,

    /// Regex excluding User-Agent headers from uptime monitor handling.
    #[arg(long = "uptimeMonitorUserAgentExclude", default_value = "")]
    uptime_monitor_user_agent_exclude: String,

    /// HTTP response code for uptime monitoring requests.
    #[arg(long = "uptimeMonitorResponseCode", default_value_t = 200)]
    uptime_monitor_response_code: u16,

    /// HTTP response body for uptime monitoring requests.
    #[arg(long = "uptimeMonitorResponseMessage", default_value = "OK")]
    uptime_monitor_response_message: String,

    /// UTC range HH:MM-HH:MM without deactivation, Monday through Friday.
    #[arg(long = "noDeactivationMoFrFromToUTC")]
    no_deactivation_mo_fr: Option<String>,

    /// UTC range HH:MM-HH:MM without deactivation on Saturday.
    #[arg(long = "noDeactivationSatFromToUTC")]
    no_deactivation_sat: Option<String>,

    /// UTC range HH:MM-HH:MM without deactivation on Sunday.
    #[arg(long = "noDeactivationSunFromToUTC")]
    no_deactivation_sun: Option<String>,

    /// Autostart the deployment at the beginning of a no-deactivation range.
    #[arg(long = "noDeactivationAutostart")]
    no_deactivation_autostart: bool,

    /// Path of the application readiness probe.
    #[arg(long = "readinessProbePath", default_value = "")]
    readiness_probe_path: String,

    /// Seconds to wait for the readiness probe before proxying anyway;
    /// 0 waits without bound.
    #[arg(long = "readinessTimeoutSecs", default_value_t = 30)]
    readiness_timeout_secs: u16,
}

fn build_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    Ok(ProxyConfig {
        namespace: cli.namespace.clone(),
        service: cli.service.clone(),
        deployment: cli.deployment.clone(),
        listen_port: LISTEN_PORT,
        service_port: cli.service_port,
        target_path_prefix: String::new(),
        idle_timeout_secs: cli.idle_timeout_secs,
        default_wait_type: cli.default_wait_type.parse::<WaitType>()?,
        activity_path: Selector::match_all_unless(
            compile_flag("activityPathMatch", &cli.activity_path_match)?,
            compile_flag("activityPathExclude", &cli.activity_path_exclude)?,
        ),
        activity_user_agent: Selector::match_all_unless(
            compile_flag("activityUserAgentMatch", &cli.activity_user_agent_match)?,
            compile_flag("activityUserAgentExclude", &cli.activity_user_agent_exclude)?,
        ),
        wait_connect_path: Selector::opt_in(
            compile_flag("waitConnectPathMatch", &cli.wait_connect_path_match)?,
            compile_flag("waitConnectPathExclude", &cli.wait_connect_path_exclude)?,
        ),
        wait_loading_path: Selector::opt_in(
            compile_flag("waitLoadingPathMatch", &cli.wait_loading_path_match)?,
            compile_flag("waitLoadingPathExclude", &cli.wait_loading_path_exclude)?,
        ),
        wait_none_path: Selector::opt_in(
            compile_flag("waitNonePathMatch", &cli.wait_none_path_match)?,
            compile_flag("waitNonePathExclude", &cli.wait_none_path_exclude)?,
        ),
        uptime_monitor_user_agent: Selector::opt_in(
            compile_flag(
                "uptimeMonitorUserAgentMatch",
                &cli.uptime_monitor_user_agent_match,
            )?,
            compile_flag(
                "uptimeMonitorUserAgentExclude",
                &cli.uptime_monitor_user_agent_exclude,
            )?,
        ),
        uptime_monitor_response_code: cli.uptime_monitor_response_code,
        uptime_monitor_response_message: cli.uptime_monitor_response_message.clone(),
        schedule: WeeklySchedule {
            mo_fr: parse_window("noDeactivationMoFrFromToUTC", &cli.no_deactivation_mo_fr)?,
            sat: parse_window("noDeactivationSatFromToUTC", &cli.no_deactivation_sat)?,
            sun: parse_window("noDeactivationSunFromToUTC", &cli.no_deactivation_sun)?,
            autostart: cli.no_deactivation_autostart,
        },
        readiness_probe_path: cli.readiness_probe_path.clone(),
        readiness_timeout_secs: cli.readiness_timeout_secs,
    })
}

fn parse_window(flag: &str, value: &Option<String>) -> Result<Option<TimeWindow>, ConfigError> {
    value
        .as_deref()
        .map(|v| TimeWindow::parse(flag, v))
        .transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli).context("invalid configuration")?;
    info!(
        namespace = %config.namespace,
        service = %config.service,
        deployment = %config.deployment,
        "kibernate starting"
    );

    // ── Control plane and loading template ─────────────────────

    let control: Arc<dyn ControlPlane> = Arc::new(
        KubeControlPlane::from_cluster_env(&config.namespace, &config.deployment)
            .context("connecting to the control plane")?,
    );

    // The template is only required when some request can actually be
    // answered with the loading strategy.
    let loading_html = if config.loading_reachable() {
        let html = control
            .loading_template()
            .await
            .context("fetching the loading template")?;
        info!(bytes = html.len(), "loading template fetched");
        Some(Arc::new(html))
    } else {
        None
    };

    // ── Lifecycle controller and supervisor ────────────────────

    let lifecycle = LifecycleController::new(
        control,
        LifecycleOptions {
            deployment: config.deployment.clone(),
            target_base_url: config.target_base_url(),
            readiness_probe_path: config.readiness_probe_path.clone(),
            readiness_timeout_secs: config.readiness_timeout_secs,
        },
    )
    .await
    .context("reading the initial deployment status")?;

    let activity = Arc::new(ActivityTracker::new());
    let supervisor = Arc::new(IdlenessSupervisor::new(
        lifecycle.clone(),
        activity.clone(),
        config.schedule.clone(),
        Duration::from_secs(u64::from(config.idle_timeout_secs)),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler_handle = tokio::spawn(lifecycle.clone().run_reconciler(shutdown_rx.clone()));

    let deactivation_handle = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.run_deactivation(DEACTIVATION_TICK, shutdown).await })
    };

    let autostart_handle = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.run_autostart(AUTOSTART_TICK, shutdown).await })
    };

    // ── Listener ───────────────────────────────────────────────

    let state = ProxyState {
        forwarder: Forwarder::new(config.target_base_url())
            .context("building the forwarding client")?,
        lifecycle,
        activity,
        loading_html,
        config: Arc::new(config),
    };
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "proxy listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reconciler_handle.await;
    let _ = deactivation_handle.await;
    let _ = autostart_handle.await;

    info!("kibernate stopped");
    Ok(())
}
