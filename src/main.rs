use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use router_honeypot::aggregator::ScanAggregator;
use router_honeypot::alerting::Alerting;
use router_honeypot::audit::FileAuditLog;
use router_honeypot::config::{Cli, Config};
use router_honeypot::identity::ArpTableResolver;
use router_honeypot::listener::ListenerPool;
use router_honeypot::logging::init_logging;
use router_honeypot::notify::{LogNotifier, Notifier, SmtpNotifier};
use router_honeypot::ports::format_port_ranges;
use router_honeypot::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment from .env must be in place before clap reads it.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging();
    match dotenv {
        Ok(path) => info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(".env error: {}", e),
    }

    let config = Config::from_cli(&cli)?;
    log_configuration(&config);

    let notifier: Arc<dyn Notifier> = match config.smtp.clone() {
        Some(settings) => {
            Arc::new(SmtpNotifier::new(settings).context("invalid email settings")?)
        }
        None => {
            warn!("EMAIL_ADDRESS not set, alerts go to the log only");
            Arc::new(LogNotifier)
        }
    };
    let alerting = Alerting::new(
        Arc::new(ArpTableResolver::new()),
        Arc::new(FileAuditLog::new(&config.log_file)),
        notifier,
    )
    .with_identity_timeout(config.identity_timeout);

    let cancel = CancellationToken::new();

    let mut detector = None;
    if let Some(scan) = &config.scan {
        let (handle, task) =
            ScanAggregator::new(scan.detection.clone(), alerting.clone()).spawn(cancel.clone());
        let pool = ListenerPool::start(scan.bind, &scan.ports, handle, &alerting).await?;
        if !pool.failures().is_empty() {
            warn!(
                "{} ports could not be bound (first: {})",
                pool.failures().len(),
                pool.failures()
                    .iter()
                    .next()
                    .map(|(port, e)| format!("{port}: {e}"))
                    .unwrap_or_default()
            );
        }
        detector = Some((pool, task));
    }

    let http_task = config.http.as_ref().map(|http| {
        let state = AppState {
            alerting: alerting.clone(),
            login_delay: http.login_delay,
        };
        let app = server::router(state, &http.static_dirs);
        let bind = http.bind;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(bind, app, cancel).await {
                warn!("HTTP front stopped: {}", e);
            }
        })
    });

    if detector.is_none() && http_task.is_none() {
        warn!("both detectors disabled, nothing to do");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();

    if let Some((pool, task)) = detector {
        pool.shutdown().await;
        let _ = task.await;
    }
    if let Some(task) = http_task {
        let _ = task.await;
    }
    Ok(())
}

fn log_configuration(config: &Config) {
    info!("audit log    : {}", config.log_file.display());
    match &config.http {
        Some(http) => info!("login page   : http://{}", http.bind),
        None => info!("login page   : disabled"),
    }
    match &config.scan {
        Some(scan) => {
            info!("scan bind    : {}", scan.bind);
            info!("scan ports   : {}", format_port_ranges(&scan.ports));
            info!(
                "scan rule    : {} ports, reported after {:?} quiet",
                scan.detection.threshold, scan.detection.debounce
            );
        }
        None => info!("scan detect  : disabled"),
    }
    match &config.smtp {
        Some(smtp) => info!("email alerts : {} via {}:{}", smtp.to, smtp.host, smtp.port),
        None => info!("email alerts : disabled"),
    }
}
