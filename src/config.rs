use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::aggregator::DetectionConfig;
use crate::notify::{SmtpSettings, SmtpTls};
use crate::ports;

/// router-honeypot — fake router login page and port-scan detector with email alerts.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "router-honeypot",
    version,
    about = "Fake router login page and port-scan detector with email alerts.",
    long_about = None
)]
pub struct Cli {
    /// Address the fake login page listens on.
    #[arg(long = "http-bind", env = "HTTP_BIND", default_value = "0.0.0.0:3000")]
    pub http_bind: SocketAddr,

    /// Directories served as static files, searched in order.
    #[arg(
        long = "static-dir",
        env = "STATIC_DIRS",
        value_delimiter = ',',
        default_values = [".", "index_files"]
    )]
    pub static_dirs: Vec<PathBuf>,

    /// Do not start the fake login page.
    #[arg(long = "no-http", env = "NO_HTTP", default_value_t = false)]
    pub no_http: bool,

    /// Address the scan-detection listeners bind to.
    #[arg(long = "scan-bind", env = "SCAN_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub scan_bind: IpAddr,

    /// Ports to watch for probes, e.g. `21,22,23,80`. Defaults to every privileged port (1-1023).
    #[arg(long, env = "SCAN_PORTS")]
    pub ports: Option<String>,

    /// File with one port or range per line; overrides --ports.
    #[arg(long = "ports-file", env = "SCAN_PORTS_FILE")]
    pub ports_file: Option<PathBuf>,

    /// Do not start the port-scan listeners.
    #[arg(long = "no-scan-detect", env = "NO_SCAN_DETECT", default_value_t = false)]
    pub no_scan_detect: bool,

    /// Distinct ports a source must touch before it counts as a scan.
    #[arg(long, env = "SCAN_THRESHOLD", default_value_t = 3)]
    pub threshold: usize,

    /// Quiet period after the last probe before a scan is reported, in milliseconds.
    #[arg(long = "debounce-ms", env = "SCAN_DEBOUNCE_MS", default_value_t = 5000)]
    pub debounce_ms: u64,

    /// Quiet period after which a source below the threshold is forgotten, in milliseconds.
    #[arg(long = "idle-ms", env = "SCAN_IDLE_MS", default_value_t = 60_000)]
    pub idle_ms: u64,

    /// Audit log, one line per event.
    #[arg(long = "log-file", env = "LOG_FILE", default_value = "requests.log")]
    pub log_file: PathBuf,

    /// Delay before answering a login attempt, in milliseconds.
    #[arg(long = "login-delay-ms", env = "LOGIN_DELAY_MS", default_value_t = 1000)]
    pub login_delay_ms: u64,

    /// Upper bound on a MAC lookup, in milliseconds.
    #[arg(long = "identity-timeout-ms", env = "IDENTITY_TIMEOUT_MS", default_value_t = 1000)]
    pub identity_timeout_ms: u64,

    #[arg(long = "smtp-host", env = "SMTP_HOST", default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    #[arg(long = "smtp-port", env = "SMTP_PORT", default_value_t = 465)]
    pub smtp_port: u16,

    #[arg(long = "smtp-tls", env = "SMTP_TLS", value_enum, default_value_t = SmtpTls::Tls)]
    pub smtp_tls: SmtpTls,

    /// Sender account; email alerts are disabled when unset.
    #[arg(long = "email-address", env = "EMAIL_ADDRESS")]
    pub email_address: Option<String>,

    #[arg(long = "email-password", env = "EMAIL_PASSWORD", hide_env_values = true)]
    pub email_password: Option<String>,

    /// Alert recipient; defaults to the sender account.
    #[arg(long = "alert-to", env = "ALERT_TO")]
    pub alert_to: Option<String>,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub http: Option<HttpConfig>,
    pub scan: Option<ScanConfig>,
    pub log_file: PathBuf,
    pub identity_timeout: Duration,
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    pub static_dirs: Vec<PathBuf>,
    pub login_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub bind: IpAddr,
    pub ports: BTreeSet<u16>,
    pub detection: DetectionConfig,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let http = (!cli.no_http).then(|| HttpConfig {
            bind: cli.http_bind,
            static_dirs: cli.static_dirs.clone(),
            login_delay: Duration::from_millis(cli.login_delay_ms),
        });

        let scan = if cli.no_scan_detect {
            None
        } else {
            let mut ports = match (&cli.ports_file, &cli.ports) {
                (Some(path), _) => ports::load_ports_from_path(path)?,
                (None, Some(spec)) => ports::parse_ports_str(spec).context("invalid --ports")?,
                (None, None) => ports::default_ports(),
            };
            // The login page owns its port when both would bind the same address.
            if let Some(http) = &http {
                let overlaps = cli.scan_bind.is_unspecified()
                    || http.bind.ip().is_unspecified()
                    || http.bind.ip() == cli.scan_bind;
                if overlaps {
                    ports.remove(&http.bind.port());
                }
            }

            let detection = DetectionConfig {
                threshold: cli.threshold,
                debounce: Duration::from_millis(cli.debounce_ms),
                idle: Duration::from_millis(cli.idle_ms),
            };
            detection.validate()?;

            Some(ScanConfig {
                bind: cli.scan_bind,
                ports,
                detection,
            })
        };

        let smtp = cli.email_address.as_ref().map(|account| SmtpSettings {
            host: cli.smtp_host.clone(),
            port: cli.smtp_port,
            tls: cli.smtp_tls,
            username: account.clone(),
            password: cli.email_password.clone(),
            from: account.clone(),
            to: cli.alert_to.clone().unwrap_or_else(|| account.clone()),
        });

        Ok(Self {
            http,
            scan,
            log_file: cli.log_file.clone(),
            identity_timeout: Duration::from_millis(cli.identity_timeout_ms),
            smtp,
        })
    }
}
