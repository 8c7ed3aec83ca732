//! Fake router administration page.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{rejection::FormRejection, ConnectInfo, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::alerting::Alerting;
use crate::types::{now_rfc3339, HoneypotEvent, LoginAttempt};

pub const LOGIN_PAGE: &str = "/cgi-bin/luci/web";
pub const LOGIN_API: &str = "/cgi-bin/luci/api/xqsystem/login";

#[derive(Clone)]
pub struct AppState {
    pub alerting: Alerting,
    /// How long a login attempt is held before the rejection is sent.
    pub login_delay: Duration,
}

#[derive(Debug, Serialize)]
struct LoginReply {
    code: u16,
    msg: &'static str,
}

/// Routes for the fake login flow; unmatched paths fall through to the
/// static directories in order.
pub fn router(state: AppState, static_dirs: &[PathBuf]) -> Router {
    let app = Router::new()
        .route("/", get(root))
        .route(LOGIN_API, post(login))
        .with_state(state);

    let app = match static_fallback(static_dirs) {
        Some(svc) => app.fallback_service(svc),
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
}

/// Chains one `ServeDir` per directory; a miss in one falls through to the next.
fn static_fallback(dirs: &[PathBuf]) -> Option<Router> {
    let mut dirs = dirs.iter().rev();
    let last = Router::new().fallback_service(static_dir(dirs.next()?));
    Some(dirs.fold(last, |next, dir| {
        Router::new().fallback_service(static_dir(dir).fallback(next))
    }))
}

fn static_dir(dir: &Path) -> ServeDir {
    ServeDir::new(dir).append_index_html_on_directories(true)
}

pub async fn serve(bind: SocketAddr, app: Router, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("App is listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}

async fn root() -> Redirect {
    Redirect::to(LOGIN_PAGE)
}

async fn login(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> impl IntoResponse {
    let source = peer.ip().to_canonical();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let form: BTreeMap<String, String> = match form {
        Ok(Form(fields)) => fields.into_iter().collect(),
        Err(e) => {
            info!("unparseable login body from {}: {}", source, e);
            BTreeMap::new()
        }
    };

    let identity = app.alerting.identify(source).await;
    let event = HoneypotEvent::Login(LoginAttempt {
        timestamp: now_rfc3339(),
        source,
        identity,
        user_agent,
        form,
    });

    let alerting = app.alerting.clone();
    tokio::spawn(async move { alerting.dispatch(&event).await });

    tokio::time::sleep(app.login_delay).await;
    Json(LoginReply {
        code: 401,
        msg: "not auth",
    })
}
