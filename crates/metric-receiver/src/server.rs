// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP front door: `/_status` for health checks and `/metrics`, which
//! authenticates with HTTP Basic credentials and upgrades to a WebSocket.

use crate::auth::Authorizer;
use crate::connection::{ConnectionSession, SessionConfig};
use crate::intake::IntakeSender;
use axum::{
    extract::{ws::WebSocketUpgrade, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const METRICS_PATH: &str = "/metrics";
pub const STATUS_PATH: &str = "/_status";

/// How long open TLS connections get to finish once shutdown starts.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ServerState {
    pub intake: IntakeSender,
    pub authorizer: Authorizer,
    pub session: SessionConfig,
    pub max_message_size: usize,
    /// Ends open sessions when cancelled.
    pub shutdown: CancellationToken,
}

pub fn router(state: ServerState) -> Router {
    let metrics_router = Router::new()
        .route(METRICS_PATH, get(metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .merge(metrics_router)
        .route(STATUS_PATH, get(status))
        .with_state(state)
}

/// Serves until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr}");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown(shutdown))
        .await
}

/// Serves over TLS until `shutdown` is cancelled.
pub async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: RustlsConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = listener.into_std()?;
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr} with TLS");
    }
    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        graceful_shutdown(shutdown).await;
        shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    });
    axum_server::from_tcp_rustls(listener, tls)
        .handle(handle)
        .serve(router.into_make_service())
        .await
}

async fn graceful_shutdown(shutdown: CancellationToken) {
    shutdown.cancelled().await;
    debug!("Shutdown signal received, no longer accepting connections");
}

async fn status() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    let session = ConnectionSession::new(state.intake, state.session, state.shutdown);
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            session.run(socket).await;
        })
}

async fn require_basic_auth(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let Some((username, password)) = basic_credentials(request.headers()) else {
        return error_response(StatusCode::BAD_REQUEST, "Credentials not supplied");
    };
    match state.authorizer.validate(&username, &password).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            debug!("Rejected credentials for {username}");
            error_response(StatusCode::UNAUTHORIZED, "Credentials invalid")
        }
        Err(e) => {
            error!("Failed to authorize {username}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "Error": message }))).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::intake;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderValue, Request};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn state(authorizer: Authorizer) -> ServerState {
        let (intake, _) = intake::channel(10);
        ServerState {
            intake,
            authorizer,
            session: SessionConfig::default(),
            max_message_size: 5120,
            shutdown: CancellationToken::new(),
        }
    }

    fn static_authorizer() -> Authorizer {
        Authorizer::new_from_static_credentials(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]))
    }

    fn basic(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    }

    async fn get_metrics(app: Router, authorization: Option<String>) -> (StatusCode, String) {
        let mut request = Request::builder().uri(METRICS_PATH);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_basic_credentials_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(basic_credentials(&headers), None);

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&basic("alice", "pa:ss")).unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(basic_credentials(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert_eq!(basic_credentials(&headers), None);

        // no separator between username and password
        let encoded = format!("basic {}", STANDARD.encode("alice"));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&encoded).unwrap());
        assert_eq!(basic_credentials(&headers), None);
    }

    #[tokio::test]
    async fn test_status_needs_no_credentials() {
        let app = router(state(static_authorizer()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(STATUS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let app = router(state(static_authorizer()));
        let (status, body) = get_metrics(app, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"Error":"Credentials not supplied"}"#);
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let app = router(state(static_authorizer()));
        let (status, body) = get_metrics(app, Some(basic("alice", "wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"Error":"Credentials invalid"}"#);
    }

    #[tokio::test]
    async fn test_authorizer_failure() {
        let authorizer = Authorizer::new_remote("http://127.0.0.1:9").unwrap();
        let app = router(state(authorizer));
        let (status, body) = get_metrics(app, Some(basic("alice", "secret"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"Error":"Internal server error"}"#);
    }

    #[tokio::test]
    async fn test_valid_credentials_reach_the_upgrade() {
        let app = router(state(static_authorizer()));
        // no upgrade headers, so the websocket extractor rejects the request
        let (status, body) = get_metrics(app, Some(basic("alice", "secret"))).await;
        assert_ne!(status, StatusCode::UNAUTHORIZED);
        assert_ne!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("Credentials"));
    }

    #[tokio::test]
    async fn test_serve_tls() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let tls = crate::tls::from_pem(
            certified.cert.pem().as_bytes(),
            certified.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_tls(
            listener,
            router(state(static_authorizer())),
            tls,
            shutdown.clone(),
        ));

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let response = client
            .get(format!("https://localhost:{port}{STATUS_PATH}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "OK");

        drop(client);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
