use std::net::SocketAddr;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{response::ApiError, state::AppState, users};

async fn route_not_found() -> ApiError {
    ApiError::NotFound("not found".into())
}

// Method routers answer 405 with an empty body; give it the envelope.
async fn envelope_method_not_allowed(res: Response) -> Response {
    if res.status() == StatusCode::METHOD_NOT_ALLOWED {
        ApiError::MethodNotAllowed.into_response()
    } else {
        res
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(users::router())
                .route("/health", get(|| async { "ok" })),
        )
        .fallback(route_not_found)
        .with_state(state)
        .layer(middleware::map_response(envelope_method_not_allowed))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, username: &str, email: &str) -> (StatusCode, Value) {
        call(
            app,
            Method::POST,
            "/api/v1/users/register",
            None,
            Some(json!({ "username": username, "password": "secret1", "email": email })),
        )
        .await
    }

    async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
        call(
            app,
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    #[tokio::test]
    async fn health_ok() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_profile_flow() {
        let app = build_app(AppState::fake());

        let (status, body) = register(&app, "alice", "a@x.com").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "success");
        assert_eq!(body["data"]["user_id"], 1);

        let (status, body) = register(&app, "alice", "other@x.com").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
        assert_eq!(body["message"], "username already exists");
        assert!(body.get("data").is_none());

        let (status, body) = login(&app, "alice", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "invalid username or password");

        let (status, body) = login(&app, "alice", "secret1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["id"], 1);
        assert_eq!(body["data"]["user"]["username"], "alice");
        assert_eq!(body["data"]["user"]["email"], "a@x.com");
        let token = body["data"]["token"].as_str().expect("token").to_string();

        let (status, body) =
            call(&app, Method::GET, "/api/v1/users/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice");
        assert!(body["data"].get("password_hash").is_none());

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/users/profile",
            Some(&token),
            Some(json!({ "nickname": "Ally" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["nickname"], "Ally");
        assert_eq!(body["data"]["email"], "a@x.com");
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_identical() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "a@x.com").await;

        let wrong_pw = login(&app, "alice", "nope-nope").await;
        let ghost = login(&app, "nobody", "nope-nope").await;
        assert_eq!(wrong_pw, ghost);
        assert_eq!(ghost.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "a@x.com").await;
        let (status, body) = register(&app, "bob", "A@X.com").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "email already in use");
    }

    #[tokio::test]
    async fn profile_requires_valid_bearer() {
        let app = build_app(AppState::fake());

        let (status, body) = call(&app, Method::GET, "/api/v1/users/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "missing authorization header");

        let (status, body) =
            call(&app, Method::GET, "/api/v1/users/profile", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "invalid token");

        let req = Request::get("/api/v1/users/profile")
            .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_for_deleted_user_yields_not_found() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        register(&app, "alice", "a@x.com").await;
        let (_, body) = login(&app, "alice", "secret1").await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let mut ghost = state.users.get_user_by_id(1).await.unwrap();
        ghost.id = 99;
        let forged = state.tokens.issue(&ghost).unwrap();

        let (status, body) =
            call(&app, Method::GET, "/api/v1/users/profile", Some(&forged), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "user not found");

        let (status, _) =
            call(&app, Method::GET, "/api/v1/users/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_input_is_bad_request() {
        let app = build_app(AppState::fake());

        let (status, body) = register(&app, "al", "a@x.com").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);

        let (status, _) = register(&app, "alice", "not-an-email").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = Request::post("/api/v1/users/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn expired_bearer_is_rejected() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        register(&app, "alice", "a@x.com").await;

        let alice = state.users.get_user_by_id(1).await.unwrap();
        let issued = OffsetDateTime::now_utc() - Duration::hours(2);
        let stale = state.tokens.issue_at(&alice, issued).unwrap();

        let (status, body) =
            call(&app, Method::GET, "/api/v1/users/profile", Some(&stale), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
        assert_eq!(body["message"], "token expired");
    }

    #[tokio::test]
    async fn profile_email_taken_by_another_user_is_conflict() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "a@x.com").await;
        register(&app, "bob", "b@x.com").await;
        let (_, body) = login(&app, "bob", "secret1").await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/users/profile",
            Some(&token),
            Some(json!({ "email": "A@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
        assert_eq!(body["message"], "email already in use");

        let (_, body) = call(&app, Method::GET, "/api/v1/users/profile", Some(&token), None).await;
        assert_eq!(body["data"]["email"], "b@x.com");
    }

    #[tokio::test]
    async fn usernames_differ_by_case() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "a@x.com").await;

        let (status, _) = register(&app, "Alice", "b@x.com").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = login(&app, "ALICE", "secret1").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_and_wrong_method_use_the_envelope() {
        let app = build_app(AppState::fake());

        let (status, body) = call(&app, Method::GET, "/api/v1/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
        assert_eq!(body["message"], "not found");

        let (status, body) = call(&app, Method::GET, "/elsewhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "not found");

        let (status, body) = call(&app, Method::GET, "/api/v1/users/login", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["code"], 405);
        assert_eq!(body["message"], "method not allowed");
    }
}
