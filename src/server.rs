use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        accept_ride, cancel_ride, complete_ride, compute_fare, create_ride, get_account,
        get_account_history, get_ride, health_check, open_account, payment_webhook, run_reaper,
        run_settlement, AppState,
    },
    auth::middleware::optional_auth_middleware,
    config::Config,
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_app(state: AppState, config: &Config) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let rate_limit = RateLimitLayer::per_minute(config.rate_limit_per_minute);

    let api = Router::new()
        // Fare RPC
        .route("/fare", post(compute_fare))

        // Ride lifecycle
        .route("/rides", post(create_ride))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/complete", post(complete_ride))
        .route("/rides/:id/cancel", post(cancel_ride))

        // Driver wallet
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/history", get(get_account_history))

        // Admin endpoints
        .route("/admin/accounts", post(open_account))
        .route("/admin/settlement/run", post(run_settlement))
        .route("/admin/reaper/run", post(run_reaper))
        .layer(from_fn_with_state(state.jwt.clone(), optional_auth_middleware))
        .layer(from_fn_with_state(rate_limit, rate_limit_middleware));

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))

        // Payment gateway callbacks (authenticated by HMAC, not bearer tokens)
        .route("/webhooks/payment", post(payment_webhook))

        .nest("/api/v1", api)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(create_cors_layer(&config.allowed_origins()))
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::bootstrap::{build_state, Stores};
    use crate::ledger::models::LedgerOperation;
    use crate::payments::signature::sign;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn setup() -> (Router, AppState) {
        let config = Config::for_tests();
        let state = build_state(&config, &Stores::memory()).unwrap();
        (create_app(state.clone(), &config), state)
    }

    fn token(state: &AppState, subject: &str, role: Role) -> String {
        format!("Bearer {}", state.jwt.generate_token(subject, role))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, auth: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .unwrap()
    }

    fn webhook(body: &[u8], signature: &str) -> Request<Body> {
        Request::post("/webhooks/payment")
            .header(header::CONTENT_TYPE, "application/json")
            .header("signature", signature)
            .body(Body::from(body.to_vec()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = setup();
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_payment_webhook_flow() {
        let (app, state) = setup();
        state.ledger.store().open_account("d1").await.unwrap();

        let body = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {
                "id": "pay_1", "order_id": "order_1", "amount": 50000, "notes": {"driverId": "d1"}
            }}}
        })
        .to_string()
        .into_bytes();
        let signature = sign(b"whsec_test", &body);

        let (status, response) = send(&app, webhook(&body, &signature)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["outcome"], "accepted");

        let (status, response) = send(&app, webhook(&body, &signature)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["outcome"], "already_processed");

        let (status, response) = send(&app, webhook(&body, "deadbeef")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["reason"], "bad_signature");

        let account = state.ledger.store().load_account("d1").await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(500));

        let (status, _) = send(&app, Request::get("/webhooks/payment").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_fare_rpc_errors() {
        let (app, state) = setup();

        let (status, body) = send(
            &app,
            post_json("/api/v1/fare", None, json!({"vehicleKey": "car", "distanceKm": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "unauthenticated");

        let rider = token(&state, "rider-1", Role::Rider);
        let (status, body) = send(
            &app,
            post_json("/api/v1/fare", Some(&rider), json!({"vehicleKey": "car"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "invalid-argument");

        let (status, body) = send(
            &app,
            post_json("/api/v1/fare", Some(&rider), json!({"vehicleKey": "bike", "distanceKm": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vehicleKey"], "bike");
        assert!(body["fare"].as_f64().unwrap() >= 50.0);
    }

    #[tokio::test]
    async fn test_account_access_rules() {
        let (app, state) = setup();
        state.ledger.store().open_account("d1").await.unwrap();

        let owner = token(&state, "d1", Role::Driver);
        let (status, body) = send(&app, get_with("/api/v1/accounts/d1", &owner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accountId"], "d1");

        let other = token(&state, "d2", Role::Driver);
        let (status, _) = send(&app, get_with("/api/v1/accounts/d1", &other)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = token(&state, "ops", Role::Admin);
        let (status, body) = send(&app, get_with("/api/v1/accounts/d1/history", &admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 0);

        let (status, _) = send(&app, get_with("/api/v1/accounts/ghost", &admin)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let (app, state) = setup();
        let admin = token(&state, "ops", Role::Admin);
        let driver = token(&state, "d1", Role::Driver);

        let (status, _) = send(
            &app,
            post_json("/api/v1/admin/accounts", Some(&driver), json!({"accountId": "d1"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            post_json("/api/v1/admin/accounts", Some(&admin), json!({"accountId": "d1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accountId"], "d1");

        state
            .ledger
            .apply(
                "d1",
                LedgerOperation::AccrueCommission { amount: dec!(120), ride_id: "r1".into() },
            )
            .await
            .unwrap();

        let (status, _) = send(&app, post_json("/api/v1/admin/settlement/run", Some(&driver), json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, report) = send(&app, post_json("/api/v1/admin/settlement/run", Some(&admin), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["settled"], 1);
        assert_eq!(report["trigger"], "manual");

        let account = state.ledger.store().load_account("d1").await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(-120));

        let (status, report) = send(&app, post_json("/api/v1/admin/reaper/run", Some(&admin), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["examined"], 0);
    }

    #[tokio::test]
    async fn test_ride_lifecycle_over_http() {
        let (app, state) = setup();
        let rider = token(&state, "rider-1", Role::Rider);
        let driver = token(&state, "d1", Role::Driver);

        let (status, ride) = send(
            &app,
            post_json("/api/v1/rides", Some(&rider), json!({"vehicleKey": "car", "distanceKm": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ride["status"], "searching");
        let ride_id = ride["ride_id"].as_str().unwrap().to_string();

        let (status, ride) = send(
            &app,
            post_json(&format!("/api/v1/rides/{}/accept", ride_id), Some(&driver), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ride["status"], "matched");

        let (status, _) = send(
            &app,
            post_json(&format!("/api/v1/rides/{}/accept", ride_id), Some(&token(&state, "d2", Role::Driver)), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, ride) = send(
            &app,
            post_json(&format!("/api/v1/rides/{}/complete", ride_id), Some(&driver), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ride["status"], "completed");

        let (status, _) = send(&app, Request::get(format!("/api/v1/rides/{}", ride_id)).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
