use axum::{
    Router,
    routing::{delete, get, post, put},
    middleware::from_fn_with_state,
    extract::DefaultBodyLimit,
};

use http::{HeaderName, HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    compression::CompressionLayer,
    services::ServeDir,
    trace::{TraceLayer, DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, DefaultOnFailure},
    cors::CorsLayer,
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod cookies;
mod error;
mod response;
mod state;
mod db;
mod crypto {
    pub mod csrf;
    pub mod password;
}

mod models {
    pub mod identity;
    pub mod lesson;
    pub mod member_area;
    pub mod module;
    pub mod notification;
    pub mod payment;
    pub mod progress;
    pub mod session;
    pub mod user;
}

mod repositories {
    pub mod grant;
    pub mod lesson;
    pub mod member_area;
    pub mod module;
    pub mod payment;
    pub mod progress;
    pub mod user;
}

mod services {
    pub mod access;
    pub mod auth;
    pub mod catalog;
    pub mod identity;
    pub mod members;
    pub mod notifications;
    pub mod payment_gate;
    pub mod payments;
    pub mod progress;
    pub mod storage;
}

mod handlers {
    pub mod areas;
    pub mod auth;
    pub mod members;
    pub mod payments;
}

mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod member;
    pub mod rate_limit;
}

mod validation {
    pub mod auth;
    pub mod catalog;
    pub mod payment;
}

use config::Config;
use state::AppState;

/// Request body cap outside the material upload route.
const BODY_LIMIT_BYTES: usize = 12 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let (state, progress_rx) = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized with optimized pools");

    let progress_worker = services::progress::spawn_worker(state.db.clone(), progress_rx);
    tracing::info!("✅ Progress telemetry worker started");

    let csrf_header = HeaderName::from_static("x-csrf-token");
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://[::1]:3000"),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::COOKIE,
            csrf_header.clone(),
        ])
        .allow_credentials(true)
        .expose_headers([csrf_header])
        .max_age(Duration::from_secs(86400));

    let protected_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10_000)
            .burst_size(50_000)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid governor configuration"))?,
    );

    let register_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_register,
        ))
        .with_state(state.clone());

    let login_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_login,
        ))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/csrf", get(handlers::auth::refresh_csrf))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let password_routes = Router::new()
        .route(
            "/api/auth/change-password",
            post(handlers::auth::change_password),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_change_password,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::csrf::verify_csrf,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route(
            "/api/areas",
            post(handlers::areas::create_area).get(handlers::areas::list_areas),
        )
        .route(
            "/api/areas/{area_id}/cohorts",
            post(handlers::areas::create_cohort).get(handlers::areas::list_cohorts),
        )
        .route(
            "/api/areas/{area_id}/students",
            post(handlers::areas::upsert_student).get(handlers::areas::list_students),
        )
        .route(
            "/api/areas/{area_id}/modules",
            post(handlers::areas::create_module).get(handlers::areas::list_modules),
        )
        .route(
            "/api/areas/{area_id}/modules/{module_id}",
            put(handlers::areas::update_module).delete(handlers::areas::delete_module),
        )
        .route(
            "/api/areas/{area_id}/modules/{module_id}/grants",
            post(handlers::areas::grant_module).get(handlers::areas::list_grants),
        )
        .route(
            "/api/areas/{area_id}/modules/{module_id}/grants/{email}",
            delete(handlers::areas::revoke_module),
        )
        .route(
            "/api/areas/{area_id}/lessons",
            post(handlers::areas::create_lesson).get(handlers::areas::list_lessons),
        )
        .route(
            "/api/areas/{area_id}/lessons/{lesson_id}",
            put(handlers::areas::update_lesson).delete(handlers::areas::delete_lesson),
        )
        .route(
            "/api/areas/{area_id}/materials",
            post(handlers::areas::upload_material).layer(DefaultBodyLimit::max(
                services::catalog::MAX_MATERIAL_BYTES + 1024 * 1024,
            )),
        )
        .route(
            "/api/areas/{area_id}/payments",
            get(handlers::areas::list_payments),
        )
        .route(
            "/api/areas/{area_id}/payments/{payment_id}/proof",
            get(handlers::areas::payment_proof),
        )
        .route(
            "/api/areas/{area_id}/payments/{payment_id}/approve",
            post(handlers::areas::approve_payment),
        )
        .route(
            "/api/areas/{area_id}/payments/{payment_id}/reject",
            post(handlers::areas::reject_payment),
        )
        .layer(tower_governor::GovernorLayer::new(
            protected_governor_conf.clone(),
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::csrf::verify_csrf,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let member_login_routes = Router::new()
        .route(
            "/api/members/{area_id}/login",
            post(handlers::members::login),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_member_login,
        ))
        .route(
            "/api/members/{area_id}/logout",
            post(handlers::members::logout),
        )
        .with_state(state.clone());

    let member_routes = Router::new()
        .route("/api/members/{area_id}/session", get(handlers::members::session))
        .route("/api/members/{area_id}/modules", get(handlers::members::modules))
        .route(
            "/api/members/{area_id}/lessons/{lesson_id}",
            get(handlers::members::lesson),
        )
        .route(
            "/api/members/{area_id}/lessons/{lesson_id}/progress",
            post(handlers::members::report_progress),
        )
        .route("/api/members/{area_id}/progress", get(handlers::members::progress))
        .route(
            "/api/members/{area_id}/modules/{module_id}/checkout",
            get(handlers::members::checkout_status)
                .post(handlers::members::checkout_open)
                .delete(handlers::members::checkout_dismiss),
        )
        .route(
            "/api/members/{area_id}/modules/{module_id}/checkout/submit",
            post(handlers::members::checkout_submit),
        )
        .route(
            "/api/members/{area_id}/modules/{module_id}/checkout/proof",
            post(handlers::members::checkout_proof),
        )
        .route(
            "/api/members/{area_id}/notifications",
            get(handlers::members::list_notifications),
        )
        .route(
            "/api/members/{area_id}/notifications/read",
            post(handlers::members::mark_notifications_read),
        )
        .route(
            "/api/members/{area_id}/notifications/stream",
            get(handlers::members::notification_stream),
        )
        .layer(tower_governor::GovernorLayer::new(
            protected_governor_conf.clone(),
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::member::require_member,
        ))
        .with_state(state.clone());

    let webhook_routes = Router::new()
        .route("/api/payments/webhook", post(handlers::payments::webhook))
        .with_state(state.clone());

    let materials_dir = state
        .storage
        .root()
        .join(services::catalog::MATERIALS_BUCKET);

    let app = Router::new()
        .merge(register_routes)
        .merge(login_routes)
        .merge(session_routes)
        .merge(password_routes)
        .merge(protected_routes)
        .merge(member_login_routes)
        .merge(member_routes)
        .merge(webhook_routes)
        .nest_service(
            &format!("/storage/{}", services::catalog::MATERIALS_BUCKET),
            ServeDir::new(materials_dir),
        )
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(true))
                        .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                        .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
                )
                .layer(CompressionLayer::new()),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors);

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    progress_worker.abort();
    Ok(())
}
