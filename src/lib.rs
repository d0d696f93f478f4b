//! Session-authenticated attendance recording.
//!
//! Callers log in once to obtain a bearer token; every attendance write
//! presents that token, and the [`auth::SessionAuthority`] checks it against
//! both its signature and the stored session row before the
//! [`attendance::AttendanceEngine`] may touch the ledger.

pub mod attendance;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod err;
pub mod models;
pub mod routes;
pub mod scanner;
pub mod store;
pub mod students;
pub mod token;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::attendance::AttendanceEngine;
use crate::auth::SessionAuthority;
use crate::clock::Clock;
use crate::config::Config;
use crate::credentials::Credentials;
use crate::dashboard::Dashboard;
use crate::err::{Error, Success};
use crate::models::ScanMethod;
use crate::scanner::{QrCodeRecognizer, Scanner};
use crate::store::Store;
use crate::students::Roster;
use crate::token::TokenSigner;

pub type Payload<T> = Result<Json<Success<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Success::of(value)))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Err(err)
}

/// Services shared by every request. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<Credentials>,
    pub sessions: Arc<SessionAuthority>,
    pub attendance: Arc<AttendanceEngine>,
    pub roster: Arc<Roster>,
    pub scanner: Arc<Scanner>,
    pub dashboard: Arc<Dashboard>,
}

impl AppState {
    /// Wires every service onto one storage backend.
    pub fn new<S>(store: Arc<S>, clock: Arc<dyn Clock>, config: &Config) -> Self
    where
        S: Store + 'static,
    {
        let signer = match &config.token_secret {
            Some(secret) => TokenSigner::new(secret),
            None => {
                log::warn!("ROLLCALL_TOKEN_SECRET not set, tokens will not survive a restart");
                TokenSigner::ephemeral()
            }
        };

        let credentials = Arc::new(Credentials::new(
            store.clone(),
            clock.clone(),
            config.hash_rounds,
        ));
        let sessions = Arc::new(SessionAuthority::new(
            credentials.clone(),
            store.clone(),
            signer,
            clock.clone(),
            chrono::Duration::days(config.session_days),
        ));
        let attendance = Arc::new(AttendanceEngine::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            config.late_threshold,
        ));
        let roster = Arc::new(Roster::new(store.clone(), clock.clone()));
        let dashboard = Arc::new(Dashboard::new(store.clone(), store.clone(), clock));
        let scanner = Arc::new(
            Scanner::new().with_recognizer(ScanMethod::Qr, Arc::new(QrCodeRecognizer::new(store))),
        );

        Self {
            credentials,
            sessions,
            attendance,
            roster,
            scanner,
            dashboard,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(routes::login))
        .route("/api/auth/logout", post(routes::logout))
        .route("/api/auth/signup", post(routes::signup))
        .route("/api/auth/session", get(routes::current_session))
        .route(
            "/api/students",
            get(routes::list_students).post(routes::create_student),
        )
        .route("/api/students/:id", get(routes::get_student))
        .route(
            "/api/attendance",
            get(routes::list_attendance).post(routes::manual_attendance),
        )
        .route("/api/attendance/record", post(routes::record_scan))
        .route("/api/scanner/process", post(routes::process_capture))
        .route("/api/dashboard/stats", get(routes::dashboard_stats))
        .fallback(err::handler404.into_service())
        .layer(Extension(state))
}

/// Periodically deletes expired session rows. Validation already ignores
/// them, so this only reclaims space.
pub fn spawn_session_purger(sessions: Arc<SessionAuthority>, every: StdDuration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => log::info!("Purged {} expired sessions", purged),
                Err(err) => log::error!("Session purge failed: {}", err),
            }
        }
    });
}
