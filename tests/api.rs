use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use rollcall_server::clock::{parse_date, FixedClock, WallTime};
use rollcall_server::config::Config;
use rollcall_server::models::Role;
use rollcall_server::store::MemoryStore;
use rollcall_server::{app, AppState};

struct Harness {
    app: Router,
    clock: Arc<FixedClock>,
}

async fn harness() -> Harness {
    let config = Config::from_lookup(|key| match key {
        "ROLLCALL_TOKEN_SECRET" => Some("integration-secret".to_string()),
        "ROLLCALL_HASH_ROUNDS" => Some("1000".to_string()),
        _ => None,
    })
    .unwrap();
    let clock = Arc::new(FixedClock::at(
        parse_date("2024-03-04").unwrap(),
        WallTime::from_hm(7, 55).unwrap(),
    ));
    let state = AppState::new(Arc::new(MemoryStore::new()), clock.clone(), &config);
    state
        .credentials
        .create_user("ms.reyes", "correct-horse", Role::Teacher)
        .await
        .unwrap();
    Harness {
        app: app(state),
        clock,
    }
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(&self) -> String {
        let (status, body) = self
            .call(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"username": "ms.reyes", "password": "correct-horse"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn enroll(&self, token: &str, name: &str) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/api/students",
                Some(token),
                Some(json!({"name": name, "strand": "ABM"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["student"].clone()
    }
}

#[tokio::test]
async fn login_rejects_bad_credentials_uniformly() {
    let h = harness().await;

    let (wrong_pw, wrong_body) = h
        .call("POST", "/api/auth/login", None, Some(json!({"username": "ms.reyes", "password": "nope"})))
        .await;
    let (unknown, unknown_body) = h
        .call("POST", "/api/auth/login", None, Some(json!({"username": "ghost", "password": "nope"})))
        .await;
    assert_eq!(wrong_pw, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);

    let (missing, _) = h
        .call("POST", "/api/auth/login", None, Some(json!({"username": "ms.reyes"})))
        .await;
    assert_eq!(missing, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"username": "ms.reyes", "password": "correct-horse"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["user"]["role"], json!("teacher"));
    assert!(body["token"].as_str().unwrap().split('.').count() == 3);
}

#[tokio::test]
async fn protected_routes_need_a_live_session() {
    let h = harness().await;

    let (status, _) = h.call("GET", "/api/auth/session", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = h.call("GET", "/api/auth/session", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = h.login().await;
    let (status, body) = h.call("GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], json!("ms.reyes"));

    let (status, _) = h.call("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.call("GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = h.call("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .call("POST", "/api/attendance/record", Some(&token), Some(json!({"studentId": 1})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sessions_lapse_after_seven_days() {
    let h = harness().await;
    let token = h.login().await;

    h.clock.advance(Duration::days(7));
    let (status, _) = h.call("GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scan_day_runs_in_then_out_then_no_op() {
    let h = harness().await;
    let token = h.login().await;
    let student = h.enroll(&token, "Juan Dela Cruz").await;
    let id = student["id"].as_i64().unwrap();

    let (status, first) = h
        .call(
            "POST",
            "/api/attendance/record",
            Some(&token),
            Some(json!({"studentId": id, "scanMethod": "qr"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["remarks"], json!("present"));
    assert_eq!(first["timeIn"], json!("07:55"));
    assert_eq!(first["studentName"], json!("Juan Dela Cruz"));

    h.clock.advance(Duration::minutes(75));
    let (_, second) = h
        .call(
            "POST",
            "/api/attendance/record",
            Some(&token),
            Some(json!({"studentId": id, "scanMethod": "qr"})),
        )
        .await;
    assert_eq!(second["outcome"], json!("checkedOut"));
    assert_eq!(second["timeOut"], json!("09:10"));
    assert_eq!(second["remarks"], json!("present"));

    h.clock.advance(Duration::minutes(5));
    let (status, third) = h
        .call(
            "POST",
            "/api/attendance/record",
            Some(&token),
            Some(json!({"studentId": id, "scanMethod": "face"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(third["outcome"], json!("alreadyComplete"));
    assert_eq!(third["timeIn"], json!("07:55"));
    assert_eq!(third["timeOut"], json!("09:10"));

    let (_, list) = h
        .call("GET", "/api/attendance?date=2024-03-04", Some(&token), None)
        .await;
    assert_eq!(list["attendance"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn scan_input_errors() {
    let h = harness().await;
    let token = h.login().await;

    let (status, _) = h
        .call("POST", "/api/attendance/record", Some(&token), Some(json!({"scanMethod": "qr"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .call("POST", "/api/attendance/record", Some(&token), Some(json!({"studentId": 4242})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_entry_inserts_then_overwrites() {
    let h = harness().await;
    let token = h.login().await;
    let id = h.enroll(&token, "Maria Clara").await["id"].as_i64().unwrap();

    let (status, created) = h
        .call(
            "POST",
            "/api/attendance",
            Some(&token),
            Some(json!({"student_id": id, "date": "2024-03-01", "time_in": "07:40", "time_out": "16:00"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["updated"], json!(false));

    let (_, updated) = h
        .call(
            "POST",
            "/api/attendance",
            Some(&token),
            Some(json!({"studentId": id, "date": "2024-03-01", "remarks": "absent"})),
        )
        .await;
    assert_eq!(updated["updated"], json!(true));
    assert_eq!(updated["id"], created["id"]);

    let (_, list) = h
        .call("GET", "/api/attendance?date=2024-03-01", Some(&token), None)
        .await;
    let row = &list["attendance"][0];
    assert_eq!(row["remarks"], json!("absent"));
    assert_eq!(row["timeIn"], Value::Null);
    assert_eq!(row["timeOut"], Value::Null);
    assert_eq!(row["studentName"], json!("Maria Clara"));

    let (status, _) = h
        .call(
            "POST",
            "/api/attendance",
            Some(&token),
            Some(json!({"studentId": id, "date": "03/01/2024"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn qr_capture_resolves_student() {
    let h = harness().await;
    let token = h.login().await;
    let student = h.enroll(&token, "Jose Rizal").await;

    let (status, body) = h
        .call(
            "POST",
            "/api/scanner/process",
            Some(&token),
            Some(json!({"scanType": "qr", "payload": student["qrCode"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["studentId"], student["id"]);

    let (status, _) = h
        .call(
            "POST",
            "/api/scanner/process",
            Some(&token),
            Some(json!({"scanType": "face", "payload": "frame"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signup_and_unknown_routes() {
    let h = harness().await;

    let (status, _) = h
        .call("POST", "/api/auth/signup", None, Some(json!({"username": "new", "password": "12345"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = h
        .call("POST", "/api/auth/signup", None, Some(json!({"username": "new", "password": "123456"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], json!("teacher"));
    let (status, _) = h
        .call("POST", "/api/auth/signup", None, Some(json!({"username": "new", "password": "abcdefg"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = h.call("GET", "/api/nowhere", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_summarizes_today() {
    let h = harness().await;

    let (status, _) = h.call("GET", "/api/dashboard/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = h.login().await;
    let on_time = h.enroll(&token, "Juan Dela Cruz").await["id"].as_i64().unwrap();
    h.enroll(&token, "Maria Clara").await;
    h.call(
        "POST",
        "/api/attendance/record",
        Some(&token),
        Some(json!({"studentId": on_time, "scanMethod": "qr"})),
    )
    .await;

    let (status, stats) = h.call("GET", "/api/dashboard/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["date"], json!("2024-03-04"));
    assert_eq!(stats["totalStudents"], json!(2));
    assert_eq!(stats["totalAttendanceToday"], json!(1));
    assert_eq!(stats["strandCounts"]["ABM"], json!(2));
    assert_eq!(stats["strandCounts"]["HUMSS"], json!(0));
    assert_eq!(stats["absentStudents"], json!([]));
}

#[tokio::test]
async fn login_accepts_the_name_as_registered() {
    let h = harness().await;

    let (status, _) = h
        .call("POST", "/api/auth/signup", None, Some(json!({"username": " alice ", "password": "correct-horse"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = h
        .call("POST", "/api/auth/login", None, Some(json!({"username": " alice ", "password": "correct-horse"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], json!("alice"));
}
