use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::router::{appointment_routes, public_appointment_routes};
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

struct Harness {
    mock_server: MockServer,
    config: Arc<AppConfig>,
    clinic_id: String,
}

async fn harness() -> Harness {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();
    Harness {
        mock_server,
        config,
        clinic_id: Uuid::new_v4().to_string(),
    }
}

impl Harness {
    fn app(&self) -> Router {
        appointment_routes(self.config.clone())
    }

    fn token_for(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.config.supabase_jwt_secret, Some(24))
    }

    fn clinic_user(&self) -> TestUser {
        TestUser::clinic("front-desk@clinic.example", &self.clinic_id)
    }

    async fn mock_references(&self, doctor_id: &str, patient_id: &str) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", format!("eq.{}", doctor_id)))
            .and(query_param("clinic_id", format!("eq.{}", self.clinic_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::doctor_row(doctor_id, &self.clinic_id, true)
            ])))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .and(query_param("id", format!("eq.{}", patient_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::patient_row(patient_id, &self.clinic_id)
            ])))
            .mount(&self.mock_server)
            .await;

        // Availability pre-check finds nothing in the way
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("status", "neq.cancelled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&self.mock_server)
            .await;
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(http_method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(http_method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ==============================================================================
// AUTHENTICATION
// ==============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let h = harness().await;

    let response = h.app().oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let h = harness().await;
    let token = JwtTestUtils::create_expired_token(&h.clinic_user(), &h.config.supabase_jwt_secret);

    let response = h.app().oneshot(get("/", Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_without_clinic_is_forbidden() {
    let h = harness().await;
    let token = JwtTestUtils::create_clinicless_token(&h.clinic_user(), &h.config.supabase_jwt_secret);

    let response = h.app().oneshot(get("/", Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json = read_json(response).await;
    assert_eq!(json["error"], "User is not attached to a clinic");
}

// ==============================================================================
// READS
// ==============================================================================

#[tokio::test]
async fn test_get_missing_appointment_is_not_found() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("clinic_id", format!("eq.{}", h.clinic_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let response = h
        .app()
        .oneshot(get(&format!("/{}", appointment_id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_appointment_success() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4().to_string();
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &appointment_id,
                &h.clinic_id,
                &doctor_id,
                &patient_id,
                "2024-03-04T10:00:00Z",
                "confirmed",
            )
        ])))
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let response = h
        .app()
        .oneshot(get(&format!("/{}", appointment_id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["id"], appointment_id);
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["clinic_id"], h.clinic_id);
}

#[tokio::test]
async fn test_list_reports_total_from_content_range() {
    let h = harness().await;
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/appointments"))
        .and(header("Prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-1/2"))
        .mount(&h.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("clinic_id", format!("eq.{}", h.clinic_id)))
        .and(query_param("order", "appointment_date.asc"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &Uuid::new_v4().to_string(),
                &h.clinic_id,
                &doctor_id,
                &patient_id,
                "2024-03-04T10:00:00Z",
                "pending",
            ),
            MockSupabaseResponses::appointment_row(
                &Uuid::new_v4().to_string(),
                &h.clinic_id,
                &doctor_id,
                &patient_id,
                "2024-03-04T11:00:00Z",
                "confirmed",
            )
        ])))
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let response = h.app().oneshot(get("/", Some(&token))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["appointments"].as_array().unwrap().len(), 2);
    assert_eq!(json["total"], 2);
    assert_eq!(json["page"], 1);
    assert_eq!(json["page_count"], 1);
}

#[tokio::test]
async fn test_doctor_listing_is_pinned_to_own_id() {
    let h = harness().await;
    let doctor = TestUser::doctor("doctor@clinic.example", &h.clinic_id);
    let colleague = Uuid::new_v4();

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor.id)))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "*/0"))
        .expect(1)
        .mount(&h.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&doctor);
    let response = h
        .app()
        .oneshot(get(&format!("/?doctor_id={}", colleague), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["total"], 0);
    assert_eq!(json["page_count"], 0);
}

// ==============================================================================
// WRITES
// ==============================================================================

#[tokio::test]
async fn test_create_maps_exclusion_violation_to_conflict() {
    let h = harness().await;
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();
    h.mock_references(&doctor_id, &patient_id).await;

    // Another booking won the race between pre-check and insert
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "conflicting key value violates exclusion constraint \"appointments_no_overlap\"",
            "23P01",
        )))
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let body = json!({
        "doctor_id": doctor_id,
        "patient_id": patient_id,
        "appointment_date": "2024-03-04T10:00:00Z",
        "reason": "Checkup"
    });
    let response = h
        .app()
        .oneshot(send_json("POST", "/", Some(&token), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_appointment_success() {
    let h = harness().await;
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();
    h.mock_references(&doctor_id, &patient_id).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &Uuid::new_v4().to_string(),
                &h.clinic_id,
                &doctor_id,
                &patient_id,
                "2024-03-04T10:00:00Z",
                "pending",
            )
        ])))
        .expect(1)
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let body = json!({
        "doctor_id": doctor_id,
        "patient_id": patient_id,
        "appointment_date": "2024-03-04T10:00:00Z"
    });
    let response = h
        .app()
        .oneshot(send_json("POST", "/", Some(&token), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["appointment"]["status"], "pending");
    assert_eq!(json["message"], "Appointment booked successfully");
}

#[tokio::test]
async fn test_status_change_from_terminal_is_bad_request() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &appointment_id,
                &h.clinic_id,
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                "2024-03-04T10:00:00Z",
                "completed",
            )
        ])))
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let response = h
        .app()
        .oneshot(send_json(
            "PATCH",
            &format!("/{}/status", appointment_id),
            Some(&token),
            json!({ "status": "cancelled" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Cannot change status from completed (allowed: none)");
}

#[tokio::test]
async fn test_edit_of_concurrently_cancelled_appointment_is_rejected() {
    let h = harness().await;
    let appointment_id = Uuid::new_v4().to_string();
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();
    let row = |status: &str| {
        MockSupabaseResponses::appointment_row(
            &appointment_id,
            &h.clinic_id,
            &doctor_id,
            &patient_id,
            "2024-03-04T10:00:00Z",
            status,
        )
    };

    // First read sees it confirmed, the re-read after the guarded write sees it cancelled
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("confirmed")])))
        .up_to_n_times(1)
        .mount(&h.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("cancelled")])))
        .mount(&h.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("status", "eq.confirmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.mock_server)
        .await;

    let token = h.token_for(&h.clinic_user());
    let response = h
        .app()
        .oneshot(send_json(
            "PUT",
            &format!("/{}", appointment_id),
            Some(&token),
            json!({ "notes": "edit" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Appointment is cancelled and can no longer be modified");
}

#[tokio::test]
async fn test_public_booking_notifies_clinic() {
    let h = harness().await;
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();
    h.mock_references(&doctor_id, &patient_id).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                &Uuid::new_v4().to_string(),
                &h.clinic_id,
                &doctor_id,
                &patient_id,
                "2024-03-04T10:00:00Z",
                "pending",
            )
        ])))
        .mount(&h.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .expect(1)
        .mount(&h.mock_server)
        .await;

    let body = json!({
        "doctor_id": doctor_id,
        "patient_id": patient_id,
        "appointment_date": "2024-03-04T10:00:00Z"
    });
    let response = public_appointment_routes(h.config.clone())
        .oneshot(send_json(
            "POST",
            &format!("/clinics/{}/appointments", h.clinic_id),
            None,
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["success"], true);
}
