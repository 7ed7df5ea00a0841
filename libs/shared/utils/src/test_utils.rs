use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            ..AppConfig::default()
        }
    }
    
    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub clinic_id: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "clinic".to_string(),
            clinic_id: Uuid::new_v4().to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str, clinic_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            clinic_id: clinic_id.to_string(),
        }
    }

    pub fn doctor(email: &str, clinic_id: &str) -> Self {
        Self::new(email, "DOCTOR", clinic_id)
    }

    pub fn clinic(email: &str, clinic_id: &str) -> Self {
        Self::new(email, "CLINIC", clinic_id)
    }

    pub fn admin(email: &str, clinic_id: &str) -> Self {
        Self::new(email, "ADMIN", clinic_id)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            clinic_id: Some(self.clinic_id.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));
        
        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });
        
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": {
                "role": user.role,
                "clinic_id": user.clinic_id
            },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });
        
        Self::sign(&header.to_string(), &payload.to_string(), secret)
    }

    /// Token whose app_metadata carries no clinic claim.
    pub fn create_clinicless_token(user: &TestUser, secret: &str) -> String {
        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "exp": (Utc::now() + Duration::hours(1)).timestamp()
        });

        Self::sign(&header.to_string(), &payload.to_string(), secret)
    }
    
    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }
    
    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
    
    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    fn sign(header: &str, payload: &str, secret: &str) -> String {
        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header);
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload);
        
        let signing_input = format!("{}.{}", header_encoded, payload_encoded);
        
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);
        
        format!("{}.{}", signing_input, signature_encoded)
    }
}

/// Rows shaped like the PostgREST responses for the scheduling tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn doctor_row(doctor_id: &str, clinic_id: &str, is_active: bool) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "clinic_id": clinic_id,
            "first_name": "Jane",
            "last_name": "Smith",
            "is_active": is_active
        })
    }

    pub fn patient_row(patient_id: &str, clinic_id: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "clinic_id": clinic_id,
            "first_name": "John",
            "last_name": "Doe"
        })
    }
    
    pub fn appointment_row(
        appointment_id: &str,
        clinic_id: &str,
        doctor_id: &str,
        patient_id: &str,
        appointment_date: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "clinic_id": clinic_id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "appointment_date": appointment_date,
            "duration": 30,
            "status": status,
            "reason": "Checkup",
            "notes": null,
            "amount": null,
            "registered_at": "2024-01-01T00:00:00Z",
            "client_reported_at": null,
            "cancellation_reason": null,
            "suggested_new_date": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
    
    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code,
            "details": null,
            "hint": null
        })
    }
}
