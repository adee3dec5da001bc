//! Request and response bodies for the auth endpoints.
//!
//! Responses share one envelope shape: `success`, `message`, and an optional
//! `data` object. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::users::{Role, UserRecord};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// User shape returned to clients. Never carries the password hash.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl From<UserRecord> for UserDto {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            email_verified: user.email_verified,
            avatar: user.avatar_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub user: UserDto,
    pub access_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub data: AuthData,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            password_hash: Some("$argon2id$...".to_string()),
            role: Role::User,
            avatar_url: None,
            email_verified: true,
            permissions: Vec::new(),
        }
    }

    #[test]
    fn user_dto_never_exposes_password_hash() {
        let dto = UserDto::from(sample_user());
        let json = serde_json::to_value(&dto).expect("serialize");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["emailVerified"], serde_json::json!(true));
    }

    #[test]
    fn auth_response_uses_camel_case_access_token() {
        let user = sample_user();
        let response = AuthResponse {
            success: true,
            message: "ok".to_string(),
            data: AuthData {
                user: user.into(),
                access_token: "jwt".to_string(),
            },
        };
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["data"]["accessToken"], serde_json::json!("jwt"));
    }

    #[test]
    fn reset_request_reads_camel_case() {
        let request: ResetPasswordRequest = serde_json::from_value(serde_json::json!({
            "token": "abc",
            "newPassword": "Secret123"
        }))
        .expect("deserialize");
        assert_eq!(request.new_password, "Secret123");
    }
}
