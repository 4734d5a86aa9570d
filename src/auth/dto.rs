use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::otp::OtpPurpose;
use crate::auth::repo::User;

/// Request body for signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendOtpRequest {
    pub email: String,
    #[serde(default)]
    pub purpose: Option<OtpPurpose>,
}

/// Login accepts email or username in the same field.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEmailRequest {
    pub new_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub is_verified: bool,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            phone: user.phone,
            is_verified: user.is_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Tells the client where to route after a credential check: straight in, or
/// to the verification screen.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Ok,
    VerificationRequired,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: LoginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub logged_in: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&LoginStatus::VerificationRequired).unwrap(),
            "\"verification_required\""
        );
        assert_eq!(serde_json::to_string(&LoginStatus::Ok).unwrap(), "\"ok\"");
    }

    #[test]
    fn unverified_login_response_has_no_user() {
        let response = LoginResponse {
            status: LoginStatus::VerificationRequired,
            user: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("user"));
    }

    #[test]
    fn resend_purpose_is_optional() {
        let req: ResendOtpRequest =
            serde_json::from_str(r#"{"email": "a@example.com"}"#).unwrap();
        assert!(req.purpose.is_none());
        let req: ResendOtpRequest =
            serde_json::from_str(r#"{"email": "a@example.com", "purpose": "signup_verify"}"#)
                .unwrap();
        assert_eq!(req.purpose, Some(OtpPurpose::SignupVerify));
    }
}
