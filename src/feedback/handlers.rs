use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    email::{deliver, feedback_email},
    error::ApiError,
    feedback::repo,
    state::AppState,
};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub success: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/contact", post(contact))
}

/// Stores the submission, then notifies the admin off the critical path.
/// 202: the email may still be in flight when the response goes out.
#[instrument(skip(state, payload))]
async fn contact(
    State(state): State<AppState>,
    Json(payload): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactResponse>), ApiError> {
    if payload.name.trim().is_empty() || payload.message.trim().is_empty() {
        return Err(ApiError::Validation(
            "name, email and message are required".into(),
        ));
    }
    if !EMAIL_RE.is_match(payload.email.trim()) {
        return Err(ApiError::Validation("invalid email address".into()));
    }

    let saved = repo::insert(
        &state.db,
        payload.name.trim(),
        payload.email.trim(),
        payload.subject.as_deref(),
        &payload.message,
    )
    .await?;

    if let Some(admin) = &state.config.admin_email {
        deliver(
            state.mailer.clone(),
            feedback_email(
                admin,
                &saved.name,
                &saved.email,
                saved.subject.as_deref(),
                &saved.message,
            ),
        );
    }

    Ok((StatusCode::ACCEPTED, Json(ContactResponse { success: true })))
}
