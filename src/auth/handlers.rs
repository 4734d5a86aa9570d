use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangeEmailRequest, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            LoginResponse, LoginStatus, MessageResponse, PublicUser, ResendOtpRequest,
            ResetPasswordRequest, SessionStatusResponse, SignupRequest, UpdateProfileRequest,
            VerifyOtpRequest,
        },
        extractors::CurrentUser,
        otp::OtpPurpose,
        repo::ProfileChanges,
        services::{self, LoginOutcome},
        session::{self, removal_cookie, session_cookie, SESSION_COOKIE},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify-otp", post(verify_otp))
        .route("/auth/resend-otp", post(resend_otp))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(check_session))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
        .route("/auth/change-email", post(change_email))
        .route("/auth/account", delete(delete_account))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).put(update_me))
}

/// The one body every enumeration-sensitive endpoint answers with.
fn generic_otp_response() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "if a matching account exists, a code has been sent",
    })
}

#[instrument(skip(state, payload))]
async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::signup(&state, payload).await?;
    Ok(Json(MessageResponse {
        message: "account created; check your email for a verification code",
    }))
}

#[instrument(skip(state, payload))]
async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::verify_email(&state, &payload.email, &payload.otp).await?;
    Ok(Json(MessageResponse {
        message: "email verified",
    }))
}

#[instrument(skip(state, payload))]
async fn resend_otp(
    State(state): State<AppState>,
    Json(payload): Json<ResendOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let purpose = payload.purpose.unwrap_or(OtpPurpose::SignupVerify);
    match services::resend_otp(&state, &payload.email, purpose).await {
        Ok(()) | Err(ApiError::NotFound) | Err(ApiError::NotVerified) => {
            Ok(generic_otp_response())
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(state, jar, payload))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    match services::login(&state, &payload.identifier, &payload.password).await? {
        LoginOutcome::Authenticated { token, user } => {
            let jar = jar.add(session_cookie(&state.config.cookie, token));
            Ok((
                jar,
                Json(LoginResponse {
                    status: LoginStatus::Ok,
                    user: Some(PublicUser::from(user)),
                }),
            ))
        }
        LoginOutcome::VerificationRequired => Ok((
            jar,
            Json(LoginResponse {
                status: LoginStatus::VerificationRequired,
                user: None,
            }),
        )),
    }
}

#[instrument(skip(state, jar))]
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        session::revoke(&state.db, cookie.value())
            .await
            .map_err(ApiError::Internal)?;
    }
    let jar = jar.remove(removal_cookie(&state.config.cookie));
    Ok((
        jar,
        Json(MessageResponse {
            message: "logged out",
        }),
    ))
}

#[instrument(skip(state, jar))]
async fn check_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let logged_in = match jar.get(SESSION_COOKIE) {
        Some(cookie) => session::resolve(&state.db, cookie.value())
            .await
            .map_err(ApiError::Internal)?
            .is_some(),
        None => false,
    };
    Ok(Json(SessionStatusResponse { logged_in }))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    match services::forgot_password(&state, &payload.email).await {
        Ok(()) | Err(ApiError::NotFound) | Err(ApiError::NotVerified) => {
            Ok(generic_otp_response())
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::reset_password(&state, &payload.email, &payload.otp, &payload.new_password).await?;
    Ok(Json(MessageResponse {
        message: "password reset; log in with your new password",
    }))
}

#[instrument(skip(state, jar, user, payload))]
async fn change_password(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let token = services::change_password(
        &state,
        &user,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    // Every prior session is gone; hand the caller its replacement.
    let jar = jar
        .remove(removal_cookie(&state.config.cookie))
        .add(session_cookie(&state.config.cookie, token));
    Ok((
        jar,
        Json(MessageResponse {
            message: "password changed",
        }),
    ))
}

#[instrument(skip(state, user, payload))]
async fn change_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangeEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::change_email(&state, &user, &payload.new_email, &payload.password).await?;
    Ok(Json(MessageResponse {
        message: "email updated; check the new address for a verification code",
    }))
}

#[instrument(skip(state, jar, user))]
async fn delete_account(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(user): CurrentUser,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    services::delete_account(&state, &user).await?;
    let jar = jar.remove(removal_cookie(&state.config.cookie));
    Ok((
        jar,
        Json(MessageResponse {
            message: "account deleted",
        }),
    ))
}

#[instrument(skip(user))]
async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(user))
}

#[instrument(skip(state, user, payload))]
async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    let updated = services::update_profile(
        &state,
        &user,
        ProfileChanges {
            display_name: payload.display_name,
            phone: payload.phone,
            username: payload.username,
        },
    )
    .await?;
    Ok(Json(PublicUser::from(updated)))
}
