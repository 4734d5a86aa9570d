use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

use crate::auth::dto::SignupRequest;
use crate::auth::otp::{self, OtpPurpose};
use crate::auth::password::{burn_verification, hash_password, verify_password};
use crate::auth::repo::{is_unique_violation, NewUser, ProfileChanges, User};
use crate::auth::session;
use crate::email::{password_reset_email, verification_email};
use crate::error::ApiError;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-z0-9_]{3,32}$").unwrap();
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(ApiError::Validation("invalid email address".into()))
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "username must be 3-32 characters of a-z, 0-9 or _".into(),
        ))
    }
}

/// Creates an unverified account and emails a signup-verification code.
pub async fn signup(state: &AppState, req: SignupRequest) -> Result<(), ApiError> {
    let email = normalize_email(&req.email);
    validate_email(&email)?;
    validate_password(&req.password)?;
    let username = match req.username.as_deref() {
        Some(raw) => {
            let username = raw.trim().to_lowercase();
            validate_username(&username)?;
            Some(username)
        }
        None => None,
    };

    let password_hash = hash_password(&req.password)?;
    let user = User::create(
        &state.db,
        NewUser {
            email: &email,
            username: username.as_deref(),
            password_hash: &password_hash,
            display_name: req.display_name.as_deref(),
            phone: req.phone.as_deref(),
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::DuplicateIdentifier
        } else {
            ApiError::from(e)
        }
    })?;

    let code = otp::issue(&state.db, &state.config.otp_pepper, user.id, OtpPurpose::SignupVerify)
        .await?;
    crate::email::deliver(state.mailer.clone(), verification_email(&user.email, &code));
    info!(user_id = %user.id, "user signed up, verification pending");
    Ok(())
}

/// Consumes a signup-verification code; the account becomes loginable.
/// Unknown email, wrong code, expired code and consumed code all surface as
/// the same generic failure.
pub async fn verify_email(state: &AppState, email: &str, code: &str) -> Result<(), ApiError> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(ApiError::OtpInvalidOrExpired);
    };
    let ok = otp::verify(
        &state.db,
        &state.config.otp_pepper,
        user.id,
        OtpPurpose::SignupVerify,
        code,
    )
    .await?;
    if !ok {
        return Err(ApiError::OtpInvalidOrExpired);
    }
    User::mark_verified(&state.db, user.id).await?;
    info!(user_id = %user.id, "email verified");
    Ok(())
}

pub enum LoginOutcome {
    Authenticated { token: String, user: User },
    /// Password matched but the account is unverified: a fresh code was
    /// issued and no session exists.
    VerificationRequired,
}

pub async fn login(
    state: &AppState,
    identifier: &str,
    candidate: &str,
) -> Result<LoginOutcome, ApiError> {
    let identifier = normalize_email(identifier);
    let Some(user) = User::find_by_identifier(&state.db, &identifier).await? else {
        // Unknown identifier costs one hash, same as the known path below.
        burn_verification(candidate);
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(candidate, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    if !user.is_verified {
        let code = otp::issue(
            &state.db,
            &state.config.otp_pepper,
            user.id,
            OtpPurpose::SignupVerify,
        )
        .await?;
        crate::email::deliver(state.mailer.clone(), verification_email(&user.email, &code));
        return Ok(LoginOutcome::VerificationRequired);
    }

    let token = session::create(&state.db, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginOutcome::Authenticated { token, user })
}

/// Issues a password-reset code for a verified account. `NotFound` and
/// `NotVerified` are internal routing values only; the handler collapses
/// them into the generic success response.
pub async fn forgot_password(state: &AppState, email: &str) -> Result<(), ApiError> {
    let email = normalize_email(email);
    let user = User::find_by_email(&state.db, &email).await?;
    match user {
        None => {
            otp::burn_issue(&state.config.otp_pepper);
            Err(ApiError::NotFound)
        }
        Some(user) if !user.is_verified => {
            otp::burn_issue(&state.config.otp_pepper);
            Err(ApiError::NotVerified)
        }
        Some(user) => {
            let code = otp::issue(
                &state.db,
                &state.config.otp_pepper,
                user.id,
                OtpPurpose::PasswordReset,
            )
            .await?;
            crate::email::deliver(state.mailer.clone(), password_reset_email(&user.email, &code));
            Ok(())
        }
    }
}

/// Re-issues a code of the given purpose, superseding the previous one. Same
/// internal routing contract as `forgot_password`.
pub async fn resend_otp(
    state: &AppState,
    email: &str,
    purpose: OtpPurpose,
) -> Result<(), ApiError> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        otp::burn_issue(&state.config.otp_pepper);
        return Err(ApiError::NotFound);
    };

    // A code only makes sense while the account is in the matching state.
    let coherent = match purpose {
        OtpPurpose::SignupVerify => !user.is_verified,
        OtpPurpose::PasswordReset => user.is_verified,
    };
    if !coherent {
        otp::burn_issue(&state.config.otp_pepper);
        return Err(ApiError::NotFound);
    }

    let code = otp::issue(&state.db, &state.config.otp_pepper, user.id, purpose).await?;
    let message = match purpose {
        OtpPurpose::SignupVerify => verification_email(&user.email, &code),
        OtpPurpose::PasswordReset => password_reset_email(&user.email, &code),
    };
    crate::email::deliver(state.mailer.clone(), message);
    Ok(())
}

/// Consumes a reset code and replaces the password. Every session and
/// challenge dies with the old password; the client logs in again.
pub async fn reset_password(
    state: &AppState,
    email: &str,
    code: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    validate_password(new_password)?;
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(ApiError::OtpInvalidOrExpired);
    };
    let ok = otp::verify(
        &state.db,
        &state.config.otp_pepper,
        user.id,
        OtpPurpose::PasswordReset,
        code,
    )
    .await?;
    if !ok {
        return Err(ApiError::OtpInvalidOrExpired);
    }

    let new_hash = hash_password(new_password)?;
    User::update_password(&state.db, user.id, &new_hash).await?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

/// In-session password change. All sessions are revoked with the old
/// password; the returned token is the caller's replacement session.
pub async fn change_password(
    state: &AppState,
    user: &User,
    current: &str,
    new_password: &str,
) -> Result<String, ApiError> {
    validate_password(new_password)?;
    if new_password == current {
        return Err(ApiError::Validation(
            "new password must differ from the current one".into(),
        ));
    }
    if !verify_password(current, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    let new_hash = hash_password(new_password)?;
    User::update_password(&state.db, user.id, &new_hash).await?;
    let token = session::create(&state.db, user.id).await?;
    info!(user_id = %user.id, "password changed");
    Ok(token)
}

/// Moves the account to a new login email, which must be verified before the
/// next login succeeds. The current session stays alive.
pub async fn change_email(
    state: &AppState,
    user: &User,
    new_email: &str,
    candidate: &str,
) -> Result<(), ApiError> {
    let new_email = normalize_email(new_email);
    validate_email(&new_email)?;
    if !verify_password(candidate, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    User::update_email(&state.db, user.id, &new_email)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::DuplicateIdentifier
            } else {
                ApiError::from(e)
            }
        })?;

    let code = otp::issue(
        &state.db,
        &state.config.otp_pepper,
        user.id,
        OtpPurpose::SignupVerify,
    )
    .await?;
    crate::email::deliver(state.mailer.clone(), verification_email(&new_email, &code));
    info!(user_id = %user.id, "email changed, re-verification pending");
    Ok(())
}

/// Partial update of the mutable display fields. Username changes go through
/// the same validation and uniqueness rules as signup.
pub async fn update_profile(
    state: &AppState,
    user: &User,
    mut changes: ProfileChanges,
) -> Result<User, ApiError> {
    if let Some(raw) = changes.username.take() {
        let username = raw.trim().to_lowercase();
        validate_username(&username)?;
        changes.username = Some(username);
    }
    User::update_profile(&state.db, user.id, &changes)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::DuplicateIdentifier
            } else {
                ApiError::from(e)
            }
        })
}

pub async fn delete_account(state: &AppState, user: &User) -> Result<(), ApiError> {
    User::delete(&state.db, user.id).await?;
    info!(user_id = %user.id, "account deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization_folds_case_and_space() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a b@c.co").is_err());
    }

    #[test]
    fn password_length_floor() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn username_charset_and_length() {
        assert!(validate_username("ada_99").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("UPPER").is_err());
    }
}
