use axum_extra::extract::cookie::{Cookie, SameSite};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo::User;
use crate::config::CookieConfig;

pub const SESSION_COOKIE: &str = "hostlens_session";

/// 32 bytes from the OS RNG, hex-encoded. The raw token travels only in the
/// cookie; the database sees its SHA-256.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn create(pool: &PgPool, user_id: Uuid) -> anyhow::Result<String> {
    let token = generate_token();
    sqlx::query("INSERT INTO sessions (id, user_id, token_hash) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash_token(&token))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Returns the user bound to `token`, or None for absent/revoked tokens.
pub async fn resolve(pool: &PgPool, token: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT u.id, u.email, u.username, u.password_hash, u.display_name, u.phone,
               u.is_verified, u.created_at, u.updated_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Idempotent: revoking an unknown token is a no-op.
pub async fn revoke(pool: &PgPool, token: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke_all_for_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub fn session_cookie(cfg: &CookieConfig, token: String) -> Cookie<'static> {
    let mut builder = Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Lax)
        .path("/");
    if let Some(domain) = &cfg.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// A name/path/domain twin of the session cookie, for `CookieJar::remove`.
pub fn removal_cookie(cfg: &CookieConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    if let Some(domain) = &cfg.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_hex_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn token_hash_is_deterministic_and_not_identity() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn cookie_attributes() {
        let cfg = CookieConfig {
            secure: true,
            domain: Some("api.example.com".into()),
        };
        let cookie = session_cookie(&cfg, "tok".into());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("api.example.com"));
    }

    #[test]
    fn removal_cookie_matches_name_and_path() {
        let cfg = CookieConfig {
            secure: false,
            domain: None,
        };
        let cookie = removal_cookie(&cfg);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
    }
}
