use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Codes are fixed-width numeric so leading zeros survive transport.
pub const CODE_LEN: usize = 6;
const CODE_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    SignupVerify,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignupVerify => "signup_verify",
            Self::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: String,
    pub code_hash: String,
    pub salt: String,
    pub expires_at: OffsetDateTime,
    pub consumed: bool,
    pub created_at: OffsetDateTime,
}

impl OtpChallenge {
    /// Strict wall-clock check: at `expires_at` the code is already dead.
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        !self.consumed && now < self.expires_at
    }
}

fn generate_code() -> String {
    let limit = 10u32.pow(CODE_LEN as u32);
    format!("{:0width$}", OsRng.gen_range(0..limit), width = CODE_LEN)
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_code(pepper: &str, salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Comparison over the full length regardless of where bytes diverge.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Creates a fresh challenge for (user, purpose), superseding any prior one
/// in the same transaction. Returns the plaintext code for email delivery
/// only; it is never written anywhere.
pub async fn issue(
    pool: &PgPool,
    pepper: &str,
    user_id: Uuid,
    purpose: OtpPurpose,
) -> anyhow::Result<String> {
    let code = generate_code();
    let salt = generate_salt();
    let code_hash = hash_code(pepper, &salt, &code);
    let expires_at = OffsetDateTime::now_utc() + CODE_TTL;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM otp_challenges WHERE user_id = $1 AND purpose = $2")
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO otp_challenges (id, user_id, purpose, code_hash, salt, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(purpose.as_str())
    .bind(&code_hash)
    .bind(&salt)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(code)
}

/// The code-generation and hashing work of `issue` without the database
/// write. Keeps the miss path of enumeration-sensitive flows on the same
/// clock as the hit path.
pub fn burn_issue(pepper: &str) {
    let code = generate_code();
    let salt = generate_salt();
    let _ = hash_code(pepper, &salt, &code);
}

/// Checks `candidate` against the active challenge and consumes it on match.
/// Missing, expired, wrong-code and already-consumed all come back as
/// `Ok(false)` so callers cannot tell the cases apart. Consumption is an
/// atomic check-and-mark: of N concurrent correct attempts exactly one sees
/// `Ok(true)`.
pub async fn verify(
    pool: &PgPool,
    pepper: &str,
    user_id: Uuid,
    purpose: OtpPurpose,
    candidate: &str,
) -> anyhow::Result<bool> {
    let challenge = sqlx::query_as::<_, OtpChallenge>(
        r#"
        SELECT id, user_id, purpose, code_hash, salt, expires_at, consumed, created_at
        FROM otp_challenges
        WHERE user_id = $1 AND purpose = $2 AND consumed = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(purpose.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(challenge) = challenge else {
        return Ok(false);
    };
    if !challenge.is_active(OffsetDateTime::now_utc()) {
        return Ok(false);
    }

    let candidate_hash = hash_code(pepper, &challenge.salt, candidate);
    if !constant_time_eq(candidate_hash.as_bytes(), challenge.code_hash.as_bytes()) {
        return Ok(false);
    }

    let consumed = sqlx::query(
        "UPDATE otp_challenges SET consumed = TRUE WHERE id = $1 AND consumed = FALSE",
    )
    .bind(challenge.id)
    .execute(pool)
    .await?;

    Ok(consumed.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(expires_at: OffsetDateTime, consumed: bool) -> OtpChallenge {
        OtpChallenge {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            purpose: OtpPurpose::SignupVerify.as_str().into(),
            code_hash: String::new(),
            salt: String::new(),
            expires_at,
            consumed,
            created_at: expires_at - CODE_TTL,
        }
    }

    #[test]
    fn codes_are_fixed_width_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_depends_on_every_component() {
        let base = hash_code("pepper", "salt", "123456");
        assert_eq!(base, hash_code("pepper", "salt", "123456"));
        assert_ne!(base, hash_code("other", "salt", "123456"));
        assert_ne!(base, hash_code("pepper", "other", "123456"));
        assert_ne!(base, hash_code("pepper", "salt", "123457"));
    }

    #[test]
    fn constant_time_eq_semantics() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abc", b"abcdef"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn expired_challenge_is_inactive_even_with_right_code() {
        let now = OffsetDateTime::now_utc();
        let six_minutes_old = challenge(now - Duration::minutes(1), false);
        assert!(!six_minutes_old.is_active(now));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = OffsetDateTime::now_utc();
        let at_boundary = challenge(now, false);
        assert!(!at_boundary.is_active(now));
        let just_inside = challenge(now + Duration::seconds(1), false);
        assert!(just_inside.is_active(now));
    }

    #[test]
    fn consumed_challenge_is_inactive() {
        let now = OffsetDateTime::now_utc();
        let used = challenge(now + Duration::minutes(4), true);
        assert!(!used.is_active(now));
    }

    #[test]
    fn purposes_roundtrip_as_text() {
        assert_eq!(OtpPurpose::SignupVerify.as_str(), "signup_verify");
        assert_eq!(OtpPurpose::PasswordReset.as_str(), "password_reset");
        let parsed: OtpPurpose = serde_json::from_str("\"password_reset\"").unwrap();
        assert_eq!(parsed, OtpPurpose::PasswordReset);
    }
}
