use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: Option<&'a str>,
    pub password_hash: &'a str,
    pub display_name: Option<&'a str>,
    pub phone: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl User {
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, username, password_hash, display_name, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, username, password_hash, display_name, phone,
                      is_verified, created_at, updated_at
            "#,
        )
        .bind(new.email)
        .bind(new.username)
        .bind(new.password_hash)
        .bind(new.display_name)
        .bind(new.phone)
        .fetch_one(db)
        .await
    }

    /// Single query over both identifier columns, so a hit on email and a hit
    /// on username cost the same.
    pub async fn find_by_identifier(
        db: &PgPool,
        identifier: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, display_name, phone,
                   is_verified, created_at, updated_at
            FROM users
            WHERE email = $1 OR username = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, display_name, phone,
                   is_verified, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, display_name, phone,
                   is_verified, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn mark_verified(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_verified = TRUE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Replaces the password hash and, in the same transaction, wipes every
    /// outstanding OTP challenge and session for the user. A password change
    /// through any path leaves no live credential material behind.
    pub async fn update_password(
        db: &PgPool,
        id: Uuid,
        new_hash: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
            .bind(new_hash)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM otp_challenges WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET display_name = COALESCE($2, display_name),
                phone        = COALESCE($3, phone),
                username     = COALESCE($4, username),
                updated_at   = now()
            WHERE id = $1
            RETURNING id, email, username, password_hash, display_name, phone,
                      is_verified, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.display_name.as_deref())
        .bind(changes.phone.as_deref())
        .bind(changes.username.as_deref())
        .fetch_one(db)
        .await
    }

    /// A changed login email starts unverified again.
    pub async fn update_email(db: &PgPool, id: Uuid, new_email: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $1, is_verified = FALSE, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(new_email)
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Sessions, challenges and feedback hang off FK cascades.
    pub async fn delete(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_never_serializes() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            username: None,
            password_hash: "$argon2id$secret".into(),
            display_name: None,
            phone: None,
            is_verified: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password_hash"));
    }

    #[test]
    fn unique_violation_detection() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
