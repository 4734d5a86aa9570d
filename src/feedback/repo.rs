use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Feedback {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
    pub created_at: OffsetDateTime,
}

pub async fn insert(
    db: &PgPool,
    name: &str,
    email: &str,
    subject: Option<&str>,
    message: &str,
) -> Result<Feedback, sqlx::Error> {
    sqlx::query_as::<_, Feedback>(
        r#"
        INSERT INTO feedback (id, name, email, subject, message)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, name, email, subject, message, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(subject)
    .bind(message)
    .fetch_one(db)
    .await
}
