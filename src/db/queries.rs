use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::content::Content;
use crate::models::prediction::{NewPrediction, Prediction, Scores};

/// Insert a new content record
pub async fn create_content(
    pool: &PgPool,
    org_id: &str,
    text: &str,
    lang: &str,
) -> Result<Content, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO content (org_id, text, lang)
        VALUES ($1, $2, $3)
        RETURNING id, org_id, text, lang, created_at
        "#,
    )
    .bind(org_id)
    .bind(text)
    .bind(lang)
    .fetch_one(pool)
    .await?;

    Ok(Content {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        text: row.try_get("text")?,
        lang: row.try_get("lang")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Get a content record by ID
pub async fn get_content(pool: &PgPool, content_id: Uuid) -> Result<Option<Content>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, org_id, text, lang, created_at
        FROM content
        WHERE id = $1
        "#,
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(Content {
            id: r.try_get("id")?,
            org_id: r.try_get("org_id")?,
            text: r.try_get("text")?,
            lang: r.try_get("lang")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Insert a prediction unless one already exists for the content id.
/// Returns whether a row was written.
pub async fn insert_prediction_if_absent(
    pool: &PgPool,
    prediction: &NewPrediction,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO moderation_predictions (content_id, model_name, top_label, scores)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (content_id) DO NOTHING
        "#,
    )
    .bind(&prediction.content_id)
    .bind(&prediction.model_name)
    .bind(&prediction.top_label)
    .bind(Json(&prediction.scores))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Get the prediction for a content id
pub async fn get_prediction(
    pool: &PgPool,
    content_id: &str,
) -> Result<Option<Prediction>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT content_id, model_name, top_label, scores, created_at
        FROM moderation_predictions
        WHERE content_id = $1
        "#,
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        let scores: Json<Scores> = r.try_get("scores")?;
        Ok(Prediction {
            content_id: r.try_get("content_id")?,
            model_name: r.try_get("model_name")?,
            top_label: r.try_get("top_label")?,
            scores: scores.0,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Count predictions stored for a content id (at most one).
pub async fn count_predictions(pool: &PgPool, content_id: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM moderation_predictions WHERE content_id = $1")
        .bind(content_id)
        .fetch_one(pool)
        .await?;
    row.try_get("n")
}
