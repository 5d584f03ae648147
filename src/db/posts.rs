//! Post storage.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct PostStore {
    pool: SqlitePool,
}

/// A post joined with its author.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub uuid: String,
    pub user_id: i64,
    pub author_uuid: String,
    pub author_name: String,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    uuid: String,
    user_id: i64,
    author_uuid: String,
    author_name: String,
    title: String,
    content: String,
    image: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            user_id: row.user_id,
            author_uuid: row.author_uuid,
            author_name: row.author_name,
            title: row.title,
            content: row.content,
            image: row.image,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Partial update. `None` leaves the column unchanged.
#[derive(Debug, Default, Clone)]
pub struct PostChanges<'a> {
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub image: Option<&'a str>,
}

const POST_SELECT: &str = "SELECT p.id, p.uuid, p.user_id, u.uuid AS author_uuid, u.name AS author_name,
        p.title, p.content, p.image, p.created_at, p.updated_at
     FROM posts p JOIN users u ON u.id = p.user_id";

impl PostStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new post. Returns the post UUID.
    pub async fn create(
        &self,
        user_id: i64,
        title: &str,
        content: &str,
        image: Option<&str>,
    ) -> Result<String, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO posts (uuid, user_id, title, content, image) VALUES (?, ?, ?, ?, ?)")
            .bind(&uuid)
            .bind(user_id)
            .bind(title)
            .bind(content)
            .bind(image)
            .execute(&self.pool)
            .await?;

        Ok(uuid)
    }

    /// Get a post by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Post>, sqlx::Error> {
        let row: Option<PostRow> = sqlx::query_as(&format!("{} WHERE p.uuid = ?", POST_SELECT))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Post::from))
    }

    /// One page of posts, newest first.
    pub async fn list(&self, limit: u32, offset: u64) -> Result<Vec<Post>, sqlx::Error> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "{} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
            POST_SELECT
        ))
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    pub async fn count(&self) -> Result<u64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count.0).unwrap_or(0))
    }

    /// Update a post by UUID. Returns true if the post exists.
    pub async fn update(&self, uuid: &str, changes: &PostChanges<'_>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE posts SET
                title = COALESCE(?, title),
                content = COALESCE(?, content),
                image = COALESCE(?, image),
                updated_at = datetime('now')
             WHERE uuid = ?",
        )
        .bind(changes.title)
        .bind(changes.content)
        .bind(changes.image)
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a post by UUID.
    pub async fn delete(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
