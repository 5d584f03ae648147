//! Posts API.
//!
//! Reading is public. Writing requires an access token, and only the author
//! or an admin may change or delete a post.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiJson, ApiPath, ApiQuery, ResultExt, validate_uuid};
use crate::auth::{AuthGate, Authenticated, RequestIdentity, require_auth};
use crate::db::{Database, Post, PostChanges, UserStore};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;
const MAX_TITLE_LENGTH: usize = 255;

const PAGINATION_NOTIFICATION: &str = "Sorry, there was an issue with the pagination request. Please check your parameters and try again.";
const NOT_FOUND_NOTIFICATION: &str = "Sorry, the requested item does not exist in our records.";
const FORBIDDEN_NOTIFICATION: &str = "Access denied. You do not have the required permissions to perform this action. Please try again or contact our support team for assistance.";

/// State for posts endpoints.
#[derive(Clone)]
pub struct PostsState {
    pub db: Database,
    pub access_gate: AuthGate<UserStore>,
}

pub fn router(state: PostsState) -> Router {
    let public = Router::new()
        .route("/", get(list_posts))
        .route("/{uuid}", get(get_post))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/", post(create_post))
        .route("/{uuid}", put(update_post).delete(delete_post))
        .with_state(state.clone())
        .route_layer(middleware::from_fn_with_state(
            state.access_gate,
            require_auth::<UserStore>,
        ));

    public.merge(protected)
}

// --- Request/Response types ---

/// Raw query so bad values get the pagination message instead of a generic 400.
#[derive(Deserialize)]
struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct Page {
    page: u32,
    limit: u32,
}

impl Page {
    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Deserialize)]
struct CreatePostRequest {
    title: String,
    content: String,
    image: Option<String>,
}

#[derive(Deserialize)]
struct UpdatePostRequest {
    title: Option<String>,
    content: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
struct PostView {
    post_id: String,
    title: String,
    content: String,
    image: Option<String>,
    /// Author name
    user: String,
    /// Author UUID
    user_id: String,
    created_at: String,
    updated_at: String,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            post_id: post.uuid,
            title: post.title,
            content: post.content,
            image: post.image,
            user: post.author_name,
            user_id: post.author_uuid,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Serialize)]
struct PostData {
    post: PostView,
}

#[derive(Serialize)]
struct PostResponse {
    status: &'static str,
    data: PostData,
}

impl PostResponse {
    fn new(post: Post) -> Self {
        Self {
            status: "success",
            data: PostData { post: post.into() },
        }
    }
}

#[derive(Serialize)]
struct PostListData {
    posts: Vec<PostView>,
    page: u32,
    limit: u32,
    total: u64,
    total_pages: u64,
}

#[derive(Serialize)]
struct PostListResponse {
    status: &'static str,
    data: PostListData,
}

// --- Helpers ---

fn parse_page(query: &PageQuery) -> Result<Page, ApiError> {
    fn positive(value: Option<&str>, default: u32) -> Result<u32, ApiError> {
        match value {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ApiError::bad_request(PAGINATION_NOTIFICATION)),
            },
        }
    }

    Ok(Page {
        page: positive(query.page.as_deref(), 1)?,
        limit: positive(query.limit.as_deref(), DEFAULT_PAGE_LIMIT)?.min(MAX_PAGE_LIMIT),
    })
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::bad_request("Title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Title cannot be longer than {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("Content cannot be empty"));
    }
    Ok(())
}

async fn load_post(db: &Database, uuid: &str) -> Result<Post, ApiError> {
    validate_uuid(uuid)?;
    db.posts()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to get post")?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_NOTIFICATION))
}

fn ensure_can_modify(identity: &RequestIdentity, post: &Post) -> Result<(), ApiError> {
    if identity.is_admin() || identity.subject_id == post.author_uuid {
        Ok(())
    } else {
        Err(ApiError::forbidden(FORBIDDEN_NOTIFICATION))
    }
}

// --- Handlers ---

async fn list_posts(
    State(state): State<PostsState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = parse_page(&query)?;
    let posts = state.db.posts();

    let total = posts.count().await.db_err("Failed to count posts")?;
    let items = posts
        .list(page.limit, page.offset())
        .await
        .db_err("Failed to list posts")?;

    Ok(Json(PostListResponse {
        status: "success",
        data: PostListData {
            posts: items.into_iter().map(PostView::from).collect(),
            page: page.page,
            limit: page.limit,
            total,
            total_pages: total.div_ceil(u64::from(page.limit)),
        },
    }))
}

async fn get_post(
    State(state): State<PostsState>,
    ApiPath(uuid): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state.db, &uuid).await?;
    Ok(Json(PostResponse::new(post)))
}

async fn create_post(
    State(state): State<PostsState>,
    identity: Authenticated,
    ApiJson(payload): ApiJson<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_title(&payload.title)?;
    validate_content(&payload.content)?;

    let author = state
        .db
        .users()
        .get_by_uuid(&identity.subject_id)
        .await
        .db_err("Failed to load author")?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_NOTIFICATION))?;

    let uuid = state
        .db
        .posts()
        .create(
            author.id,
            payload.title.trim(),
            &payload.content,
            payload.image.as_deref(),
        )
        .await
        .db_err("Failed to create post")?;

    let post = state
        .db
        .posts()
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get created post")?
        .ok_or_else(ApiError::internal)?;

    info!(post = %uuid, user = %identity.subject_id, "Post created");
    Ok((StatusCode::CREATED, Json(PostResponse::new(post))))
}

async fn update_post(
    State(state): State<PostsState>,
    identity: Authenticated,
    ApiPath(uuid): ApiPath<String>,
    ApiJson(payload): ApiJson<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(title) = &payload.title {
        validate_title(title)?;
    }
    if let Some(content) = &payload.content {
        validate_content(content)?;
    }

    let post = load_post(&state.db, &uuid).await?;
    ensure_can_modify(&identity, &post)?;

    let changes = PostChanges {
        title: payload.title.as_deref().map(str::trim),
        content: payload.content.as_deref(),
        image: payload.image.as_deref(),
    };
    let updated = state
        .db
        .posts()
        .update(&uuid, &changes)
        .await
        .db_err("Failed to update post")?;
    if !updated {
        return Err(ApiError::not_found(NOT_FOUND_NOTIFICATION));
    }

    let post = load_post(&state.db, &uuid).await?;
    Ok(Json(PostResponse::new(post)))
}

async fn delete_post(
    State(state): State<PostsState>,
    identity: Authenticated,
    ApiPath(uuid): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state.db, &uuid).await?;
    ensure_can_modify(&identity, &post)?;

    let deleted = state
        .db
        .posts()
        .delete(&uuid)
        .await
        .db_err("Failed to delete post")?;
    if !deleted {
        return Err(ApiError::not_found(NOT_FOUND_NOTIFICATION));
    }

    info!(post = %uuid, user = %identity.subject_id, "Post deleted");
    Ok(StatusCode::NO_CONTENT)
}
