use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::models::{Todo, TodoInput};
use crate::service::TodoService;
use crate::views::HomePage;

#[derive(Clone)]
struct AppState {
    service: Arc<dyn TodoService>,
    home: Arc<HomePage>,
}

pub fn router(service: Arc<dyn TodoService>, home: HomePage) -> Router {
    let state = AppState {
        service,
        home: Arc::new(home),
    };

    Router::new()
        .route("/", get(index))
        .route("/todos", get(list_todos).post(create_todo))
        .route(
            "/todos/:id",
            get(get_todo).put(update_todo).delete(delete_todo),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let todos = state.service.list().await?;
    Ok(Html(state.home.render(&todos)?))
}

async fn create_todo(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Todo>)> {
    let input = parse_body(&body)?;
    let todo = state.service.create(input).await?;
    info!(id = todo.id, "created todo");
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn list_todos(State(state): State<AppState>) -> ApiResult<Json<Vec<Todo>>> {
    Ok(Json(state.service.list().await?))
}

async fn get_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Todo>> {
    let id = parse_id(&raw_id)?;
    state
        .service
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// The id in the path wins over any id in the body.
async fn update_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Todo>> {
    let id = parse_id(&raw_id)?;
    let input = parse_body(&body)?;
    let todo = state.service.update(id, input).await?;
    info!(id, "updated todo");
    Ok(Json(todo))
}

async fn delete_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&raw_id)?;
    state.service.delete(id).await?;
    info!(id, "deleted todo");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid ID".to_string()))
}

/// Decodes a todo from a JSON object. Arrays and scalars are rejected even
/// where serde could map them onto the struct positionally.
fn parse_body(body: &[u8]) -> ApiResult<TodoInput> {
    let bad_request = |err: serde_json::Error| ApiError::BadRequest(err.to_string());
    let value: Value = serde_json::from_slice(body).map_err(bad_request)?;
    if !value.is_object() {
        return Err(ApiError::BadRequest(
            "request body must be a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(bad_request)
}
