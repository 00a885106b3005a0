use crate::assistant::{self, AssistantReply, ChatRequest};
use crate::auth::{AuthUser, TokenAuthority};
use crate::board::{self, BoardParams, BoardQuery};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Contact, ContactPatch, Event, EventPatch, MessageResponse, NewContact, NewEvent, NewTask, Task, TaskPatch,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub tokens: Arc<TokenAuthority>,
}

impl FromRef<AppState> for Arc<TokenAuthority> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/board", get(task_board))
        .route("/api/tasks/:id", patch(update_task).delete(delete_task))
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/:id", patch(update_event).delete(delete_event))
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route("/api/contacts/:id", patch(update_contact).delete(delete_contact))
        .route("/api/assistant/greeting", get(assistant_greeting))
        .route("/api/assistant/chat", post(assistant_chat))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tasks(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<Task>>> {
    Ok(Json(state.db.list_tasks(&user.id)?))
}

async fn task_board(
    State(state): State<AppState>,
    user: AuthUser,
    params: Result<Query<BoardParams>, QueryRejection>,
) -> AppResult<Json<Vec<Task>>> {
    let Query(params) = params?;
    let query = BoardQuery::try_from(params)?;
    let tasks = state.db.list_tasks(&user.id)?;
    Ok(Json(board::apply(&tasks, &query)))
}

async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let Json(payload) = payload?;
    let task = state.db.insert_task(&user.id, payload)?;
    tracing::info!(task_id = %task.id, user_id = %user.id, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> AppResult<Json<Task>> {
    let Json(patch) = payload?;
    state
        .db
        .update_task(&user.id, &task_id, patch)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    if !state.db.delete_task(&user.id, &task_id)? {
        return Err(AppError::NotFound("Task not found".to_string()));
    }
    Ok(Json(MessageResponse::new("Task deleted")))
}

async fn list_events(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<Event>>> {
    Ok(Json(state.db.list_events(&user.id)?))
}

async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Event>)> {
    let Json(payload) = payload?;
    let event = state.db.insert_event(&user.id, payload)?;
    tracing::info!(event_id = %event.id, user_id = %user.id, "event created");
    Ok((StatusCode::CREATED, Json(event)))
}

async fn update_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
    payload: Result<Json<EventPatch>, JsonRejection>,
) -> AppResult<Json<Event>> {
    let Json(patch) = payload?;
    state
        .db
        .update_event(&user.id, &event_id, patch)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    if !state.db.delete_event(&user.id, &event_id)? {
        return Err(AppError::NotFound("Event not found".to_string()));
    }
    Ok(Json(MessageResponse::new("Event deleted")))
}

async fn list_contacts(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<Contact>>> {
    Ok(Json(state.db.list_contacts(&user.id)?))
}

async fn create_contact(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<NewContact>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Contact>)> {
    let Json(payload) = payload?;
    let contact = state.db.insert_contact(&user.id, payload)?;
    tracing::info!(contact_id = %contact.id, user_id = %user.id, "contact created");
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn update_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(contact_id): Path<String>,
    payload: Result<Json<ContactPatch>, JsonRejection>,
) -> AppResult<Json<Contact>> {
    let Json(patch) = payload?;
    state
        .db
        .update_contact(&user.id, &contact_id, patch)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Contact not found".to_string()))
}

async fn delete_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(contact_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    if !state.db.delete_contact(&user.id, &contact_id)? {
        return Err(AppError::NotFound("Contact not found".to_string()));
    }
    Ok(Json(MessageResponse::new("Contact deleted")))
}

async fn assistant_greeting(_user: AuthUser) -> Json<AssistantReply> {
    Json(assistant::greeting())
}

async fn assistant_chat(
    _user: AuthUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Json<AssistantReply>> {
    let Json(request) = payload?;
    Ok(Json(assistant::process_message(&request.text, &request.history)?))
}
