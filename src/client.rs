//! Typed bindings for the REST API, used by the client data store.

use crate::errors::{AppError, AppResult};
use crate::models::{
    Contact, ContactPatch, Event, EventPatch, MessageResponse, NewContact, NewEvent, NewTask, Task, TaskPatch,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[async_trait]
pub trait DataApi: Send + Sync {
    async fn list_tasks(&self) -> AppResult<Vec<Task>>;
    async fn create_task(&self, payload: &NewTask) -> AppResult<Task>;
    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> AppResult<Task>;
    async fn delete_task(&self, task_id: &str) -> AppResult<()>;

    async fn list_events(&self) -> AppResult<Vec<Event>>;
    async fn create_event(&self, payload: &NewEvent) -> AppResult<Event>;
    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> AppResult<Event>;
    async fn delete_event(&self, event_id: &str) -> AppResult<()>;

    async fn list_contacts(&self) -> AppResult<Vec<Contact>>;
    async fn create_contact(&self, payload: &NewContact) -> AppResult<Contact>;
    async fn update_contact(&self, contact_id: &str, patch: &ContactPatch) -> AppResult<Contact>;
    async fn delete_contact(&self, contact_id: &str) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct HttpDataApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDataApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        decode(self.request(Method::GET, path).send().await?).await
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> AppResult<T> {
        decode(self.request(method, path).json(body).send().await?).await
    }

    async fn delete(&self, path: &str) -> AppResult<()> {
        let _: MessageResponse = decode(self.request(Method::DELETE, path).send().await?).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> AppResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<MessageResponse>(&body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| format!("request failed with status {}", status));
    Err(AppError::from_status(status, message))
}

#[async_trait]
impl DataApi for HttpDataApi {
    async fn list_tasks(&self) -> AppResult<Vec<Task>> {
        self.get("/api/tasks").await
    }

    async fn create_task(&self, payload: &NewTask) -> AppResult<Task> {
        self.send_json(Method::POST, "/api/tasks", payload).await
    }

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> AppResult<Task> {
        self.send_json(Method::PATCH, &format!("/api/tasks/{}", task_id), patch)
            .await
    }

    async fn delete_task(&self, task_id: &str) -> AppResult<()> {
        self.delete(&format!("/api/tasks/{}", task_id)).await
    }

    async fn list_events(&self) -> AppResult<Vec<Event>> {
        self.get("/api/events").await
    }

    async fn create_event(&self, payload: &NewEvent) -> AppResult<Event> {
        self.send_json(Method::POST, "/api/events", payload).await
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> AppResult<Event> {
        self.send_json(Method::PATCH, &format!("/api/events/{}", event_id), patch)
            .await
    }

    async fn delete_event(&self, event_id: &str) -> AppResult<()> {
        self.delete(&format!("/api/events/{}", event_id)).await
    }

    async fn list_contacts(&self) -> AppResult<Vec<Contact>> {
        self.get("/api/contacts").await
    }

    async fn create_contact(&self, payload: &NewContact) -> AppResult<Contact> {
        self.send_json(Method::POST, "/api/contacts", payload).await
    }

    async fn update_contact(&self, contact_id: &str, patch: &ContactPatch) -> AppResult<Contact> {
        self.send_json(Method::PATCH, &format!("/api/contacts/{}", contact_id), patch)
            .await
    }

    async fn delete_contact(&self, contact_id: &str) -> AppResult<()> {
        self.delete(&format!("/api/contacts/{}", contact_id)).await
    }
}
