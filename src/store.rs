//! Client-side mirror of the user's tasks, events and contacts.
//!
//! Every mutation goes to the API first; local arrays change only after the
//! server accepted the write.

use crate::board::{self, BoardQuery};
use crate::client::DataApi;
use crate::errors::{AppError, AppResult};
use crate::models::{Contact, ContactPatch, Event, EventPatch, NewContact, NewEvent, NewTask, Task, TaskPatch};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

pub struct DataStore<A: DataApi> {
    api: A,
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
    pub contacts: Vec<Contact>,
    pub loading: bool,
    pub error: Option<String>,
    toasts: Vec<Toast>,
}

impl<A: DataApi> DataStore<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            tasks: Vec::new(),
            events: Vec::new(),
            contacts: Vec::new(),
            loading: false,
            error: None,
            toasts: Vec::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Pending notifications, oldest first.
    pub fn drain_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    pub async fn load(&mut self) -> AppResult<()> {
        self.loading = true;
        let result = async {
            let tasks = self.api.list_tasks().await?;
            let events = self.api.list_events().await?;
            let contacts = self.api.list_contacts().await?;
            Ok::<_, AppError>((tasks, events, contacts))
        }
        .await;
        self.loading = false;
        match result {
            Ok((tasks, events, contacts)) => {
                self.tasks = tasks;
                self.events = events;
                self.contacts = contacts;
                Ok(())
            }
            Err(error) => Err(self.fail("Failed to load data", error)),
        }
    }

    pub async fn add_task(&mut self, payload: NewTask) -> AppResult<()> {
        self.loading = true;
        let result = self.api.create_task(&payload).await;
        self.loading = false;
        let task = result.map_err(|error| self.fail("Failed to create task", error))?;
        self.tasks.push(task);
        self.succeed("Task created successfully");
        Ok(())
    }

    pub async fn update_task(&mut self, task_id: &str, patch: TaskPatch) -> AppResult<()> {
        self.loading = true;
        let result = self.api.update_task(task_id, &patch).await;
        self.loading = false;
        let updated = result.map_err(|error| self.fail("Failed to update task", error))?;
        replace_by_id(&mut self.tasks, updated, |task| &task.id);
        self.succeed("Task updated successfully");
        Ok(())
    }

    pub async fn delete_task(&mut self, task_id: &str) -> AppResult<()> {
        self.loading = true;
        let result = self.api.delete_task(task_id).await;
        self.loading = false;
        result.map_err(|error| self.fail("Failed to delete task", error))?;
        self.tasks.retain(|task| task.id != task_id);
        self.succeed("Task deleted successfully");
        Ok(())
    }

    /// Flips `completed` relative to the locally mirrored value.
    pub async fn toggle_task(&mut self, task_id: &str) -> AppResult<()> {
        let current = self
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .map(|task| task.completed);
        let Some(completed) = current else {
            return Err(self.fail(
                "Failed to update task",
                AppError::NotFound("Task not found".to_string()),
            ));
        };
        let patch = TaskPatch::completed(!completed);
        self.update_task(task_id, patch).await
    }

    pub fn board(&self, query: &BoardQuery) -> Vec<Task> {
        board::apply(&self.tasks, query)
    }

    pub fn categories(&self) -> Vec<String> {
        board::categories(&self.tasks)
    }

    pub async fn add_event(&mut self, payload: NewEvent) -> AppResult<()> {
        self.loading = true;
        let result = self.api.create_event(&payload).await;
        self.loading = false;
        let event = result.map_err(|error| self.fail("Failed to create event", error))?;
        self.events.push(event);
        self.succeed("Event created successfully");
        Ok(())
    }

    pub async fn update_event(&mut self, event_id: &str, patch: EventPatch) -> AppResult<()> {
        self.loading = true;
        let result = self.api.update_event(event_id, &patch).await;
        self.loading = false;
        let updated = result.map_err(|error| self.fail("Failed to update event", error))?;
        replace_by_id(&mut self.events, updated, |event| &event.id);
        self.succeed("Event updated successfully");
        Ok(())
    }

    pub async fn delete_event(&mut self, event_id: &str) -> AppResult<()> {
        self.loading = true;
        let result = self.api.delete_event(event_id).await;
        self.loading = false;
        result.map_err(|error| self.fail("Failed to delete event", error))?;
        self.events.retain(|event| event.id != event_id);
        self.succeed("Event deleted successfully");
        Ok(())
    }

    pub async fn add_contact(&mut self, payload: NewContact) -> AppResult<()> {
        self.loading = true;
        let result = self.api.create_contact(&payload).await;
        self.loading = false;
        let contact = result.map_err(|error| self.fail("Failed to create contact", error))?;
        self.contacts.push(contact);
        self.succeed("Contact created successfully");
        Ok(())
    }

    pub async fn update_contact(&mut self, contact_id: &str, patch: ContactPatch) -> AppResult<()> {
        self.loading = true;
        let result = self.api.update_contact(contact_id, &patch).await;
        self.loading = false;
        let updated = result.map_err(|error| self.fail("Failed to update contact", error))?;
        replace_by_id(&mut self.contacts, updated, |contact| &contact.id);
        self.succeed("Contact updated successfully");
        Ok(())
    }

    pub async fn delete_contact(&mut self, contact_id: &str) -> AppResult<()> {
        self.loading = true;
        let result = self.api.delete_contact(contact_id).await;
        self.loading = false;
        result.map_err(|error| self.fail("Failed to delete contact", error))?;
        self.contacts.retain(|contact| contact.id != contact_id);
        self.succeed("Contact deleted successfully");
        Ok(())
    }

    fn succeed(&mut self, message: &str) {
        self.toasts.push(Toast {
            level: ToastLevel::Success,
            message: message.to_string(),
        });
    }

    fn fail(&mut self, message: &str, error: AppError) -> AppError {
        tracing::warn!(error = %error, "{}", message);
        self.error = Some(message.to_string());
        self.toasts.push(Toast {
            level: ToastLevel::Error,
            message: message.to_string(),
        });
        error
    }
}

fn replace_by_id<T>(items: &mut [T], updated: T, id_of: impl Fn(&T) -> &String) {
    let id = id_of(&updated).clone();
    if let Some(slot) = items.iter_mut().find(|item| *id_of(item) == id) {
        *slot = updated;
    }
}
