use crate::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TASK_CATEGORY: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn weight(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: String,
    pub completed: bool,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub due_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl NewTask {
    pub fn normalize(self) -> AppResult<Self> {
        let due_date = required("dueDate", self.due_date)?;
        ensure_date_like("dueDate", &due_date)?;
        Ok(Self {
            title: required("title", self.title)?,
            description: optional(self.description),
            priority: self.priority,
            due_date,
            category: Some(optional(self.category).unwrap_or_else(|| DEFAULT_TASK_CATEGORY.to_string())),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn apply_to(self, task: &mut Task) -> AppResult<()> {
        if let Some(title) = self.title {
            task.title = required("title", title)?;
        }
        if let Some(description) = self.description {
            task.description = optional(Some(description));
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            let due_date = required("dueDate", due_date)?;
            ensure_date_like("dueDate", &due_date)?;
            task.due_date = due_date;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(category) = self.category {
            task.category = required("category", category)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub time: String,
    pub duration: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub time: String,
    pub duration: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: String,
}

impl NewEvent {
    pub fn normalize(self) -> AppResult<Self> {
        Ok(Self {
            title: required("title", self.title)?,
            time: required("time", self.time)?,
            duration: required("duration", self.duration)?,
            kind: required("type", self.kind)?,
            client: optional(self.client),
            description: optional(self.description),
            date: required("date", self.date)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl EventPatch {
    pub fn apply_to(self, event: &mut Event) -> AppResult<()> {
        if let Some(title) = self.title {
            event.title = required("title", title)?;
        }
        if let Some(time) = self.time {
            event.time = required("time", time)?;
        }
        if let Some(duration) = self.duration {
            event.duration = required("duration", duration)?;
        }
        if let Some(kind) = self.kind {
            event.kind = required("type", kind)?;
        }
        if let Some(client) = self.client {
            event.client = optional(Some(client));
        }
        if let Some(description) = self.description {
            event.description = optional(Some(description));
        }
        if let Some(date) = self.date {
            event.date = required("date", date)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    Client,
    Prospect,
    Partner,
}

impl ContactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Prospect => "prospect",
            Self::Partner => "partner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Active,
    Inactive,
    #[default]
    Lead,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Lead => "lead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(rename = "type")]
    pub kind: ContactType,
    pub status: ContactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(rename = "type")]
    pub kind: ContactType,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up: Option<String>,
}

impl NewContact {
    pub fn normalize(self) -> AppResult<Self> {
        let last_contact = optional(self.last_contact);
        let next_follow_up = optional(self.next_follow_up);
        if let Some(raw) = &last_contact {
            ensure_date_like("lastContact", raw)?;
        }
        if let Some(raw) = &next_follow_up {
            ensure_date_like("nextFollowUp", raw)?;
        }
        Ok(Self {
            first_name: required("firstName", self.first_name)?,
            last_name: required("lastName", self.last_name)?,
            email: normalize_email(self.email)?,
            phone: optional(self.phone),
            company: optional(self.company),
            kind: self.kind,
            status: self.status,
            notes: optional(self.notes),
            last_contact,
            next_follow_up,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContactType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up: Option<String>,
}

impl ContactPatch {
    pub fn apply_to(self, contact: &mut Contact) -> AppResult<()> {
        if let Some(first_name) = self.first_name {
            contact.first_name = required("firstName", first_name)?;
        }
        if let Some(last_name) = self.last_name {
            contact.last_name = required("lastName", last_name)?;
        }
        if let Some(email) = self.email {
            contact.email = normalize_email(email)?;
        }
        if let Some(phone) = self.phone {
            contact.phone = optional(Some(phone));
        }
        if let Some(company) = self.company {
            contact.company = optional(Some(company));
        }
        if let Some(kind) = self.kind {
            contact.kind = kind;
        }
        if let Some(status) = self.status {
            contact.status = status;
        }
        if let Some(notes) = self.notes {
            contact.notes = optional(Some(notes));
        }
        if let Some(last_contact) = self.last_contact {
            let last_contact = optional(Some(last_contact));
            if let Some(raw) = &last_contact {
                ensure_date_like("lastContact", raw)?;
            }
            contact.last_contact = last_contact;
        }
        if let Some(next_follow_up) = self.next_follow_up {
            let next_follow_up = optional(Some(next_follow_up));
            if let Some(raw) = &next_follow_up {
                ensure_date_like("nextFollowUp", raw)?;
            }
            contact.next_follow_up = next_follow_up;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accepts `YYYY-MM-DD`, RFC 3339, or a zone-less ISO timestamp.
pub fn parse_date_like(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn ensure_date_like(field: &str, raw: &str) -> AppResult<()> {
    if parse_date_like(raw).is_none() {
        return Err(AppError::Validation(format!("{} must be a valid date", field)));
    }
    Ok(())
}

fn required(field: &str, value: String) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn normalize_email(raw: String) -> AppResult<String> {
    let email = required("email", raw)?.to_lowercase();
    if !email.contains('@') {
        return Err(AppError::Validation("email must be a valid address".to_string()));
    }
    Ok(email)
}
