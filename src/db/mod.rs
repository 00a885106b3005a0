use crate::errors::{AppError, AppResult};
use crate::models::{
    Contact, ContactPatch, ContactStatus, ContactType, Event, EventPatch, NewContact, NewEvent, NewTask, Priority, Task,
    TaskPatch, DEFAULT_TASK_CATEGORY,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const TASK_COLUMNS: &str =
    "id, user_id, title, description, priority, due_date, completed, category, created_at, updated_at";
const EVENT_COLUMNS: &str =
    "id, user_id, title, time, duration, kind, client, description, date, created_at, updated_at";
const CONTACT_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone, company, kind, status, notes, \
     last_contact, next_follow_up, created_at, updated_at";

const DUPLICATE_CONTACT_MESSAGE: &str = "Contact with this email already exists";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn list_tasks(&self, user_id: &str) -> AppResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY due_date ASC, rowid ASC"
        ))?;
        let rows = statement.query_map([user_id], parse_task_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_task(&self, user_id: &str, payload: NewTask) -> AppResult<Task> {
        let payload = payload.normalize()?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: payload.title,
            description: payload.description,
            priority: payload.priority,
            due_date: payload.due_date,
            completed: false,
            category: payload
                .category
                .unwrap_or_else(|| DEFAULT_TASK_CATEGORY.to_string()),
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, user_id, title, description, priority, due_date, completed, category, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id,
                task.user_id,
                task.title,
                task.description,
                task.priority.as_str(),
                task.due_date,
                task.completed,
                task.category,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    /// Returns `None` when the task does not exist or belongs to another user.
    pub fn update_task(&self, user_id: &str, task_id: &str, patch: TaskPatch) -> AppResult<Option<Task>> {
        let conn = self.lock()?;
        let Some(mut task) = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![task_id, user_id],
                parse_task_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        patch.apply_to(&mut task)?;
        task.updated_at = Utc::now();
        conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, due_date = ?4, completed = ?5,
               category = ?6, updated_at = ?7
             WHERE id = ?8 AND user_id = ?9",
            params![
                task.title,
                task.description,
                task.priority.as_str(),
                task.due_date,
                task.completed,
                task.category,
                task.updated_at.to_rfc3339(),
                task_id,
                user_id,
            ],
        )?;
        Ok(Some(task))
    }

    pub fn delete_task(&self, user_id: &str, task_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
        Ok(removed > 0)
    }

    pub fn list_events(&self, user_id: &str) -> AppResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 ORDER BY date ASC, rowid ASC"
        ))?;
        let rows = statement.query_map([user_id], parse_event_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_event(&self, user_id: &str, payload: NewEvent) -> AppResult<Event> {
        let payload = payload.normalize()?;
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: payload.title,
            time: payload.time,
            duration: payload.duration,
            kind: payload.kind,
            client: payload.client,
            description: payload.description,
            date: payload.date,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (id, user_id, title, time, duration, kind, client, description, date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id,
                event.user_id,
                event.title,
                event.time,
                event.duration,
                event.kind,
                event.client,
                event.description,
                event.date,
                event.created_at.to_rfc3339(),
                event.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(event)
    }

    pub fn update_event(&self, user_id: &str, event_id: &str, patch: EventPatch) -> AppResult<Option<Event>> {
        let conn = self.lock()?;
        let Some(mut event) = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND user_id = ?2"),
                params![event_id, user_id],
                parse_event_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        patch.apply_to(&mut event)?;
        event.updated_at = Utc::now();
        conn.execute(
            "UPDATE events SET title = ?1, time = ?2, duration = ?3, kind = ?4, client = ?5, description = ?6,
               date = ?7, updated_at = ?8
             WHERE id = ?9 AND user_id = ?10",
            params![
                event.title,
                event.time,
                event.duration,
                event.kind,
                event.client,
                event.description,
                event.date,
                event.updated_at.to_rfc3339(),
                event_id,
                user_id,
            ],
        )?;
        Ok(Some(event))
    }

    pub fn delete_event(&self, user_id: &str, event_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
            params![event_id, user_id],
        )?;
        Ok(removed > 0)
    }

    pub fn list_contacts(&self, user_id: &str) -> AppResult<Vec<Contact>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = ?1 ORDER BY last_name ASC, rowid ASC"
        ))?;
        let rows = statement.query_map([user_id], parse_contact_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_contact(&self, user_id: &str, payload: NewContact) -> AppResult<Contact> {
        let payload = payload.normalize()?;
        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            phone: payload.phone,
            company: payload.company,
            kind: payload.kind,
            status: payload.status,
            notes: payload.notes,
            last_contact: payload.last_contact,
            next_follow_up: payload.next_follow_up,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contacts (
               id, user_id, first_name, last_name, email, phone, company, kind, status, notes,
               last_contact, next_follow_up, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                contact.id,
                contact.user_id,
                contact.first_name,
                contact.last_name,
                contact.email,
                contact.phone,
                contact.company,
                contact.kind.as_str(),
                contact.status.as_str(),
                contact.notes,
                contact.last_contact,
                contact.next_follow_up,
                contact.created_at.to_rfc3339(),
                contact.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_contact_write_error)?;
        Ok(contact)
    }

    pub fn update_contact(
        &self,
        user_id: &str,
        contact_id: &str,
        patch: ContactPatch,
    ) -> AppResult<Option<Contact>> {
        let conn = self.lock()?;
        let Some(mut contact) = conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1 AND user_id = ?2"),
                params![contact_id, user_id],
                parse_contact_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        patch.apply_to(&mut contact)?;
        contact.updated_at = Utc::now();
        conn.execute(
            "UPDATE contacts SET first_name = ?1, last_name = ?2, email = ?3, phone = ?4, company = ?5, kind = ?6,
               status = ?7, notes = ?8, last_contact = ?9, next_follow_up = ?10, updated_at = ?11
             WHERE id = ?12 AND user_id = ?13",
            params![
                contact.first_name,
                contact.last_name,
                contact.email,
                contact.phone,
                contact.company,
                contact.kind.as_str(),
                contact.status.as_str(),
                contact.notes,
                contact.last_contact,
                contact.next_follow_up,
                contact.updated_at.to_rfc3339(),
                contact_id,
                user_id,
            ],
        )
        .map_err(map_contact_write_error)?;
        Ok(Some(contact))
    }

    pub fn delete_contact(&self, user_id: &str, contact_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM contacts WHERE id = ?1 AND user_id = ?2",
            params![contact_id, user_id],
        )?;
        Ok(removed > 0)
    }

    /// Releases as much SQLite page-cache memory as possible.
    pub fn reclaim_memory(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA shrink_memory;")?;
        Ok(())
    }
}

fn map_contact_write_error(error: rusqlite::Error) -> AppError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == rusqlite::ErrorCode::ConstraintViolation => {
            AppError::Conflict(DUPLICATE_CONTACT_MESSAGE.to_string())
        }
        _ => AppError::from(error),
    }
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: parse_priority(&row.get::<_, String>(4)?)?,
        due_date: row.get(5)?,
        completed: row.get::<_, i32>(6)? != 0,
        category: row.get(7)?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        time: row.get(3)?,
        duration: row.get(4)?,
        kind: row.get(5)?,
        client: row.get(6)?,
        description: row.get(7)?,
        date: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

fn parse_contact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        user_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        company: row.get(6)?,
        kind: parse_contact_type(&row.get::<_, String>(7)?)?,
        status: parse_contact_status(&row.get::<_, String>(8)?)?,
        notes: row.get(9)?,
        last_contact: row.get(10)?,
        next_follow_up: row.get(11)?,
        created_at: parse_time(&row.get::<_, String>(12)?)?,
        updated_at: parse_time(&row.get::<_, String>(13)?)?,
    })
}

fn parse_priority(raw: &str) -> rusqlite::Result<Priority> {
    Priority::parse(raw).ok_or_else(|| invalid_column(format!("Unknown priority '{}'", raw)))
}

fn parse_contact_type(raw: &str) -> rusqlite::Result<ContactType> {
    match raw {
        "client" => Ok(ContactType::Client),
        "prospect" => Ok(ContactType::Prospect),
        "partner" => Ok(ContactType::Partner),
        other => Err(invalid_column(format!("Unknown contact type '{}'", other))),
    }
}

fn parse_contact_status(raw: &str) -> rusqlite::Result<ContactStatus> {
    match raw {
        "active" => Ok(ContactStatus::Active),
        "inactive" => Ok(ContactStatus::Inactive),
        "lead" => Ok(ContactStatus::Lead),
        other => Err(invalid_column(format!("Unknown contact status '{}'", other))),
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(error.to_string()))
}

fn invalid_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}
