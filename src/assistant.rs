//! Scripted chat assistant.
//!
//! Picks an intent by keyword and answers with canned text. There is no model
//! behind it; conversation history is accepted for API compatibility only.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    #[default]
    Idle,
    Task,
    Meeting,
    Portfolio,
    Report,
    Crm,
}

// Checked in order; the first set with a hit wins.
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::Meeting, &["schedule", "meeting", "appointment", "calendar"]),
    (Intent::Task, &["task", "todo", "reminder"]),
    (Intent::Portfolio, &["portfolio", "investment", "analysis", "performance"]),
    (Intent::Report, &["report", "generate", "summary"]),
    (Intent::Crm, &["contact", "lead", "opportunity", "client"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Ai,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    pub suggestions: Vec<String>,
    pub intent: Intent,
}

pub fn detect_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(intent, _)| *intent)
        .unwrap_or_default()
}

pub fn process_message(text: &str, history: &[ChatMessage]) -> AppResult<AssistantReply> {
    if text.trim().is_empty() {
        return Err(AppError::Validation("Message text is required".to_string()));
    }
    let intent = detect_intent(text);
    tracing::debug!(intent = ?intent, history_len = history.len(), "assistant message processed");
    Ok(canned_reply(intent))
}

/// The opening message shown before the user has typed anything.
pub fn greeting() -> AssistantReply {
    canned_reply(Intent::Idle)
}

fn canned_reply(intent: Intent) -> AssistantReply {
    let (content, suggestions): (&str, &[&str]) = match intent {
        Intent::Meeting => (
            "I can help you schedule that. Who is the meeting with, and when would you like it?",
            &["Check my calendar", "Schedule a client review", "Find an open slot this week"],
        ),
        Intent::Task => (
            "Let's get that on your task list. What needs to be done, and by when?",
            &["Create a task", "Show pending tasks", "Set a reminder"],
        ),
        Intent::Portfolio => (
            "I can pull together a portfolio review. Which client's portfolio should I look at?",
            &["Review portfolio performance", "Compare to benchmark", "Schedule a rebalancing review"],
        ),
        Intent::Report => (
            "I can prepare a report for you. Which client and period should it cover?",
            &["Create a financial report", "Generate a quarterly summary", "Export client holdings"],
        ),
        Intent::Crm => (
            "Let's look at your client relationships. Do you want to add a contact or review follow-ups?",
            &["Add a new contact", "Show upcoming follow-ups", "Review open leads"],
        ),
        Intent::Idle => (
            "Hello! I can help you manage tasks, schedule meetings, analyze portfolios, and generate reports. What would you like to do?",
            &["Schedule a meeting", "Create a task", "Generate a report", "Review portfolio"],
        ),
    };
    AssistantReply {
        content: content.to_string(),
        suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        intent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_a_meeting_is_meeting() {
        assert_eq!(detect_intent("Please schedule a meeting with Sarah"), Intent::Meeting);
    }

    #[test]
    fn earlier_keyword_sets_take_precedence() {
        // "client" is a CRM keyword but "meeting" is checked first.
        assert_eq!(detect_intent("meeting with a client"), Intent::Meeting);
        assert_eq!(detect_intent("Add a TODO for the client"), Intent::Task);
        assert_eq!(detect_intent("generate a performance summary"), Intent::Portfolio);
    }

    #[test]
    fn each_intent_is_reachable() {
        assert_eq!(detect_intent("remind me: reminder"), Intent::Task);
        assert_eq!(detect_intent("investment outlook"), Intent::Portfolio);
        assert_eq!(detect_intent("monthly report"), Intent::Report);
        assert_eq!(detect_intent("new lead from referral"), Intent::Crm);
        assert_eq!(detect_intent("hello there"), Intent::Idle);
    }

    #[test]
    fn reply_ignores_history() {
        let history = vec![ChatMessage {
            role: MessageRole::User,
            content: "review my portfolio".to_string(),
        }];
        let with_history = process_message("thanks", &history).expect("reply");
        let without = process_message("thanks", &[]).expect("reply");
        assert_eq!(with_history, without);
        assert_eq!(with_history.intent, Intent::Idle);
        assert_eq!(with_history.suggestions.len(), 4);
    }

    #[test]
    fn blank_message_is_rejected() {
        assert!(matches!(process_message("   ", &[]), Err(AppError::Validation(_))));
    }

    #[test]
    fn greeting_is_the_idle_reply() {
        assert_eq!(greeting(), canned_reply(Intent::Idle));
    }
}
