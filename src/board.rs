//! Task board view: filtering, searching and ordering of a task list.

use crate::errors::{AppError, AppResult};
use crate::models::{parse_date_like, Priority, Task};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    All,
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Pending,
    Completed,
}

impl StatusFilter {
    fn matches(self, task: &Task) -> bool {
        match self {
            Self::Pending => !task.completed,
            Self::Completed => task.completed,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    DueDate,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortConfig {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortConfig {
    /// Same field flips the direction; a new field starts ascending.
    pub fn toggle(&mut self, field: SortField) {
        self.direction = if self.field == field && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        self.field = field;
    }
}

/// Inclusive on whole days: `start` 00:00 through the last instant of `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let start = self.start.and_time(NaiveTime::MIN);
        let end = self
            .end
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap_or_else(|| self.end.and_time(NaiveTime::MIN));
        start <= at && at <= end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilters {
    pub status: Vec<StatusFilter>,
    pub priority: Vec<Priority>,
    pub category: Vec<String>,
}

impl TaskFilters {
    pub fn toggle_status(&mut self, value: StatusFilter) {
        toggle(&mut self.status, value);
    }

    pub fn toggle_priority(&mut self, value: Priority) {
        toggle(&mut self.priority, value);
    }

    pub fn toggle_category(&mut self, value: &str) {
        toggle(&mut self.category, value.to_string());
    }

    pub fn clear(&mut self) {
        self.status.clear();
        self.priority.clear();
        self.category.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty() && self.priority.is_empty() && self.category.is_empty()
    }
}

fn toggle<T: PartialEq>(values: &mut Vec<T>, value: T) {
    if let Some(index) = values.iter().position(|current| *current == value) {
        values.remove(index);
    } else {
        values.push(value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardQuery {
    pub view_mode: ViewMode,
    pub filters: TaskFilters,
    pub date_range: Option<DateRange>,
    pub search: Option<String>,
    pub sort: SortConfig,
}

impl BoardQuery {
    /// Whether anything beyond the view mode narrows the list.
    pub fn is_active(&self) -> bool {
        !self.filters.is_empty() || self.date_range.is_some() || self.search_term().is_some()
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }

    fn keeps(&self, task: &Task, search: Option<&str>) -> bool {
        let in_view = match self.view_mode {
            ViewMode::All => true,
            ViewMode::Pending => !task.completed,
            ViewMode::Completed => task.completed,
        };
        if !in_view {
            return false;
        }
        if !self.filters.status.is_empty() && !self.filters.status.iter().any(|status| status.matches(task)) {
            return false;
        }
        if !self.filters.priority.is_empty() && !self.filters.priority.contains(&task.priority) {
            return false;
        }
        if !self.filters.category.is_empty() && !self.filters.category.contains(&task.category) {
            return false;
        }
        if let Some(range) = &self.date_range {
            match parse_date_like(&task.due_date) {
                Some(due) if range.contains(due) => {}
                _ => return false,
            }
        }
        if let Some(term) = search {
            let hit = task.title.to_lowercase().contains(term)
                || task.category.to_lowercase().contains(term)
                || task
                    .description
                    .as_deref()
                    .is_some_and(|description| description.to_lowercase().contains(term));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Applies every active filter (conjunctively), then a stable sort.
pub fn apply(tasks: &[Task], query: &BoardQuery) -> Vec<Task> {
    let search = query.search_term();
    let mut result: Vec<Task> = tasks
        .iter()
        .filter(|task| query.keeps(task, search.as_deref()))
        .cloned()
        .collect();
    sort_tasks(&mut result, query.sort);
    result
}

pub fn sort_tasks(tasks: &mut [Task], sort: SortConfig) {
    tasks.sort_by(|a, b| {
        let ordering = match sort.field {
            SortField::DueDate => compare_due_dates(a, b),
            SortField::Priority => a.priority.weight().cmp(&b.priority.weight()),
        };
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

// Unparseable dates sort after every parseable one.
fn compare_due_dates(a: &Task, b: &Task) -> Ordering {
    match (parse_date_like(&a.due_date), parse_date_like(&b.due_date)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distinct categories in order of first appearance.
pub fn categories(tasks: &[Task]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for task in tasks {
        if !seen.contains(&task.category) {
            seen.push(task.category.clone());
        }
    }
    seen
}

/// Query-string form of [`BoardQuery`]; list values are comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardParams {
    pub view: Option<ViewMode>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub sort: Option<SortField>,
    pub direction: Option<SortDirection>,
}

impl TryFrom<BoardParams> for BoardQuery {
    type Error = AppError;

    fn try_from(params: BoardParams) -> AppResult<Self> {
        let status = split_list(params.status.as_deref())
            .map(|raw| {
                StatusFilter::parse(raw).ok_or_else(|| AppError::Validation(format!("unknown status '{}'", raw)))
            })
            .collect::<AppResult<Vec<_>>>()?;
        let priority = split_list(params.priority.as_deref())
            .map(|raw| Priority::parse(raw).ok_or_else(|| AppError::Validation(format!("unknown priority '{}'", raw))))
            .collect::<AppResult<Vec<_>>>()?;
        let category = split_list(params.category.as_deref()).map(ToString::to_string).collect();

        let date_range = match (params.from, params.to) {
            (Some(start), Some(end)) => Some(DateRange { start, end }),
            (Some(start), None) => Some(DateRange { start, end: start }),
            (None, Some(_)) => {
                return Err(AppError::Validation("date range requires a start date".to_string()));
            }
            (None, None) => None,
        };

        Ok(Self {
            view_mode: params.view.unwrap_or_default(),
            filters: TaskFilters {
                status,
                priority,
                category,
            },
            date_range,
            search: params.search,
            sort: SortConfig {
                field: params.sort.unwrap_or_default(),
                direction: params.direction.unwrap_or_default(),
            },
        })
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: &str, priority: Priority, due_date: &str, completed: bool, category: &str) -> Task {
        Task {
            id: id.to_string(),
            user_id: "alice".to_string(),
            title: format!("task {}", id),
            description: None,
            priority,
            due_date: due_date.to_string(),
            completed,
            category: category.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample() -> Vec<Task> {
        vec![
            task("1", Priority::Medium, "2024-02-20", false, "Portfolio Review"),
            task("2", Priority::High, "2024-02-18", true, "Client Communication"),
            task("3", Priority::Low, "2024-02-25", false, "Tax Planning"),
            task("4", Priority::High, "2024-02-19", false, "Portfolio Review"),
            task("5", Priority::Medium, "2024-02-18T15:30:00Z", true, "Tax Planning"),
            task("6", Priority::Low, "2024-02-21", false, "Client Communication"),
        ]
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn pending_view_returns_exactly_incomplete_tasks() {
        let tasks = sample();
        let query = BoardQuery {
            view_mode: ViewMode::Pending,
            ..BoardQuery::default()
        };
        let result = apply(&tasks, &query);
        assert!(result.iter().all(|task| !task.completed));
        assert_eq!(result.len(), tasks.iter().filter(|task| !task.completed).count());
    }

    #[test]
    fn priority_descending_orders_high_to_low_and_keeps_ties_stable() {
        let tasks = sample();
        let query = BoardQuery {
            sort: SortConfig {
                field: SortField::Priority,
                direction: SortDirection::Desc,
            },
            ..BoardQuery::default()
        };
        let result = apply(&tasks, &query);
        assert_eq!(ids(&result), vec!["2", "4", "1", "5", "3", "6"]);
    }

    #[test]
    fn priority_ascending_keeps_ties_stable_too() {
        let tasks = sample();
        let query = BoardQuery {
            sort: SortConfig {
                field: SortField::Priority,
                direction: SortDirection::Asc,
            },
            ..BoardQuery::default()
        };
        assert_eq!(ids(&apply(&tasks, &query)), vec!["3", "6", "1", "5", "2", "4"]);
    }

    #[test]
    fn due_date_sort_is_chronological_with_unparseable_last() {
        let mut tasks = sample();
        tasks.push(task("7", Priority::Low, "whenever", false, "Tax Planning"));
        let result = apply(&tasks, &BoardQuery::default());
        assert_eq!(ids(&result), vec!["2", "5", "4", "1", "6", "3", "7"]);
    }

    #[test]
    fn filters_are_conjunctive() {
        let tasks = sample();
        let mut query = BoardQuery::default();
        query.filters.toggle_priority(Priority::High);
        query.filters.toggle_priority(Priority::Medium);
        query.filters.toggle_category("Portfolio Review");
        query.filters.toggle_status(StatusFilter::Pending);
        assert_eq!(ids(&apply(&tasks, &query)), vec!["4", "1"]);
        assert!(query.is_active());

        query.filters.clear();
        assert!(query.filters.is_empty());
        assert!(!query.is_active());
        assert_eq!(apply(&tasks, &query).len(), tasks.len());
    }

    #[test]
    fn date_range_covers_whole_days_and_drops_unparseable() {
        let mut tasks = sample();
        tasks.push(task("7", Priority::Low, "whenever", false, "Tax Planning"));
        let query = BoardQuery {
            date_range: Some(DateRange {
                start: NaiveDate::from_ymd_opt(2024, 2, 18).expect("date"),
                end: NaiveDate::from_ymd_opt(2024, 2, 19).expect("date"),
            }),
            ..BoardQuery::default()
        };
        assert_eq!(ids(&apply(&tasks, &query)), vec!["2", "5", "4"]);
    }

    #[test]
    fn search_matches_title_description_and_category_case_insensitively() {
        let mut tasks = sample();
        tasks[2].description = Some("Prepare Q1 estimated payments".to_string());
        let query = BoardQuery {
            search: Some("  q1 ".to_string()),
            ..BoardQuery::default()
        };
        assert_eq!(ids(&apply(&tasks, &query)), vec!["3"]);

        let query = BoardQuery {
            search: Some("CLIENT".to_string()),
            ..BoardQuery::default()
        };
        assert_eq!(ids(&apply(&tasks, &query)), vec!["2", "6"]);
    }

    #[test]
    fn toggling_sort_flips_or_resets_direction() {
        let mut sort = SortConfig::default();
        sort.toggle(SortField::DueDate);
        assert_eq!(sort.direction, SortDirection::Desc);
        sort.toggle(SortField::DueDate);
        assert_eq!(sort.direction, SortDirection::Asc);
        sort.toggle(SortField::DueDate);
        sort.toggle(SortField::Priority);
        assert_eq!(
            sort,
            SortConfig {
                field: SortField::Priority,
                direction: SortDirection::Asc
            }
        );
    }

    #[test]
    fn toggling_a_filter_value_twice_removes_it() {
        let mut filters = TaskFilters::default();
        filters.toggle_category("Tax Planning");
        filters.toggle_category("Tax Planning");
        assert!(filters.is_empty());
    }

    #[test]
    fn categories_are_distinct_in_first_seen_order() {
        assert_eq!(
            categories(&sample()),
            vec!["Portfolio Review", "Client Communication", "Tax Planning"]
        );
    }

    #[test]
    fn params_parse_lists_and_single_day_range() {
        let query = BoardQuery::try_from(BoardParams {
            status: Some("pending, completed".to_string()),
            priority: Some("high,low".to_string()),
            from: NaiveDate::from_ymd_opt(2024, 2, 18),
            sort: Some(SortField::Priority),
            ..BoardParams::default()
        })
        .expect("params");
        assert_eq!(query.filters.status.len(), 2);
        assert_eq!(query.filters.priority, vec![Priority::High, Priority::Low]);
        let range = query.date_range.expect("range");
        assert_eq!(range.start, range.end);
        assert_eq!(query.sort.field, SortField::Priority);

        assert!(BoardQuery::try_from(BoardParams {
            priority: Some("urgent".to_string()),
            ..BoardParams::default()
        })
        .is_err());
        assert!(BoardQuery::try_from(BoardParams {
            to: NaiveDate::from_ymd_opt(2024, 2, 18),
            ..BoardParams::default()
        })
        .is_err());
    }
}
