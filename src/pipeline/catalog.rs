//! Task catalog: the ordered list of configured tasks.
//!
//! Loaded once at startup and never mutated. Lookup is an exact,
//! case-insensitive comparison against each task's subject key, scanning
//! in declaration order. When two tasks share a key the first one wins;
//! duplicates are reported once at load time.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// How a task's response is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Pdf,
}

/// One configured task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Subject key matched case-insensitively against the parsed task name.
    #[serde(rename = "subject")]
    pub subject_key: String,
    /// Prompt template placed before the message body.
    pub base_prompt: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Default model for this task, used when the subject names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskDefinition {
    pub fn new(subject_key: &str, base_prompt: &str, output_format: OutputFormat) -> Self {
        Self {
            subject_key: subject_key.to_string(),
            base_prompt: base_prompt.to_string(),
            output_format,
            model: None,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    fn matches(&self, task_name: &str) -> bool {
        self.subject_key.to_lowercase() == task_name.to_lowercase()
    }
}

/// "Not found" outcome of a lookup, carrying the available subjects so
/// both front doors can show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNotFound {
    pub name: String,
    pub available: Vec<String>,
}

impl fmt::Display for TaskNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task '{}' not found; available tasks: {}",
            self.name,
            self.available.join(", ")
        )
    }
}

/// The immutable task list.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<TaskDefinition>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDefinition>) -> Self {
        let catalog = Self { tasks };
        for dup in catalog.duplicate_keys() {
            warn!(subject = %dup, "Duplicate task subject; the first definition wins");
        }
        catalog
    }

    /// Parse a YAML task list.
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let tasks: Vec<TaskDefinition> =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        if tasks.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "tasks".into(),
                message: format!("{} defines no tasks", origin.display()),
            });
        }
        Ok(Self::new(tasks))
    }

    /// Load the catalog from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let yaml = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&yaml, path)?;
        info!(path = %path.display(), count = catalog.len(), "Loaded task catalog");
        Ok(catalog)
    }

    /// First task whose subject key equals `task_name`, ignoring case.
    pub fn find(&self, task_name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.matches(task_name))
    }

    /// Like [`find`](Self::find), but a miss carries the available subjects.
    pub fn lookup(&self, task_name: &str) -> Result<&TaskDefinition, TaskNotFound> {
        self.find(task_name).ok_or_else(|| TaskNotFound {
            name: task_name.to_string(),
            available: self.subjects().into_iter().map(str::to_string).collect(),
        })
    }

    /// Task subjects in declaration order.
    pub fn subjects(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.subject_key.as_str()).collect()
    }

    /// Subject keys that occur more than once (case-insensitive).
    pub fn duplicate_keys(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let mut dups = Vec::new();
        for task in &self.tasks {
            if !seen.insert(task.subject_key.to_lowercase()) {
                dups.push(task.subject_key.as_str());
            }
        }
        dups
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// `Available tasks:` followed by one `- subject` line per task.
pub fn format_task_listing(catalog: &TaskCatalog) -> String {
    let mut out = String::from("Available tasks:");
    for subject in catalog.subjects() {
        out.push_str("\n- ");
        out.push_str(subject);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TaskCatalog {
        TaskCatalog::new(vec![
            TaskDefinition::new("Summary", "Summarize:", OutputFormat::Text),
            TaskDefinition::new("Report", "Write a report:", OutputFormat::Pdf),
            TaskDefinition::new("summary", "Second summary", OutputFormat::Pdf),
        ])
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let c = catalog();
        assert_eq!(c.find("SUMMARY").unwrap().base_prompt, "Summarize:");
        assert_eq!(c.find("report").unwrap().output_format, OutputFormat::Pdf);
    }

    #[test]
    fn lookup_is_exact_not_substring() {
        let c = catalog();
        assert!(c.find("Sum").is_none());
        assert!(c.find("Summary2").is_none());
        assert!(c.find("").is_none());
    }

    #[test]
    fn first_duplicate_wins() {
        let c = catalog();
        assert_eq!(c.find("summary").unwrap().base_prompt, "Summarize:");
        assert_eq!(c.duplicate_keys(), vec!["summary"]);
    }

    #[test]
    fn miss_lists_all_subjects() {
        let c = catalog();
        let missing = c.lookup("Translate").unwrap_err();
        assert_eq!(missing.name, "Translate");
        assert_eq!(missing.available, vec!["Summary", "Report", "summary"]);
        assert!(missing.to_string().contains("Summary, Report"));
    }

    #[test]
    fn parses_yaml_with_defaults() {
        let yaml = r#"
- subject: Summary
  base_prompt: "Summarize the following text."
- subject: Report
  base_prompt: "Write a report."
  output_format: pdf
  model: gpt-4o
"#;
        let c = TaskCatalog::from_yaml_str(yaml, Path::new("tasks.yaml")).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.tasks()[0].output_format, OutputFormat::Text);
        assert_eq!(c.tasks()[0].model, None);
        assert_eq!(c.tasks()[1].output_format, OutputFormat::Pdf);
        assert_eq!(c.tasks()[1].model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn empty_yaml_list_is_a_config_error() {
        let err = TaskCatalog::from_yaml_str("[]", Path::new("tasks.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = TaskCatalog::from_yaml_str("- subject: [", Path::new("tasks.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = TaskCatalog::load(Path::new("/nonexistent/tasks.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn listing_format() {
        let c = TaskCatalog::new(vec![
            TaskDefinition::new("Summary", "", OutputFormat::Text),
            TaskDefinition::new("Report", "", OutputFormat::Pdf),
        ]);
        assert_eq!(format_task_listing(&c), "Available tasks:\n- Summary\n- Report");
    }
}
