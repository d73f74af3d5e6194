//! CLI front door: run one task against text, a file or stdin, or list tasks.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

use crate::documents::TextExtractor;
use crate::documents::extract::is_supported_extension;
use crate::error::ChannelError;
use crate::pipeline::catalog::format_task_listing;
use crate::pipeline::{
    Attachment, DispatchOutcome, Origin, ParsedSubject, Rejection, TaskCatalog, TaskDispatcher,
    TaskOutput, WorkUnit, parse_subject,
};

/// Command-line arguments. With no `--task`, `--subject` or `--list-tasks`
/// the binary runs the mail loop.
#[derive(Debug, Clone, Parser)]
#[command(name = "taskmailer", version, about = "Run AI tasks from email or the command line")]
pub struct CliArgs {
    /// Application config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Task catalog file
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Task to run, by name
    #[arg(long, short = 't', conflicts_with = "subject")]
    pub task: Option<String>,

    /// Task to run, in subject-line syntax, e.g. "Summary (openai:gpt-4o)"
    #[arg(long, short = 's')]
    pub subject: Option<String>,

    /// Input text
    #[arg(long, short = 'i')]
    pub input: Option<String>,

    /// Read input from a file (text, PDF or DOCX)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Backend override (openai, openrouter, azure, ollama); ignored with --subject
    #[arg(long)]
    pub api: Option<String>,

    /// Model override; ignored with --subject
    #[arg(long)]
    pub model: Option<String>,

    /// Where to write PDF output
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// List available tasks and exit
    #[arg(long, short = 'l')]
    pub list_tasks: bool,
}

impl CliArgs {
    /// The single task run requested, if any.
    pub fn request(&self) -> Option<CliRequest> {
        let selector = match (&self.task, &self.subject) {
            (Some(name), _) => TaskSelector::Name(name.clone()),
            (None, Some(subject)) => TaskSelector::Subject(subject.clone()),
            (None, None) => return None,
        };
        let input = match (&self.input, &self.file) {
            (Some(text), _) => InputSource::Text(text.clone()),
            (None, Some(path)) => InputSource::File(path.clone()),
            (None, None) => InputSource::Stdin,
        };
        Some(CliRequest {
            selector,
            input,
            api: self.api.clone(),
            model: self.model.clone(),
            output: self.output.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    Name(String),
    Subject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Text(String),
    File(PathBuf),
    Stdin,
}

/// One CLI task run.
#[derive(Debug, Clone)]
pub struct CliRequest {
    pub selector: TaskSelector,
    pub input: InputSource,
    pub api: Option<String>,
    pub model: Option<String>,
    pub output: Option<PathBuf>,
}

impl CliRequest {
    /// Subject-line syntax carries its own overrides; the flags only apply
    /// to a task chosen by name.
    pub fn parsed_subject(&self) -> ParsedSubject {
        match &self.selector {
            TaskSelector::Name(name) => ParsedSubject {
                task_name: name.trim().to_string(),
                api: self.api.clone(),
                model: self.model.clone(),
            },
            TaskSelector::Subject(subject) => {
                if self.api.is_some() || self.model.is_some() {
                    warn!("--api and --model are ignored when --subject is given");
                }
                parse_subject(subject)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliStatus {
    Success,
    Failure,
}

impl CliStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failure => ExitCode::FAILURE,
        }
    }
}

/// Read the task input. Known document types go through the extractor,
/// anything else is read as lossy UTF-8.
pub fn read_input(source: &InputSource, extractor: &dyn TextExtractor) -> Result<String, ChannelError> {
    match source {
        InputSource::Text(text) => Ok(text.clone()),
        InputSource::File(path) => {
            let bytes = std::fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let file = Attachment::new(name, bytes, "application/octet-stream");
            if is_supported_extension(&file.extension()) {
                Ok(extractor.extract(&file))
            } else {
                Ok(String::from_utf8_lossy(&file.content).into_owned())
            }
        }
        InputSource::Stdin => Ok(std::io::read_to_string(std::io::stdin())?),
    }
}

pub fn list_tasks(catalog: &TaskCatalog, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "{}", format_task_listing(catalog))
}

/// Run one task and print its result (or write it to a file for PDF tasks).
pub async fn run_task(
    dispatcher: &TaskDispatcher,
    request: &CliRequest,
    input: String,
    out: &mut dyn Write,
) -> std::io::Result<CliStatus> {
    let unit = WorkUnit {
        origin: Origin::Cli,
        subject: request.parsed_subject(),
        body: input,
        attachments: Vec::new(),
    };

    match dispatcher.dispatch(unit).await {
        DispatchOutcome::Completed(TaskOutput::Text(text)) => {
            writeln!(out, "{text}")?;
            Ok(CliStatus::Success)
        }
        DispatchOutcome::Completed(TaskOutput::Document { filename, bytes }) => {
            let path = request.output.clone().unwrap_or_else(|| PathBuf::from(filename));
            if let Err(e) = std::fs::write(&path, bytes) {
                writeln!(out, "Error: could not write {}: {e}", path.display())?;
                return Ok(CliStatus::Failure);
            }
            writeln!(out, "Result saved to {}", path.display())?;
            Ok(CliStatus::Success)
        }
        DispatchOutcome::Rejected(Rejection::UnknownTask(missing)) => {
            writeln!(out, "Error: task '{}' not found.", missing.name)?;
            writeln!(out, "Available tasks:")?;
            for subject in &missing.available {
                writeln!(out, "- {subject}")?;
            }
            Ok(CliStatus::Failure)
        }
        DispatchOutcome::Rejected(rejection) => {
            writeln!(out, "Error: {rejection}")?;
            Ok(CliStatus::Failure)
        }
        DispatchOutcome::Failed(e) => {
            writeln!(out, "Error: {e}")?;
            Ok(CliStatus::Failure)
        }
    }
}
