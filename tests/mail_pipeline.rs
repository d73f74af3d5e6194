//! End-to-end tests for the mail front door.
//!
//! A scripted mailbox feeds messages through the real dispatcher, rate
//! limiter (on disk) and reply logic; a recording sender captures what
//! would have gone out over SMTP.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use taskmailer::channels::email::{MailSender, Mailbox};
use taskmailer::channels::{InboundEmail, MailLoop, OutboundEmail, spawn_mail_loop};
use taskmailer::config::AppConfig;
use taskmailer::documents::DocumentRenderer;
use taskmailer::error::{ChannelError, LlmError, RenderError};
use taskmailer::llm::{LlmBackend, LlmProvider, ProviderRegistry};
use taskmailer::pipeline::attachments::AttachmentPolicy;
use taskmailer::pipeline::{Attachment, TaskCatalog, TaskDispatcher};
use taskmailer::store::RateLimiter;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const CONFIG: &str = r#"
app_settings:
  max_attachments: 2
  max_attachment_size: 1024
  allowed_extensions: [".txt", ".md", ".pdf"]
  default_api: openai
  result_filename: result.pdf
rate_limit_defaults:
  max_requests: 5
  time_window: 3600
allowed_users:
  - email: alice@example.com
  - email: bob@example.com
    rate_limit:
      max_requests: 2
"#;

const TASKS: &str = r#"
- subject: Summary
  base_prompt: "Summarize the following:"
- subject: Report
  base_prompt: "Write a report:"
  output_format: pdf
"#;

const BOT: &str = "bot@example.com";

// ── Stubs ───────────────────────────────────────────────────────────

/// Stub LLM provider (no real API calls); echoes the prompt.
#[derive(Default)]
struct StubLlm {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }
    fn default_model(&self) -> &str {
        "stub-1"
    }
    async fn complete(&self, prompt: &str, _model: Option<&str>) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(format!("done: {}", prompt.lines().next().unwrap_or_default()))
    }
}

struct StubRenderer;

impl DocumentRenderer for StubRenderer {
    fn render(&self, markdown: &str) -> Result<Vec<u8>, RenderError> {
        Ok(format!("%PDF-stub {markdown}").into_bytes())
    }
}

/// Hands out its messages on the first fetch, then nothing.
struct ScriptedMailbox {
    pending: Mutex<Vec<InboundEmail>>,
    fetches: AtomicUsize,
}

impl ScriptedMailbox {
    fn new(messages: Vec<InboundEmail>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(messages),
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Mailbox for ScriptedMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
    }
}

/// Records replies; fails for recipients listed in `reject`.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutboundEmail>>,
    reject: Vec<String>,
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError> {
        if self.reject.contains(&email.to) {
            return Err(ChannelError::SendFailed {
                name: "smtp".into(),
                reason: "mailbox unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn email(uid: &str, sender: &str, subject: &str, body: &str) -> InboundEmail {
    InboundEmail {
        uid: uid.to_string(),
        message_id: None,
        sender: sender.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        attachments: Vec::new(),
    }
}

fn dispatcher(store: &Path, llm: Arc<StubLlm>) -> Arc<TaskDispatcher> {
    let config = AppConfig::from_yaml_str(CONFIG, Path::new("config.yaml")).unwrap();
    let catalog = TaskCatalog::from_yaml_str(TASKS, Path::new("tasks.yaml")).unwrap();
    let limiter = RateLimiter::open(store).unwrap();
    Arc::new(
        TaskDispatcher::new(
            Arc::new(catalog),
            ProviderRegistry::new().with(LlmBackend::OpenAi, llm),
            Arc::new(limiter),
            config.access_policy(),
            AttachmentPolicy::from_settings(&config.app_settings),
        )
        .with_renderer(Arc::new(StubRenderer))
        .with_result_filename(&config.app_settings.result_filename),
    )
}

fn mail_loop(
    messages: Vec<InboundEmail>,
    sender: Arc<RecordingSender>,
    dispatcher: Arc<TaskDispatcher>,
) -> MailLoop {
    MailLoop::new(
        ScriptedMailbox::new(messages),
        sender,
        dispatcher,
        BOT,
        Duration::from_secs(3600),
    )
}

/// One-page PDF that selects `/F1` while its `/Resources` is empty.
fn pdf_missing_font_resource() -> Vec<u8> {
    let content = "BT /F1 12 Tf 72 712 Td (Hello) Tj ET";
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << >> /Contents 4 0 R >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()),
    ];
    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref_at = pdf.len();
    pdf.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!("trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n").as_bytes(),
    );
    pdf
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn text_task_is_answered_by_email() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StubLlm::default());
    let sender = Arc::new(RecordingSender::default());
    let ml = mail_loop(
        vec![email("1", "Alice@Example.com", "RE: summary", "Long text")],
        sender.clone(),
        dispatcher(&dir.path().join("rl.json"), llm.clone()),
    );

    assert_eq!(ml.poll_once().await, 1);

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "Alice@Example.com");
    assert_eq!(sent[0].subject, "Task result");
    assert_eq!(sent[0].body, "done: Summarize the following:");
    assert_eq!(
        llm.prompts.lock().unwrap()[0],
        "Summarize the following:\nLong text\n"
    );
}

#[tokio::test]
async fn pdf_task_replies_with_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let mut msg = email("1", "alice@example.com", "Report", "data");
    msg.attachments = vec![
        Attachment::new("notes.txt", b"attached notes".to_vec(), "text/plain"),
        Attachment::new("image.png", vec![0x89, 0x50], "image/png"),
    ];
    let llm = Arc::new(StubLlm::default());
    let ml = mail_loop(vec![msg], sender.clone(), dispatcher(&dir.path().join("rl.json"), llm.clone()));

    ml.poll_once().await;

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent[0].body, "See attachment.");
    let att = sent[0].attachment.as_ref().unwrap();
    assert_eq!(att.filename, "result.pdf");
    assert!(att.content.starts_with(b"%PDF"));

    let prompt = &llm.prompts.lock().unwrap()[0];
    assert!(prompt.contains("[Attachment notes.txt]:\nattached notes\n"));
    assert!(!prompt.contains("image.png"));
}

#[tokio::test]
async fn quota_is_enforced_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("rl.json");
    let sender = Arc::new(RecordingSender::default());
    let messages = (1..=3)
        .map(|i| email(&i.to_string(), "bob@example.com", "Summary", "x"))
        .collect();
    let ml = mail_loop(messages, sender.clone(), dispatcher(&store, Arc::default()));

    ml.poll_once().await;

    let subjects: Vec<String> = sender.sent.lock().unwrap().iter().map(|m| m.subject.clone()).collect();
    assert_eq!(subjects, vec!["Task result", "Task result", "Request limit exceeded"]);
    let limit_body = &sender.sent.lock().unwrap()[2].body;
    assert!(limit_body.contains("maximum of 2 requests"));

    // A fresh limiter on the same file sees the spent window.
    let reopened = RateLimiter::open(&store).unwrap();
    assert_eq!(reopened.window("bob@example.com").unwrap().request_count, 3);
}

#[tokio::test]
async fn silent_drops_and_self_mail() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StubLlm::default());
    let sender = Arc::new(RecordingSender::default());
    let ml = mail_loop(
        vec![
            email("1", "stranger@example.org", "Summary", "x"),
            email("2", "alice@example.com", "Unknown Task", "x"),
            email("3", BOT, "Summary", "x"),
        ],
        sender.clone(),
        dispatcher(&dir.path().join("rl.json"), llm.clone()),
    );

    assert_eq!(ml.poll_once().await, 3);
    assert!(sender.sent.lock().unwrap().is_empty());
    assert!(llm.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn too_many_attachments_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let mut msg = email("1", "alice@example.com", "Summary", "x");
    msg.attachments = (0..3)
        .map(|i| Attachment::new(format!("{i}.txt"), b"t".to_vec(), "text/plain"))
        .collect();
    let ml = mail_loop(vec![msg], sender.clone(), dispatcher(&dir.path().join("rl.json"), Arc::default()));

    ml.poll_once().await;

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Too many attachments");
}

#[tokio::test]
async fn delivery_failure_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender {
        reject: vec!["alice@example.com".into()],
        ..Default::default()
    });
    let ml = mail_loop(
        vec![
            email("1", "alice@example.com", "Summary", "x"),
            email("2", "bob@example.com", "Summary", "y"),
        ],
        sender.clone(),
        dispatcher(&dir.path().join("rl.json"), Arc::default()),
    );

    assert_eq!(ml.poll_once().await, 1);
    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "bob@example.com");
}

#[tokio::test]
async fn malformed_pdf_does_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StubLlm::default());
    let sender = Arc::new(RecordingSender::default());
    let mut bad = email("1", "alice@example.com", "Summary", "see file");
    bad.attachments = vec![Attachment::new("odd.pdf", pdf_missing_font_resource(), "application/pdf")];
    let ml = mail_loop(
        vec![bad, email("2", "bob@example.com", "Summary", "plain")],
        sender.clone(),
        dispatcher(&dir.path().join("rl.json"), llm.clone()),
    );

    let (handle, shutdown) = spawn_mail_loop(ml);
    timeout(TEST_TIMEOUT, async {
        while sender.sent.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both messages should be answered");

    let recipients: Vec<String> = sender.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect();
    assert_eq!(recipients, vec!["alice@example.com", "bob@example.com"]);
    assert_eq!(llm.prompts.lock().unwrap()[0], "Summarize the following:\nsee file\n");

    shutdown.send(true).unwrap();
    timeout(TEST_TIMEOUT, handle)
        .await
        .expect("loop should stop promptly")
        .expect("loop task should not have panicked");
}

#[tokio::test]
async fn spawned_loop_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let ml = mail_loop(
        vec![email("1", "alice@example.com", "Summary", "x")],
        sender.clone(),
        dispatcher(&dir.path().join("rl.json"), Arc::default()),
    );

    let (handle, shutdown) = spawn_mail_loop(ml);
    timeout(TEST_TIMEOUT, async {
        while sender.sent.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first poll should reply");

    shutdown.send(true).unwrap();
    timeout(TEST_TIMEOUT, handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();
}
