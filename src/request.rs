use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::assistant::Assistant;
use crate::error::{Error, Result};

pub const DEFAULT_ERROR_CHARS: usize = 4000;
pub const DEFAULT_CONTEXT_BYTES: usize = 20_000;

const DEFAULT_FIX_TEMPLATE: &str = include_str!("default_prompts/fix.md");
const FIX_TEMPLATE_NAME: &str = "fix";
const FIX_TEMPLATE_FILE: &str = "fix.md";
const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Default prompt override directory relative to a repo root.
pub fn default_override_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".fixloop").join("prompts")
}

/// Inputs for one fix request.
#[derive(Debug, Clone)]
pub struct FixRequest<'a> {
    pub errors_text: &'a str,
    pub allowed_files: &'a [String],
    pub note: Option<&'a str>,
    pub strict: bool,
}

/// A rendered prompt and the assistant's untouched answer.
#[derive(Debug, Clone)]
pub struct FixResponse {
    pub prompt: String,
    pub raw: String,
}

#[derive(Debug, Serialize)]
struct FileContext {
    path: String,
    content: String,
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    strict: bool,
    has_note: bool,
    note: &'a str,
    allowed_files: &'a [String],
    files: Vec<FileContext>,
    errors: String,
}

/// Builds scope-constrained fix prompts and hands them to an assistant.
pub struct FixRequester {
    root: PathBuf,
    override_dir: Option<PathBuf>,
    error_chars: usize,
    context_bytes: usize,
}

impl FixRequester {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            override_dir: None,
            error_chars: DEFAULT_ERROR_CHARS,
            context_bytes: DEFAULT_CONTEXT_BYTES,
        }
    }

    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    pub fn with_limits(mut self, error_chars: usize, context_bytes: usize) -> Self {
        self.error_chars = error_chars;
        self.context_bytes = context_bytes;
        self
    }

    /// The fix template: `<override_dir>/fix.md` if present, else the embedded default.
    pub fn load_template(&self) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(FIX_TEMPLATE_FILE);
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }
        Ok(DEFAULT_FIX_TEMPLATE.to_string())
    }

    pub fn build_prompt(&self, request: &FixRequest<'_>) -> Result<String> {
        let template = self.load_template()?;
        let note = request.note.unwrap_or_default();
        let context = PromptContext {
            strict: request.strict,
            has_note: !note.is_empty(),
            note,
            allowed_files: request.allowed_files,
            files: self.file_context(request.allowed_files),
            errors: truncate_chars(request.errors_text, self.error_chars),
        };

        let mut engine = upon::Engine::new();
        engine
            .add_template(FIX_TEMPLATE_NAME, template)
            .map_err(|e| Error::Prompt(format!("invalid fix template: {e}")))?;
        engine
            .template(FIX_TEMPLATE_NAME)
            .render(&context)
            .to_string()
            .map_err(|e| Error::Prompt(format!("failed to render fix template: {e}")))
    }

    /// Render the prompt and ask the assistant. The answer is not interpreted.
    pub async fn request<A: Assistant>(
        &self,
        assistant: &A,
        request: &FixRequest<'_>,
    ) -> Result<FixResponse> {
        let prompt = self.build_prompt(request)?;
        debug!(
            chars = prompt.len(),
            files = request.allowed_files.len(),
            strict = request.strict,
            "requesting fix"
        );
        let raw = assistant.complete(&prompt).await?;
        Ok(FixResponse { prompt, raw })
    }

    fn file_context(&self, files: &[String]) -> Vec<FileContext> {
        let mut remaining = self.context_bytes;
        let mut out = Vec::new();
        for file in files {
            if remaining == 0 {
                break;
            }
            let content = match std::fs::read_to_string(self.root.join(file)) {
                Ok(c) => c,
                Err(e) => {
                    debug!(file = %file, error = %e, "skipping file context");
                    continue;
                }
            };
            let (content, truncated) = if content.len() > remaining {
                (content[..floor_char_boundary(&content, remaining)].to_string(), true)
            } else {
                (content, false)
            };
            remaining -= content.len();
            out.push(FileContext {
                path: file.clone(),
                content,
                truncated,
            });
        }
        out
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    let mut idx = max.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Keep at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..idx]),
        None => text.to_string(),
    }
}

fn normalize_path(value: &str) -> String {
    value.replace('\\', "/")
}

fn is_target_line(line: &str, targets: &[String]) -> bool {
    let trimmed = line.trim();
    let cleaned = normalize_path(trimmed.strip_prefix("./").unwrap_or(trimmed));
    if cleaned.is_empty() {
        return false;
    }
    targets
        .iter()
        .any(|t| cleaned == *t || cleaned.ends_with(&format!("/{t}")))
}

/// Narrow linter output to the report blocks of `targets`.
///
/// A block starts at a line naming a target file and runs to the next blank
/// line. Falls back to the whole output when no block matches.
pub fn filter_lint_output(output: &str, targets: &[String]) -> String {
    let targets: Vec<String> = targets.iter().map(|t| normalize_path(t)).collect();
    let mut kept = Vec::new();
    let mut capturing = false;
    for line in output.lines() {
        if is_target_line(line, &targets) {
            capturing = true;
        }
        if capturing {
            kept.push(line);
            if line.trim().is_empty() {
                capturing = false;
            }
        }
    }
    let text = kept.join("\n");
    let text = text.trim();
    if text.is_empty() {
        output.to_string()
    } else {
        text.to_string()
    }
}
