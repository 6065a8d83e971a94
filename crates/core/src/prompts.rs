//! Prompt Templates
//!
//! Every completion request is rendered from a markdown template with `{name}`
//! placeholders. Built-in templates ship with the crate; any of them can be
//! replaced by a file of the same name in a prompts directory.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// The templates HealthBot knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    SystemPrompt,
    Summarize,
    GenerateQuiz,
    GradeAnswer,
    RelatedTopics,
}

impl PromptKey {
    pub const ALL: [PromptKey; 5] = [
        PromptKey::SystemPrompt,
        PromptKey::Summarize,
        PromptKey::GenerateQuiz,
        PromptKey::GradeAnswer,
        PromptKey::RelatedTopics,
    ];

    /// File stem used when loading an override from a prompts directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            PromptKey::SystemPrompt => "system_prompt",
            PromptKey::Summarize => "summarize",
            PromptKey::GenerateQuiz => "generate_quiz",
            PromptKey::GradeAnswer => "grade_answer",
            PromptKey::RelatedTopics => "related_topics",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKey::SystemPrompt => include_str!("../prompts/system_prompt.md"),
            PromptKey::Summarize => include_str!("../prompts/summarize.md"),
            PromptKey::GenerateQuiz => include_str!("../prompts/generate_quiz.md"),
            PromptKey::GradeAnswer => include_str!("../prompts/grade_answer.md"),
            PromptKey::RelatedTopics => include_str!("../prompts/related_topics.md"),
        }
    }

    fn from_file_stem(stem: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.file_stem() == stem)
    }
}

/// The active set of templates: built-ins plus any overrides.
#[derive(Debug, Clone, Default)]
pub struct Prompts {
    overrides: HashMap<PromptKey, String>,
}

impl Prompts {
    /// Builds a prompt set from `file stem -> template` pairs. Unknown stems are ignored.
    pub fn with_overrides(templates: HashMap<String, String>) -> Self {
        let mut overrides = HashMap::new();
        for (stem, template) in templates {
            match PromptKey::from_file_stem(&stem) {
                Some(key) => {
                    overrides.insert(key, template);
                }
                None => warn!(prompt = %stem, "Ignoring unknown prompt template"),
            }
        }
        Self { overrides }
    }

    /// Loads every `*.md` file in `dir` as an override.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut templates = HashMap::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                templates.insert(stem, content);
            }
        }
        let prompts = Self::with_overrides(templates);
        info!(
            dir = %dir.display(),
            overrides = prompts.overrides.len(),
            "Prompt templates loaded"
        );
        Ok(prompts)
    }

    pub fn template(&self, key: PromptKey) -> &str {
        self.overrides
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }

    /// Renders a template, substituting each `{name}` with its value.
    ///
    /// Substitution is a single pass over the template: text coming from a value is
    /// never scanned again, and unknown placeholders are left as written.
    pub fn render(&self, key: PromptKey, vars: &[(&str, &str)]) -> String {
        let mut rest = self.template(key);
        let mut out = String::with_capacity(rest.len());
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let found = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(var, _)| *var == name)
                    .map(|(_, value)| (close, *value))
            });
            match found {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
