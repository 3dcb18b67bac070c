//! The answer loop: prompt construction, model calls, tool execution.
//!
//! Each question takes one of two branches:
//!
//! - **Grounded** — retrieval produced hits above the score floor, so
//!   the prompt carries the retrieved excerpts, instructs the model to
//!   cite them, and disables tools. The first model response is the
//!   answer.
//! - **Tool-enabled** — retrieval came up empty, or the question is
//!   about the workspace itself, or it names a document other than the
//!   active one. The model gets the file-system tools and may take up
//!   to `max_iterations` model calls, executing requested tools between
//!   calls. The loop always terminates within that bound.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::intent;
use crate::llm::{ChatMessage, ChatParams, ChatProvider};
use crate::models::{Answer, SearchHit, SourceRef, ToolCallRecord, Turn, TurnRole};
use crate::tools::{tool_definitions, ToolRouter};

/// Longest tool output fed back to the model; the rest is elided.
const TOOL_RESULT_MAX_CHARS: usize = 4000;

/// Everything the loop needs to answer one question.
pub struct AgentRun<'a> {
    pub message: &'a str,
    pub history: &'a [Turn],
    pub retrieved: &'a [SearchHit],
    pub active_document: Option<&'a str>,
    pub known_documents: &'a [String],
}

pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    tools: ToolRouter,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn ChatProvider>, tools: ToolRouter, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    pub async fn run(&self, run: AgentRun<'_>) -> Result<Answer> {
        let meta = intent::is_meta_question(run.message);

        // An explicit mention of a different document overrides the
        // active-document restriction and forces the tool path.
        let forced_document = intent::mentioned_document(run.message, run.known_documents)
            .filter(|name| run.active_document != Some(name.as_str()));

        let grounded = !meta && forced_document.is_none() && !run.retrieved.is_empty();

        if grounded {
            self.run_grounded(&run).await
        } else {
            self.run_with_tools(&run, meta, forced_document.as_deref())
                .await
        }
    }

    async fn run_grounded(&self, run: &AgentRun<'_>) -> Result<Answer> {
        let system = grounded_prompt(run.retrieved);
        let mut messages = vec![ChatMessage::system(system)];
        push_history(&mut messages, run.history);
        messages.push(ChatMessage::user(run.message));

        let params = ChatParams {
            model: self.config.model.clone(),
            temperature: self.config.grounded_temperature,
            max_tokens: self.config.grounded_max_tokens,
        };

        tracing::debug!(hits = run.retrieved.len(), "grounded answer path");
        let response = self.provider.chat(&messages, &[], &params).await?;

        Ok(Answer {
            reply: response.content.unwrap_or_default(),
            sources: run.retrieved.iter().map(SourceRef::from_hit).collect(),
            used_general_knowledge: false,
            tool_calls: Vec::new(),
        })
    }

    async fn run_with_tools(
        &self,
        run: &AgentRun<'_>,
        meta: bool,
        forced_document: Option<&str>,
    ) -> Result<Answer> {
        let system = open_prompt(run.known_documents, run.active_document, forced_document, meta);
        let mut messages = vec![ChatMessage::system(system)];
        push_history(&mut messages, run.history);
        messages.push(ChatMessage::user(run.message));

        let params = ChatParams {
            model: self.config.model.clone(),
            temperature: self.config.open_temperature,
            max_tokens: self.config.open_max_tokens,
        };
        let tool_defs = tool_definitions();

        let mut records: Vec<ToolCallRecord> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let response = self.provider.chat(&messages, &tool_defs, &params).await?;

            if response.tool_calls.is_empty() {
                let reply = response.content.unwrap_or_default();
                let used_general_knowledge = records.is_empty();
                return Ok(Answer {
                    reply,
                    sources: Vec::new(),
                    used_general_knowledge,
                    tool_calls: records,
                });
            }

            tracing::debug!(
                iteration,
                calls = response.tool_calls.len(),
                "executing tool calls"
            );

            let calls = response.tool_calls.clone();
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                calls.clone(),
            ));

            for call in calls {
                let (result_text, created_path) =
                    match self.tools.dispatch(&call.name, &call.arguments).await {
                        Ok(outcome) => (outcome.content, outcome.created_path),
                        Err(e) => (format!("Tool error: {}", e), None),
                    };
                let truncated = truncate_chars(&result_text, TOOL_RESULT_MAX_CHARS);
                records.push(ToolCallRecord {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: truncated.clone(),
                    created_path,
                });
                messages.push(ChatMessage::tool(truncated, call.id));
            }
        }

        tracing::warn!(
            limit = self.config.max_iterations,
            "agent loop hit iteration limit without a terminal answer"
        );
        Ok(Answer {
            reply: "I could not complete this request within the allowed number of steps. \
                    Please try a more specific question."
                .to_string(),
            sources: Vec::new(),
            used_general_knowledge: false,
            tool_calls: records,
        })
    }
}

fn push_history(messages: &mut Vec<ChatMessage>, history: &[Turn]) {
    for turn in history {
        match turn.role {
            TurnRole::User => messages.push(ChatMessage::user(turn.content.clone())),
            TurnRole::Assistant => messages.push(ChatMessage::assistant(turn.content.clone())),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{}\n(output truncated)", kept)
}

fn grounded_prompt(hits: &[SearchHit]) -> String {
    let mut prompt = String::from(
        "You are a document assistant. Answer the user's question using ONLY the \
         excerpts below. If the excerpts do not contain the answer, say so; do not \
         guess.\n\nCite every claim with the source it came from, in the form \
         [filename lines A-B]",
    );
    if hits.iter().any(|h| h.page.is_some()) {
        prompt.push_str(" or [filename page N]");
    }
    if hits.iter().any(|h| h.sheet.is_some()) {
        prompt.push_str(" or [filename sheet NAME]");
    }
    prompt.push_str(".\n\nExcerpts:\n");

    for (i, hit) in hits.iter().enumerate() {
        let mut location = format!("lines {}-{}", hit.line_start, hit.line_end);
        if let Some(page) = hit.page {
            location = format!("page {}, {}", page, location);
        }
        if let Some(sheet) = &hit.sheet {
            location = format!("sheet {}, {}", sheet, location);
        }
        prompt.push_str(&format!(
            "[{}] {} ({}):\n{}\n\n",
            i + 1,
            hit.filename,
            location,
            hit.text
        ));
    }
    prompt
}

fn open_prompt(
    known_documents: &[String],
    active_document: Option<&str>,
    forced_document: Option<&str>,
    meta: bool,
) -> String {
    let mut prompt = String::from(
        "You are a document assistant with file-system tools confined to the \
         user's workspace. Use the tools to inspect files when the question is \
         about workspace contents. If you answer from general knowledge instead \
         of workspace files, say so explicitly.\n",
    );

    if known_documents.is_empty() {
        prompt.push_str("\nThe workspace currently has no uploaded documents.\n");
    } else {
        prompt.push_str("\nUploaded documents:\n");
        for name in known_documents {
            prompt.push_str(&format!("- {}\n", name));
        }
    }

    if let Some(doc) = forced_document {
        prompt.push_str(&format!(
            "\nThe user is asking about '{}'. Read or extract that document to answer.\n",
            doc
        ));
    } else if let Some(doc) = active_document {
        prompt.push_str(&format!(
            "\nThe conversation is focused on '{}'.\n",
            doc
        ));
    }

    if meta {
        prompt.push_str(
            "\nThe user is asking about the workspace itself. Use list_dir to get \
             the current contents and answer with a bulleted list of filenames.\n",
        );
    }
    prompt
}
