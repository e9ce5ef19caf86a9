//! System prompt and message assembly.
//!
//! The system prompt is layered in a fixed order:
//!
//! 1. persona (assistant name, optional user title)
//! 2. current local date and time
//! 3. retrieved context, when any
//! 4. extra blocks (e.g. web search results)
//! 5. mode addendum
//!
//! Messages are `[system, (user, assistant)*, user(question)]`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::config::PersonaConfig;
use crate::llm::message::Message;
use crate::retrieval::ContextRetriever;
use crate::session::HistoryPair;

const PERSONA_TEMPLATE: &str = "You are {name}, a complete AI assistant rather than a plain chat bot. \
You answer questions, acknowledge actions (opening apps or sites, generating images, playing music, \
writing content) and use web search results when they are provided. You are sharp, warm and a little witty, \
and you keep language simple and natural.

You know the user's personal information and past conversations. Use them when relevant but never reveal where they come from.

=== ACTIONS ===
The backend carries out actions; you respond in words. Only say an action is done if the user can already see the result. \
Otherwise say you are doing it. For information requests, answer directly instead of announcing a search.
You cannot read email, check messages, control smart home devices, run arbitrary code or send from accounts. Say so briefly.

=== LENGTH ===
Reply briefly by default: one or two sentences for simple or casual questions, with no intro or wrap-up. \
Go longer only when the user asks for detail or the question clearly demands it.

=== QUALITY AND TONE ===
Be accurate and specific, using concrete facts from context or search results. If a detail is missing, say what you found. \
Never refuse entirely and never claim your knowledge is limited. Address the user by name only if context provides one.

=== FORMATTING ===
No asterisks, emojis, markdown or special symbols. Use plain sentences or numbered lists (1. 2. 3.).";

const GENERAL_ADDENDUM: &str = "You are in GENERAL mode (no web search). Answer from your knowledge and the \
context provided (learning data, conversation history). Answer confidently and briefly. Never tell the user \
to search online. Default to one or two sentences unless the user asks for more.";

const REALTIME_ADDENDUM: &str = "You are in REALTIME mode. Live web search results are included above.

USE THE SEARCH RESULTS:
- Treat them as your primary source. Extract specific facts, names, numbers, dates and URLs.
- If an AI-SYNTHESIZED ANSWER is present, use it and add details from the individual sources.
- Never mention that you searched or that you are in realtime mode.
- If the results lack the exact answer, say what you found and what was missing.

LENGTH: Keep replies short by default. Only elaborate when the user asks for detail.";

/// Which prompt strategy a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Knowledge plus retrieved context only.
    General,
    /// General, plus live web search results.
    Realtime,
}

impl ChatMode {
    pub fn addendum(self) -> &'static str {
        match self {
            Self::General => GENERAL_ADDENDUM,
            Self::Realtime => REALTIME_ADDENDUM,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Realtime => "realtime",
        }
    }
}

/// Persona text with the configured name and optional user title.
pub fn persona_prompt(persona: &PersonaConfig) -> String {
    let mut text = PERSONA_TEMPLATE.replace("{name}", &persona.assistant_name);
    if let Some(title) = persona.user_title.as_deref().filter(|t| !t.trim().is_empty()) {
        text.push_str("\n- When appropriate, you may address the user as: ");
        text.push_str(title.trim());
    }
    text
}

/// Current date and time block.
pub fn time_block(now: &DateTime<Local>) -> String {
    format!(
        "Current Real-Time Information: \nDay: {}\nDate: {}\nMonth: {}\nYear: {}\nTime: {} hours, {} minutes, {} seconds\n",
        now.format("%A"),
        now.format("%d"),
        now.format("%B"),
        now.format("%Y"),
        now.format("%H"),
        now.format("%M"),
        now.format("%S"),
    )
}

/// Builds the system prompt and message list for one request.
#[derive(Clone)]
pub struct PromptBuilder {
    persona: String,
    retriever: Option<Arc<dyn ContextRetriever>>,
    top_k: usize,
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilder")
            .field("retriever", &self.retriever.is_some())
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl PromptBuilder {
    pub fn new(persona: &PersonaConfig) -> Self {
        Self {
            persona: persona_prompt(persona),
            retriever: None,
            top_k: 10,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    /// Retrieved context joined by newlines. Failures yield an empty string.
    pub fn context_for(&self, question: &str) -> String {
        let Some(retriever) = &self.retriever else {
            return String::new();
        };
        let started = Instant::now();
        let context = match retriever.retrieve(question, self.top_k) {
            Ok(chunks) if !chunks.is_empty() => {
                let sources: Vec<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
                tracing::info!(chunks = chunks.len(), ?sources, "retrieved context");
                chunks
                    .iter()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Ok(_) => {
                tracing::info!("no relevant context found");
                String::new()
            }
            Err(e) => {
                tracing::info!(error = %e, "context retrieval failed, using empty context");
                String::new()
            }
        };
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "vector_db");
        context
    }

    /// Assemble the system prompt for the given parts.
    pub fn system_prompt(
        &self,
        now: &DateTime<Local>,
        context: &str,
        extra: &[String],
        mode: ChatMode,
    ) -> String {
        let mut system = self.persona.clone();
        system.push_str("\n\nCurrent time and date: ");
        system.push_str(&time_block(now));
        if !context.is_empty() {
            system.push_str("\n\nRelevant context from your learning data and past conversations:\n");
            system.push_str(context);
        }
        let extra: Vec<&str> = extra
            .iter()
            .map(String::as_str)
            .filter(|e| !e.is_empty())
            .collect();
        if !extra.is_empty() {
            system.push_str("\n\n");
            system.push_str(&extra.join("\n\n"));
        }
        system.push_str("\n\n");
        system.push_str(mode.addendum());
        system
    }

    /// Full message list for a question.
    pub fn build(
        &self,
        question: &str,
        history: &[HistoryPair],
        extra: &[String],
        mode: ChatMode,
    ) -> Vec<Message> {
        let context = self.context_for(question);
        let system = self.system_prompt(&Local::now(), &context, extra, mode);
        tracing::info!(
            system_chars = system.len(),
            history_pairs = history.len(),
            mode = mode.as_str(),
            "prompt built"
        );
        assemble(system, history, question)
    }
}

/// `[system, (user, assistant)*, user(question)]`.
pub fn assemble(system: String, history: &[HistoryPair], question: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(Message::system(system));
    for pair in history {
        messages.push(Message::user(pair.user.clone()));
        messages.push(Message::assistant(pair.assistant.clone()));
    }
    messages.push(Message::user(question));
    messages
}
