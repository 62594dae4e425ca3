//! Prompt builders, response schemas, and response parsing for the three
//! agents.
//!
//! Every LLM call in the system is JSON-mode: the request carries a schema
//! and the response is validated here before anything consumes it. A
//! response that fails to parse follows the LLM-fault path of its caller.

use serde::Deserialize;
use serde_json::{json, Value};

use invisibrow_memory::MemoryRecord;
use invisibrow_types::InvisibrowError;

// ---------------------------------------------------------------------------
// Keyword extraction
// ---------------------------------------------------------------------------

pub fn keyword_extraction_prompt(goal: &str) -> String {
    format!(
        "Extract 3 to 5 lowercase search keywords that capture the essence of this task goal. \
         Prefer concrete nouns (sites, products, places) over verbs.\n\nGoal: {goal}"
    )
}

pub fn keyword_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "keywords": {
                "type": "array",
                "items": {"type": "string"},
                "minItems": 3,
                "maxItems": 5
            }
        },
        "required": ["keywords"]
    })
}

#[derive(Debug, Deserialize)]
pub struct KeywordExtraction {
    pub keywords: Vec<String>,
}

pub fn parse_keywords(content: &str) -> Result<KeywordExtraction, InvisibrowError> {
    parse_json(content, "keyword extraction")
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Placeholder user message for the first planning iteration, before any
/// browser activity has produced a result.
pub const NO_BROWSER_RESULT_SENTINEL: &str = "(no browser result yet; this is the first step)";

/// Format recalled memory records into a bounded context block annotated
/// with timestamps. Empty input produces an empty block.
pub fn format_memory_block(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut block = String::from("Relevant results from earlier tasks:\n");
    for record in records {
        block.push_str(&format!(
            "- [{}] goal: {} / result: {}\n",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.goal,
            record.summary
        ));
    }
    block
}

/// Format the session's prior task summaries into a context block.
pub fn format_history_block(history: &[String]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut block = String::from("Earlier tasks completed in this browser session:\n");
    for entry in history {
        block.push_str(&format!("- {entry}\n"));
    }
    block
}

pub fn planner_system_prompt(
    goal: &str,
    memory_block: &str,
    history_block: &str,
    trace: &[String],
) -> String {
    let mut prompt = format!(
        "You are the planner of a browser automation agent. Decompose the user's goal into \
         browser work and decide the next command.\n\nGoal: {goal}\n\n\
         Commands:\n\
         - browser: delegate one concrete instruction to the browser executor (input.task)\n\
         - finish: the goal is achieved; provide the final answer (input.answer)\n\
         - wait: pause briefly before re-planning\n\n\
         Rules:\n\
         - You never see pages directly; you only see the executor's summaries.\n\
         - If the context blocks below already contain values the task needs (names, numbers, \
           dates, URLs), copy those values verbatim into input.task so the executor does not \
           look them up again.\n\
         - Finish as soon as the goal is satisfied.\n"
    );
    if !memory_block.is_empty() {
        prompt.push('\n');
        prompt.push_str(memory_block);
    }
    if !history_block.is_empty() {
        prompt.push('\n');
        prompt.push_str(history_block);
    }
    if !trace.is_empty() {
        prompt.push_str("\nPlanning steps so far:\n");
        for line in trace {
            prompt.push_str(&format!("- {line}\n"));
        }
    }
    prompt
}

pub fn planner_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "thought": {"type": "string"},
            "command": {"type": "string", "enum": ["browser", "finish", "wait"]},
            "input": {
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "answer": {"type": "string"}
                }
            }
        },
        "required": ["thought", "command"]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanCommand {
    Browser,
    Finish,
    Wait,
}

impl PlanCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCommand::Browser => "browser",
            PlanCommand::Finish => "finish",
            PlanCommand::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanInput {
    pub task: Option<String>,
    pub answer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanDecision {
    pub thought: String,
    pub command: PlanCommand,
    #[serde(default)]
    pub input: PlanInput,
}

pub fn parse_plan_decision(content: &str) -> Result<PlanDecision, InvisibrowError> {
    parse_json(content, "plan decision")
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub fn executor_system_prompt(goal: &str, history: &[String]) -> String {
    let mut prompt = format!(
        "You drive a real browser one action at a time. The user message is a snapshot of the \
         current page: its URL, title, numbered interactive elements, and a text excerpt.\n\n\
         Instruction: {goal}\n\n\
         Actions:\n\
         - goto: navigate to a URL (param = url)\n\
         - search: run a web search (param = query)\n\
         - click: click an element (param = element index from the snapshot)\n\
         - type: type into an element and submit (param = \"index:text\")\n\
         - wait: let the page settle\n\
         - finish / answer: the instruction is done; put the outcome in answer\n\n\
         Rules:\n\
         - Reference elements only by their snapshot index.\n\
         - When the page already shows the requested information, answer immediately.\n"
    );
    if !history.is_empty() {
        prompt.push_str("\nSteps taken so far:\n");
        for line in history {
            prompt.push_str(&format!("- {line}\n"));
        }
    }
    prompt
}

pub fn executor_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "thought": {"type": "string"},
            "action": {
                "type": "string",
                "enum": ["goto", "click", "type", "search", "wait", "finish", "answer"]
            },
            "param": {"type": "string"},
            "answer": {"type": "string"}
        },
        "required": ["thought", "action"]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecAction {
    Goto,
    Click,
    Type,
    Search,
    Wait,
    Finish,
    Answer,
}

impl ExecAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecAction::Goto => "goto",
            ExecAction::Click => "click",
            ExecAction::Type => "type",
            ExecAction::Search => "search",
            ExecAction::Wait => "wait",
            ExecAction::Finish => "finish",
            ExecAction::Answer => "answer",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecDecision {
    pub thought: String,
    pub action: ExecAction,
    pub param: Option<String>,
    pub answer: Option<String>,
}

pub fn parse_exec_decision(content: &str) -> Result<ExecDecision, InvisibrowError> {
    parse_json(content, "executor decision")
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

pub fn watchdog_prompt(goal: &str, snapshot_text: &str, history_tail: &[String]) -> String {
    let mut prompt = format!(
        "You screen a browser automation agent for pages that require human intervention.\n\n\
         The agent is working on: {goal}\n\n\
         Set needsIntervention=true ONLY when ALL of these hold:\n\
         1. The page shows a CAPTCHA, a forced login wall, or an explicit block message.\n\
         2. The block actually prevents the task from progressing.\n\
         3. The MAIN CONTENT AREA is blocked, not merely a login button in a header.\n\n\
         These are NOT intervention (set needsIntervention=false):\n\
         - Optional login prompts next to readable content.\n\
         - Soft engagement nudges (newsletter popups, app banners, cookie bars).\n\
         - Content that is readable while signed out.\n\n\
         Set isStuck=true when the recent actions show the same action repeated three or more \
         times with no page change.\n\n\
         When needsIntervention=true, also list newBlockKeywords: short phrases from the page \
         that identify this kind of block.\n"
    );
    if !history_tail.is_empty() {
        prompt.push_str("\nRecent actions:\n");
        for line in history_tail {
            prompt.push_str(&format!("- {line}\n"));
        }
    }
    prompt.push_str("\nCurrent page:\n");
    prompt.push_str(snapshot_text);
    prompt
}

pub fn watchdog_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "isStuck": {"type": "boolean"},
            "needsIntervention": {"type": "boolean"},
            "reason": {"type": "string"},
            "newBlockKeywords": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["isStuck", "needsIntervention"]
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct WatchdogReport {
    #[serde(rename = "isStuck", default)]
    pub is_stuck: bool,
    #[serde(rename = "needsIntervention", default)]
    pub needs_intervention: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "newBlockKeywords", default)]
    pub new_block_keywords: Vec<String>,
}

pub fn parse_watchdog_report(content: &str) -> Result<WatchdogReport, InvisibrowError> {
    parse_json(content, "watchdog report")
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

pub fn summarize_prompt(goal: &str, snapshot_text: &str, answer: &str) -> String {
    format!(
        "Summarize the outcome of a browser instruction for the planning agent. Include every \
         concrete value that answers the instruction. Put structured values (names, prices, \
         dates) into `extracted`.\n\n\
         Instruction: {goal}\n\
         Agent's answer: {answer}\n\n\
         Final page:\n{snapshot_text}"
    )
}

pub fn summarize_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "extracted": {"type": "object"}
        },
        "required": ["summary"]
    })
}

#[derive(Debug, Deserialize)]
pub struct Summarization {
    pub summary: String,
    #[serde(default)]
    pub extracted: Value,
}

pub fn parse_summarization(content: &str) -> Result<Summarization, InvisibrowError> {
    parse_json(content, "summarization")
}

fn parse_json<T: serde::de::DeserializeOwned>(
    content: &str,
    what: &str,
) -> Result<T, InvisibrowError> {
    serde_json::from_str(content)
        .map_err(|e| InvisibrowError::Llm(format!("malformed {what} response: {e}")))
}
