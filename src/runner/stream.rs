//! Decoding of the agent CLI's `stream-json` output.

use serde::Deserialize;
use serde_json::Value;

/// Events from the agent CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Something worth showing while a step runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Tool(String),
    Text(String),
}

/// Folds stream-json lines into the step's final output.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    final_result: Option<String>,
    is_error: bool,
    cost_usd: f64,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line of output. Lines that are not stream-json are kept
    /// verbatim as output text.
    pub fn push_line(&mut self, line: &str) -> Vec<Activity> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        let event = match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => event,
            Err(_) => {
                self.text.push_str(line);
                self.text.push('\n');
                return Vec::new();
            }
        };

        let mut activity = Vec::new();
        match event {
            StreamEvent::Assistant { message, .. } => {
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, input } => {
                            activity.push(Activity::Tool(describe_tool_use(&name, &input)));
                        }
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                            let snippet = first_line(&text, 60);
                            if !snippet.is_empty() {
                                activity.push(Activity::Text(snippet));
                            }
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result {
                result,
                is_error,
                total_cost_usd,
                ..
            } => {
                self.final_result = result;
                self.is_error = is_error;
                self.cost_usd = total_cost_usd.unwrap_or(0.0);
            }
            StreamEvent::Other => {}
        }
        activity
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    /// The final result text if the CLI reported one, else everything accumulated.
    pub fn into_output(self) -> String {
        self.final_result.unwrap_or(self.text)
    }
}

/// Extract a human-readable description from a tool use event
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    let file = || {
        field("file_path")
            .map(shorten_path)
            .unwrap_or_else(|| "file".into())
    };
    match name {
        "Read" => format!("Reading: {}", file()),
        "Write" => format!("Creating: {}", file()),
        "Edit" => format!("Editing: {}", file()),
        "Bash" => format!(
            "Running: {}",
            field("command")
                .map(|c| truncate_str(c, 40))
                .unwrap_or_else(|| "command".into())
        ),
        "Glob" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        "Grep" => format!(
            "Grep: {}",
            field("pattern")
                .map(|p| truncate_str(p, 30))
                .unwrap_or_else(|| "pattern".into())
        ),
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or(text);
    truncate_str(line.trim(), max_chars)
}
