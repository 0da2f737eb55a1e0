//! Candidate artifacts: role-tagged instruction templates under evaluation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::dataset::Example;
use crate::errors::{PwError, PwResult};

/// Speaker role of a message fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_header(line: &str) -> Option<(Role, &str)> {
        for role in [Role::System, Role::User, Role::Assistant] {
            let name = role.as_str();
            let Some(prefix) = line.get(..name.len()) else {
                continue;
            };
            if prefix.eq_ignore_ascii_case(name) && line.as_bytes().get(name.len()) == Some(&b':') {
                return Some((role, line[name.len() + 1..].trim()));
            }
        }
        None
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single role-tagged message fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Structured-output schema attached to a `json_schema` response format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: Value,
    #[serde(default)]
    pub strict: bool,
}

/// Desired output format of the task model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: JsonSchemaSpec },
}

impl ResponseFormat {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ResponseFormat::Text => "text",
            ResponseFormat::JsonObject => "json_object",
            ResponseFormat::JsonSchema { .. } => "json_schema",
        }
    }

    /// Normalized description handed to the prompt model: the schema body for
    /// structured formats, otherwise the format's type tag.
    pub fn describe(&self) -> String {
        match self {
            ResponseFormat::JsonSchema { json_schema } => json_schema.schema.to_string(),
            other => other.type_tag().to_string(),
        }
    }
}

/// Describe an optional response format, `"none"` when absent.
pub fn describe_response_format(format: Option<&ResponseFormat>) -> String {
    format
        .map(ResponseFormat::describe)
        .unwrap_or_else(|| "none".to_string())
}

/// One concrete instruction-template variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateArtifact {
    pub name: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub fewshot: Vec<Example>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl CandidateArtifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_response_format(mut self, format: Option<ResponseFormat>) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_fewshot(mut self, fewshot: Vec<Example>) -> Self {
        self.fewshot = fewshot;
        self
    }

    /// True when at least one message carries non-whitespace content.
    pub fn has_content(&self) -> bool {
        self.messages.iter().any(|m| !m.content.trim().is_empty())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Messages serialized as one JSON object per line.
    pub fn messages_as_json_lines(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| serde_json::to_string(m).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the messages in the artifact text format.
    pub fn dump(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}:\n{}", m.role, m.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Parse the artifact text format: `role:` headers followed by content.
    ///
    /// Text before the first header is ignored. Fails when no message with
    /// content is found.
    pub fn parse(text: &str) -> PwResult<Self> {
        let mut messages: Vec<Message> = Vec::new();
        let mut current: Option<(Role, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some((role, inline)) = Role::from_header(line) {
                if let Some((role, lines)) = current.take() {
                    messages.push(Message::new(role, lines.join("\n").trim().to_string()));
                }
                let mut lines = Vec::new();
                if !inline.is_empty() {
                    lines.push(inline);
                }
                current = Some((role, lines));
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
        }
        if let Some((role, lines)) = current.take() {
            messages.push(Message::new(role, lines.join("\n").trim().to_string()));
        }

        messages.retain(|m| !m.content.is_empty());
        if messages.is_empty() {
            return Err(PwError::parse("artifact has no message content"));
        }

        Ok(Self {
            messages,
            ..Self::default()
        })
    }

    /// Extract and parse the artifact embedded in model output.
    ///
    /// A ```` ```prompt ```` fence is preferred; any other fence is accepted.
    /// An unterminated fence runs to the end of the text.
    pub fn from_fenced_text(raw: &str) -> PwResult<Self> {
        let body = extract_fenced(raw)
            .ok_or_else(|| PwError::parse("no fenced artifact region found"))?;
        Self::parse(body)
    }
}

/// Byte offset and content (without line terminator) of each line.
fn line_spans(raw: &str) -> Vec<(usize, &str)> {
    let mut offset = 0;
    raw.split_inclusive('\n')
        .map(|line| {
            let start = offset;
            offset += line.len();
            (start, line.trim_end_matches(['\n', '\r']))
        })
        .collect()
}

/// Body of the artifact fence.
///
/// Fences opened inside the body (a fence line with an info string, such as
/// ```` ```json ````) must be closed before a bare ```` ``` ```` line ends
/// the artifact.
fn extract_fenced(raw: &str) -> Option<&str> {
    let lines = line_spans(raw);
    let open = lines
        .iter()
        .position(|(_, line)| line.contains("```prompt"))
        .or_else(|| lines.iter().position(|(_, line)| line.trim_start().starts_with("```")))
        .or_else(|| lines.iter().position(|(_, line)| line.contains("```")))?;
    let body_start = lines.get(open + 1).map_or(raw.len(), |(start, _)| *start);

    let mut depth = 0usize;
    for (start, line) in &lines[open + 1..] {
        let trimmed = line.trim();
        if trimmed == "```" {
            if depth == 0 {
                return Some(&raw[body_start..*start]);
            }
            depth -= 1;
        } else if trimmed.starts_with("```") {
            depth += 1;
        } else if depth == 0 && trimmed.ends_with("```") {
            // Closing ticks glued to the last line of content.
            if let Some(end) = line.rfind("```") {
                return Some(&raw[body_start..start + end]);
            }
        }
    }
    Some(&raw[body_start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CandidateArtifact {
        CandidateArtifact::new("classifier")
            .with_message(Message::system("You label sentiment."))
            .with_message(Message::user("Text: {text}"))
    }

    #[test]
    fn dump_then_parse_keeps_messages() {
        let artifact = sample();
        let parsed = CandidateArtifact::parse(&artifact.dump()).unwrap();
        assert_eq!(parsed.messages, artifact.messages);
    }

    #[test]
    fn parse_accepts_inline_header_content() {
        let parsed = CandidateArtifact::parse("preamble\nSystem: be brief\nuser:\nhi\nthere").unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0], Message::system("be brief"));
        assert_eq!(parsed.messages[1].content, "hi\nthere");
    }

    #[test]
    fn parse_rejects_text_without_messages() {
        assert!(matches!(
            CandidateArtifact::parse("just some words"),
            Err(PwError::Parse { .. })
        ));
        assert!(CandidateArtifact::parse("system:\n   \nuser:\n").is_err());
    }

    #[test]
    fn fenced_prompt_block_is_preferred() {
        let raw = "Here you go:\n```json\n{}\n```\n```prompt\nsystem:\nBe precise.\n```\nDone.";
        let parsed = CandidateArtifact::from_fenced_text(raw).unwrap();
        assert_eq!(parsed.messages, vec![Message::system("Be precise.")]);
    }

    #[test]
    fn any_fence_is_accepted() {
        let raw = "```\nuser:\nSummarize {doc}\n```";
        let parsed = CandidateArtifact::from_fenced_text(raw).unwrap();
        assert_eq!(parsed.messages[0].role, Role::User);
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let raw = "```prompt\nsystem:\ntruncated output";
        let parsed = CandidateArtifact::from_fenced_text(raw).unwrap();
        assert_eq!(parsed.messages[0].content, "truncated output");
    }

    #[test]
    fn inner_code_fence_stays_in_the_artifact() {
        let raw = "```prompt\nsystem:\nAnswer as JSON, e.g.\n```json\n{\"label\": \"pos\"}\n```\n\nuser:\nText: {text}\n```\nTrailing remarks.";
        let parsed = CandidateArtifact::from_fenced_text(raw).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(
            parsed.messages[0].content,
            "Answer as JSON, e.g.\n```json\n{\"label\": \"pos\"}\n```"
        );
        assert_eq!(parsed.messages[1], Message::user("Text: {text}"));
    }

    #[test]
    fn closing_ticks_on_content_line() {
        let parsed = CandidateArtifact::from_fenced_text("```prompt\nsystem:\nBe brief.```").unwrap();
        assert_eq!(parsed.messages, vec![Message::system("Be brief.")]);
    }

    #[test]
    fn header_lookalikes_stay_in_content() {
        let text = "system:\nUsers: may write anything.\n  user: quoted turn\nThe user: asks a question\nsystemic: not a header";
        let parsed = CandidateArtifact::parse(text).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].content.lines().count(), 4);
    }

    #[test]
    fn unindented_header_starts_a_new_message() {
        let parsed = CandidateArtifact::parse("system:\nRules follow.\nUSER: hello").unwrap();
        assert_eq!(
            parsed.messages,
            vec![Message::system("Rules follow."), Message::user("hello")]
        );
    }

    #[test]
    fn fenced_dump_parses_back_with_inner_fence() {
        let artifact = CandidateArtifact::new("json")
            .with_message(Message::system("Reply like:\n```json\n{}\n```"))
            .with_message(Message::user("{text}"));
        let raw = format!("```prompt\n{}\n```", artifact.dump());
        let parsed = CandidateArtifact::from_fenced_text(&raw).unwrap();
        assert_eq!(parsed.messages, artifact.messages);
    }

    #[test]
    fn missing_fence_is_a_parse_error() {
        let err = CandidateArtifact::from_fenced_text("system:\nno fence here").unwrap_err();
        assert!(err.to_string().contains("no fenced artifact"));
    }

    #[test]
    fn response_format_description() {
        let schema = ResponseFormat::JsonSchema {
            json_schema: JsonSchemaSpec {
                name: "answer".into(),
                schema: json!({"type": "object"}),
                strict: true,
            },
        };
        assert_eq!(schema.describe(), r#"{"type":"object"}"#);
        assert_eq!(ResponseFormat::JsonObject.describe(), "json_object");
        assert_eq!(describe_response_format(None), "none");
    }

    #[test]
    fn response_format_serde_tag() {
        let value = serde_json::to_value(ResponseFormat::JsonObject).unwrap();
        assert_eq!(value, json!({"type": "json_object"}));
        let back: ResponseFormat = serde_json::from_value(json!({"type": "text"})).unwrap();
        assert_eq!(back, ResponseFormat::Text);
    }

    #[test]
    fn json_lines_serialization() {
        let lines = sample().messages_as_json_lines();
        let first = lines.lines().next().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(first).unwrap(),
            json!({"role": "system", "content": "You label sentiment."})
        );
    }

    #[test]
    fn has_content_ignores_whitespace() {
        assert!(sample().has_content());
        let blank = CandidateArtifact::new("blank").with_message(Message::user("  "));
        assert!(!blank.has_content());
    }
}
