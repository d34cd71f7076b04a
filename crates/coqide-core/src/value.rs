//! In-memory model of everything the prover protocol can carry.

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

use crate::xml::Element;

/// Opaque position in the prover's elaboration timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u64);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wire-transmissible datum.
///
/// Each variant maps to exactly one wire tag; see [`crate::codec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    String(String),
    Int(i64),
    StateId(StateId),
    List(Vec<Value>),
    Option(Option<Box<Value>>),
    Pair(Box<Value>, Box<Value>),
    /// Left arm of a `union`.
    InL(Box<Value>),
    /// Right arm of a `union`.
    InR(Box<Value>),
    OptionState(Box<OptionState>),
    OptionValue(OptionValue),
    Status(Status),
    Goals(Box<GoalSet>),
    Goal(Box<Goal>),
    Evar(Box<Value>),
    /// Marked-up text reduced to its plain characters.
    RichText(String),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    #[must_use]
    pub fn pair(a: Self, b: Self) -> Self {
        Self::Pair(Box::new(a), Box::new(b))
    }

    #[must_use]
    pub fn some(v: Self) -> Self {
        Self::Option(Some(Box::new(v)))
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::Option(None)
    }

    #[must_use]
    pub const fn as_state_id(&self) -> Option<StateId> {
        match self {
            Self::StateId(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pair(&self) -> Option<(&Self, &Self)> {
        match self {
            Self::Pair(a, b) => Some((&**a, &**b)),
            _ => None,
        }
    }

    /// Text content of a string or rich-text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::RichText(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Goal set carried by a `Goal` reply, which wraps it in an option.
    #[must_use]
    pub fn as_goals(&self) -> Option<&GoalSet> {
        match self {
            Self::Goals(goals) => Some(&**goals),
            Self::Option(Some(inner)) => inner.as_goals(),
            _ => None,
        }
    }
}

/// Value of a prover option, tagged the way the wire tags it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionValue {
    Int(Option<i64>),
    String(String),
    StringOpt(Option<String>),
    Bool(bool),
}

/// Description of a prover option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionState {
    pub sync: bool,
    pub deprecated: bool,
    pub name: String,
    pub value: OptionValue,
}

/// Prover status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub path: Vec<String>,
    pub proof_name: Option<String>,
    pub all_proofs: Vec<String>,
    pub proof_index: i64,
}

/// A single proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub hypotheses: Vec<Value>,
    pub conclusion: Value,
}

impl Goal {
    /// Hypotheses followed by a separator line and the conclusion.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for hyp in &self.hypotheses {
            out.push_str(hyp.as_text().unwrap_or_default());
            out.push('\n');
        }
        out.push_str("============================\n");
        out.push_str(self.conclusion.as_text().unwrap_or_default());
        out
    }
}

/// Open obligations partitioned by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSet {
    pub foreground: Vec<Goal>,
    /// Focus stack: goals before and after each unfocused position.
    pub background: Vec<(Vec<Goal>, Vec<Goal>)>,
    pub shelved: Vec<Goal>,
    pub given_up: Vec<Goal>,
}

impl GoalSet {
    /// Background goals in focus-stack order.
    pub fn background_goals(&self) -> impl Iterator<Item = &Goal> {
        self.background
            .iter()
            .flat_map(|(before, after)| before.iter().chain(after))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty()
            && self.background_goals().next().is_none()
            && self.shelved.is_empty()
            && self.given_up.is_empty()
    }
}

/// One call's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success {
        value: Value,
        /// Messages the prover emitted while answering, blank-line separated.
        messages: Option<String>,
    },
    Failure(Failure),
}

impl Response {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Attach collected messages. Failures keep no messages.
    #[must_use]
    pub fn with_messages(self, collected: Vec<String>) -> Self {
        match self {
            Self::Success { value, messages } if !collected.is_empty() => {
                let mut parts: Vec<String> = messages.into_iter().collect();
                parts.extend(collected);
                Self::Success {
                    value,
                    messages: Some(parts.join("\n\n")),
                }
            }
            other => other,
        }
    }
}

/// A well-formed failure reported by the prover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Last state the prover still considers valid.
    pub state: Option<StateId>,
    /// Character range of the error inside the offending command.
    pub location: Option<Range<usize>>,
    pub message: FailureMessage,
}

/// Failure text, as rich text or as the raw reply when none was attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMessage {
    Rich(String),
    Raw(Element),
}

impl FailureMessage {
    /// Human-readable text. Raw replies lose their state identifiers.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Rich(text) => text.clone(),
            Self::Raw(doc) => doc.without("state_id").to_markup(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message.render())
    }
}

/// Severity attached to a prover message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Other(String),
}

impl MessageLevel {
    #[must_use]
    pub fn from_wire(level: &str) -> Self {
        match level {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "notice" => Self::Notice,
            "warning" => Self::Warning,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A message the prover printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

/// Asynchronous output that is not the answer to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Message(Message),
    Feedback {
        state: Option<StateId>,
        /// The `feedback_content` tag value, e.g. `processed`.
        content: String,
        message: Option<Message>,
    },
}

impl Notification {
    /// The message carried by this notification, if any.
    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Feedback { message, .. } => message.as_ref(),
        }
    }

    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 32;
        match self {
            Self::Message(m) => m.text.len() + OVERHEAD,
            Self::Feedback {
                content, message, ..
            } => content.len() + message.as_ref().map_or(0, |m| m.text.len()) + OVERHEAD,
        }
    }
}
