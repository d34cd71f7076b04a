//! Wire codec for the prover's XML protocol.
//!
//! Calls go out as `<call val="Method">value</call>`. Replies come back as a
//! stream of top-level elements: any number of `<message>`/`<feedback>`
//! notifications followed by exactly one `<value>` per call.

use std::{borrow::Cow, fmt, io};

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::value::{
    Failure, FailureMessage, Goal, GoalSet, Message, MessageLevel, Notification, OptionState,
    OptionValue, Response, StateId, Status, Value,
};
use crate::xml::{self, Element, XmlError};

/// Entity spellings the prover emits that are not part of XML.
const PROVER_ENTITIES: [(&str, &str); 4] = [
    ("&nbsp;", " "),
    ("&apos;", "'"),
    ("&#40;", "("),
    ("&#41;", ")"),
];

/// Decode error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed markup: {0}")]
    Xml(#[from] XmlError),
    #[error("unrecognized tag <{0}>")]
    UnknownTag(String),
    #[error("<{tag}> should contain {expected}")]
    UnexpectedShape { tag: String, expected: &'static str },
    #[error("<value> carries unknown status {0:?}")]
    UnknownReplyStatus(Option<String>),
    #[error("<{tag}> has invalid {attr} attribute {value:?}")]
    BadAttribute {
        tag: String,
        attr: &'static str,
        value: Option<String>,
    },
    #[error("invalid integer {0:?}")]
    InvalidInt(String),
}

/// Which kind of top-level element failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A `<value>` answering a call.
    Reply,
    /// A `<message>` or `<feedback>`.
    Notification,
    /// Any other tag, a stray closing tag or text outside markup.
    Unknown,
}

impl FrameKind {
    fn of(tag: &str) -> Self {
        match tag {
            "value" => Self::Reply,
            "message" | "feedback" => Self::Notification,
            _ => Self::Unknown,
        }
    }

    /// Kind of the element whose start tag begins `raw`.
    fn leading(raw: &[u8]) -> Self {
        let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
        let Some(rest) = raw[start..].strip_prefix(b"<") else {
            return Self::Unknown;
        };
        let len = rest
            .iter()
            .position(|b| !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')))
            .unwrap_or(rest.len());
        std::str::from_utf8(&rest[..len]).map_or(Self::Unknown, Self::of)
    }
}

/// A frame that could not be decoded, tagged with what it was meant to be.
///
/// Only a broken [`FrameKind::Reply`] stands in for the reply to a call;
/// anything else can be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("undecodable {kind:?} frame: {error}")]
pub struct FrameError {
    pub kind: FrameKind,
    #[source]
    pub error: CodecError,
}

impl FrameError {
    fn new(kind: FrameKind, error: impl Into<CodecError>) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }

    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self.kind, FrameKind::Reply)
    }
}

/// Protocol methods this client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Init,
    Add,
    EditAt,
    Query,
    Goal,
    Status,
}

impl Method {
    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Add => "Add",
            Self::EditAt => "Edit_at",
            Self::Query => "Query",
            Self::Goal => "Goal",
            Self::Status => "Status",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete top-level element read from the prover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Reply(Response),
    Notification(Notification),
}

/// Outcome of decoding an accumulated fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The terminal `<value>` has not fully arrived yet.
    Incomplete,
    Complete(Response),
}

// --- Encoding ---

/// Encode a call.
#[must_use]
pub fn encode_call(method: &str, arg: &Value) -> Vec<u8> {
    let mut out = String::from("<call val=\"");
    out.push_str(&xml::escape(method));
    out.push_str("\">");
    write_value(&mut out, arg);
    out.push_str("</call>");
    out.into_bytes()
}

/// Encode a single value.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn open(out: &mut String, tag: &str, val: Option<&str>) {
    out.push('<');
    out.push_str(tag);
    if let Some(val) = val {
        out.push_str(" val=\"");
        out.push_str(&xml::escape(val));
        out.push('"');
    }
    out.push('>');
}

fn close(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn empty(out: &mut String, tag: &str, val: Option<&str>) {
    open(out, tag, val);
    out.pop();
    out.push_str("/>");
}

fn text_element(out: &mut String, tag: &str, text: &str) {
    open(out, tag, None);
    out.push_str(&xml::escape(text));
    close(out, tag);
}

fn wrap(out: &mut String, tag: &str, val: Option<&str>, body: impl FnOnce(&mut String)) {
    open(out, tag, val);
    body(out);
    close(out, tag);
}

fn write_list<T>(out: &mut String, items: &[T], mut item: impl FnMut(&mut String, &T)) {
    wrap(out, "list", None, |out| {
        for it in items {
            item(out, it);
        }
    });
}

fn write_option<T: ?Sized>(
    out: &mut String,
    opt: Option<&T>,
    item: impl FnOnce(&mut String, &T),
) {
    match opt {
        None => empty(out, "option", Some("none")),
        Some(v) => wrap(out, "option", Some("some"), |out| item(out, v)),
    }
}

fn write_string(out: &mut String, s: &str) {
    text_element(out, "string", s);
}

fn write_int(out: &mut String, n: i64) {
    text_element(out, "int", &n.to_string());
}

fn write_strings(out: &mut String, items: &[String]) {
    write_list(out, items, |out, s| write_string(out, s));
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Unit => empty(out, "unit", None),
        Value::Bool(b) => empty(out, "bool", Some(if *b { "true" } else { "false" })),
        Value::String(s) => write_string(out, s),
        Value::Int(n) => write_int(out, *n),
        Value::StateId(id) => empty(out, "state_id", Some(&id.0.to_string())),
        Value::List(items) => write_list(out, items, write_value),
        Value::Option(opt) => write_option(out, opt.as_deref(), write_value),
        Value::Pair(a, b) => wrap(out, "pair", None, |out| {
            write_value(out, a);
            write_value(out, b);
        }),
        Value::InL(v) => wrap(out, "union", Some("in_l"), |out| write_value(out, v)),
        Value::InR(v) => wrap(out, "union", Some("in_r"), |out| write_value(out, v)),
        Value::OptionState(state) => wrap(out, "option_state", None, |out| {
            empty(out, "bool", Some(if state.sync { "true" } else { "false" }));
            empty(out, "bool", Some(if state.deprecated { "true" } else { "false" }));
            write_string(out, &state.name);
            write_option_value(out, &state.value);
        }),
        Value::OptionValue(v) => write_option_value(out, v),
        Value::Status(status) => wrap(out, "status", None, |out| {
            write_strings(out, &status.path);
            write_option(out, status.proof_name.as_deref(), write_string);
            write_strings(out, &status.all_proofs);
            write_int(out, status.proof_index);
        }),
        Value::Goals(goals) => wrap(out, "goals", None, |out| {
            write_list(out, &goals.foreground, write_goal);
            write_list(out, &goals.background, |out, (before, after)| {
                wrap(out, "pair", None, |out| {
                    write_list(out, before, write_goal);
                    write_list(out, after, write_goal);
                });
            });
            write_list(out, &goals.shelved, write_goal);
            write_list(out, &goals.given_up, write_goal);
        }),
        Value::Goal(goal) => write_goal(out, goal),
        Value::Evar(info) => wrap(out, "evar", None, |out| write_value(out, info)),
        Value::RichText(text) => wrap(out, "richpp", None, |out| text_element(out, "_", text)),
    }
}

fn write_goal(out: &mut String, goal: &Goal) {
    wrap(out, "goal", None, |out| {
        write_string(out, &goal.id);
        write_list(out, &goal.hypotheses, write_value);
        write_value(out, &goal.conclusion);
    });
}

fn write_option_value(out: &mut String, value: &OptionValue) {
    match value {
        OptionValue::Int(n) => wrap(out, "option_value", Some("intvalue"), |out| {
            write_option(out, n.as_ref(), |out, n| write_int(out, *n));
        }),
        OptionValue::String(s) => wrap(out, "option_value", Some("stringvalue"), |out| {
            write_string(out, s);
        }),
        OptionValue::StringOpt(s) => wrap(out, "option_value", Some("stringoptvalue"), |out| {
            write_option(out, s.as_deref(), write_string);
        }),
        OptionValue::Bool(b) => wrap(out, "option_value", Some("boolvalue"), |out| {
            empty(out, "bool", Some(if *b { "true" } else { "false" }));
        }),
    }
}

// --- Decoding ---

/// Replace the prover's non-standard entity spellings with literal characters.
#[must_use]
pub fn unescape_entities(src: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(src);
    for (entity, literal) in PROVER_ENTITIES {
        if out.contains(entity) {
            out = Cow::Owned(out.replace(entity, literal));
        }
    }
    out
}

/// Take the next complete element off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the element is still
/// incomplete. When the markup can never become an element, the bytes up to
/// the next start of a tag are dropped, so whatever follows in the same chunk
/// is still read.
fn take_element(buf: &mut BytesMut) -> Result<Option<Element>, FrameError> {
    let range = match xml::frame_end(buf) {
        Ok(Some(range)) => range,
        Ok(None) => return Ok(None),
        Err(e) => {
            let kind = FrameKind::leading(buf);
            resync(buf);
            return Err(FrameError::new(kind, e));
        }
    };
    let raw = buf.split_to(range.end);
    let raw = &raw[range.start..];
    let text = std::str::from_utf8(raw).map_err(|e| {
        FrameError::new(
            FrameKind::leading(raw),
            XmlError::InvalidUtf8(range.start + e.valid_up_to()),
        )
    })?;
    xml::parse(&unescape_entities(text))
        .map(Some)
        .map_err(|e| FrameError::new(FrameKind::leading(raw), e))
}

fn resync(buf: &mut BytesMut) {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    // Step over the start tag that failed, or up to the first one after text.
    let from = if buf.get(start) == Some(&b'<') {
        start + 1
    } else {
        start
    };
    let skip = buf[from..]
        .iter()
        .position(|&b| b == b'<')
        .map_or(buf.len(), |at| from + at);
    tracing::trace!(bytes = skip, "Dropping unframeable prover output");
    buf.advance(skip);
}

/// Decode the next frame from a streaming buffer.
///
/// Complete frames are consumed from `buf`. A malformed frame is consumed
/// too, so the caller can keep reading after reporting it.
///
/// # Errors
/// Returns an error, tagged with the frame's kind, when a complete element
/// is not a valid frame or the markup is broken.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    let Some(element) = take_element(buf)? else {
        return Ok(None);
    };
    let frame = match element.name.as_str() {
        "value" => decode_reply(&element).map(Frame::Reply),
        "message" => decode_message(&element).map(|m| Frame::Notification(Notification::Message(m))),
        "feedback" => decode_feedback(&element).map(Frame::Notification),
        other => Err(CodecError::UnknownTag(other.to_owned())),
    };
    frame
        .map(Some)
        .map_err(|e| FrameError::new(FrameKind::of(&element.name), e))
}

/// [`Decoder`] over [`decode_frame`], for reading a prover's output with
/// `FramedRead`.
///
/// Undecodable frames are yielded as items rather than decoder errors, since
/// `FramedRead` ends the stream after a decoder error. The decoder itself
/// only fails on I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Result<Frame, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src).transpose())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let item = self.decode(src)?;
        if item.is_none() && !src.is_empty() {
            tracing::debug!(bytes = src.len(), "Dropping unterminated output at end of stream");
            src.clear();
        }
        Ok(item)
    }
}

/// Decode an accumulated fragment into the response it answers.
///
/// Messages preceding the `<value>` are merged into a success.
///
/// # Errors
/// Returns an error when the fragment contains a malformed frame.
pub fn decode_response(fragment: &[u8]) -> Result<Decoded, CodecError> {
    let mut buf = BytesMut::from(fragment);
    let mut messages = Vec::new();
    loop {
        match decode_frame(&mut buf).map_err(|e| e.error)? {
            None => return Ok(Decoded::Incomplete),
            Some(Frame::Notification(note)) => {
                if let Some(m) = note.message() {
                    messages.push(m.text.clone());
                }
            }
            Some(Frame::Reply(response)) => {
                return Ok(Decoded::Complete(response.with_messages(messages)));
            }
        }
    }
}

/// Take the next call off the front of `buf`.
///
/// This is the prover's side of [`encode_call`].
///
/// # Errors
/// Returns an error when a complete element is not a valid call.
pub fn take_call(buf: &mut BytesMut) -> Result<Option<(String, Value)>, CodecError> {
    let Some(element) = take_element(buf).map_err(|e| e.error)? else {
        return Ok(None);
    };
    if element.name != "call" {
        return Err(CodecError::UnknownTag(element.name));
    }
    let method = element
        .attr("val")
        .ok_or_else(|| bad_attr(&element, "val"))?
        .to_owned();
    let [arg] = children::<1>(&element, "one argument")?;
    Ok(Some((method, decode_value(arg)?)))
}

/// Decode a single complete call.
///
/// # Errors
/// Returns an error when `wire` is not exactly one valid call.
pub fn decode_call(wire: &[u8]) -> Result<(String, Value), CodecError> {
    let mut buf = BytesMut::from(wire);
    let call = take_call(&mut buf)?.ok_or(CodecError::Xml(XmlError::UnexpectedEof))?;
    if let Some(pos) = buf.iter().position(|b| !b.is_ascii_whitespace()) {
        return Err(CodecError::Xml(XmlError::StrayText(wire.len() - buf.len() + pos)));
    }
    Ok(call)
}

fn bad_attr(el: &Element, attr: &'static str) -> CodecError {
    CodecError::BadAttribute {
        tag: el.name.clone(),
        attr,
        value: el.attr(attr).map(str::to_owned),
    }
}

fn shape(el: &Element, expected: &'static str) -> CodecError {
    CodecError::UnexpectedShape {
        tag: el.name.clone(),
        expected,
    }
}

fn children<'a, const N: usize>(
    el: &'a Element,
    expected: &'static str,
) -> Result<[&'a Element; N], CodecError> {
    let kids: Vec<&Element> = el.elements().collect();
    kids.try_into().map_err(|_| shape(el, expected))
}

fn parse_int<T: std::str::FromStr>(text: &str) -> Result<T, CodecError> {
    text.trim()
        .parse()
        .map_err(|_| CodecError::InvalidInt(text.to_owned()))
}

/// Decode one value element.
///
/// # Errors
/// Returns an error for unknown tags and for children that do not match
/// what the tag requires.
pub fn decode_value(el: &Element) -> Result<Value, CodecError> {
    let value = match el.name.as_str() {
        "unit" => Value::Unit,
        "bool" => Value::Bool(decode_bool(el)?),
        "string" => Value::String(el.text()),
        "int" => Value::Int(parse_int(&el.text())?),
        "state_id" => Value::StateId(decode_state_id(el)?),
        "list" => Value::List(el.elements().map(decode_value).collect::<Result<_, _>>()?),
        "option" => match el.attr("val") {
            Some("none") => Value::Option(None),
            Some("some") => {
                let [inner] = children::<1>(el, "one value")?;
                Value::some(decode_value(inner)?)
            }
            _ => return Err(bad_attr(el, "val")),
        },
        "pair" => {
            let [a, b] = children::<2>(el, "two values")?;
            Value::pair(decode_value(a)?, decode_value(b)?)
        }
        "union" => {
            let [inner] = children::<1>(el, "one value")?;
            let inner = Box::new(decode_value(inner)?);
            match el.attr("val") {
                Some("in_l") => Value::InL(inner),
                Some("in_r") => Value::InR(inner),
                _ => return Err(bad_attr(el, "val")),
            }
        }
        "option_state" => {
            let [sync, deprecated, name, value] = children::<4>(el, "bool, bool, string, option_value")?;
            Value::OptionState(Box::new(OptionState {
                sync: decode_bool(sync)?,
                deprecated: decode_bool(deprecated)?,
                name: decode_string(name)?,
                value: decode_option_value(value)?,
            }))
        }
        "option_value" => Value::OptionValue(decode_option_value(el)?),
        "status" => {
            let [path, proof_name, all_proofs, index] =
                children::<4>(el, "list, option, list, int")?;
            Value::Status(Status {
                path: decode_list(path, decode_string)?,
                proof_name: decode_option(proof_name, decode_string)?,
                all_proofs: decode_list(all_proofs, decode_string)?,
                proof_index: decode_int(index)?,
            })
        }
        "goals" => Value::Goals(Box::new(decode_goals(el)?)),
        "goal" => Value::Goal(Box::new(decode_goal(el)?)),
        "evar" => {
            let [info] = children::<1>(el, "one value")?;
            Value::Evar(Box::new(decode_value(info)?))
        }
        "richpp" | "xml" => Value::RichText(el.text()),
        other => return Err(CodecError::UnknownTag(other.to_owned())),
    };
    Ok(value)
}

fn decode_bool(el: &Element) -> Result<bool, CodecError> {
    if el.name != "bool" {
        return Err(shape(el, "a bool"));
    }
    match el.attr("val") {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(bad_attr(el, "val")),
    }
}

fn decode_state_id(el: &Element) -> Result<StateId, CodecError> {
    let raw = el.attr("val").ok_or_else(|| bad_attr(el, "val"))?;
    parse_int(raw).map(StateId)
}

fn decode_string(el: &Element) -> Result<String, CodecError> {
    match el.name.as_str() {
        "string" => Ok(el.text()),
        _ => Err(shape(el, "a string")),
    }
}

fn decode_int(el: &Element) -> Result<i64, CodecError> {
    match el.name.as_str() {
        "int" => parse_int(&el.text()),
        _ => Err(shape(el, "an int")),
    }
}

fn decode_list<T>(
    el: &Element,
    item: impl Fn(&Element) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    if el.name != "list" {
        return Err(shape(el, "a list"));
    }
    el.elements().map(item).collect()
}

fn decode_option<T>(
    el: &Element,
    item: impl FnOnce(&Element) -> Result<T, CodecError>,
) -> Result<Option<T>, CodecError> {
    if el.name != "option" {
        return Err(shape(el, "an option"));
    }
    match el.attr("val") {
        Some("none") => Ok(None),
        Some("some") => {
            let [inner] = children::<1>(el, "one value")?;
            item(inner).map(Some)
        }
        _ => Err(bad_attr(el, "val")),
    }
}

fn decode_option_value(el: &Element) -> Result<OptionValue, CodecError> {
    if el.name != "option_value" {
        return Err(shape(el, "an option_value"));
    }
    let [inner] = children::<1>(el, "one value")?;
    match el.attr("val") {
        Some("intvalue") => decode_option(inner, decode_int).map(OptionValue::Int),
        Some("stringvalue") => decode_string(inner).map(OptionValue::String),
        Some("stringoptvalue") => decode_option(inner, decode_string).map(OptionValue::StringOpt),
        Some("boolvalue") => decode_bool(inner).map(OptionValue::Bool),
        _ => Err(bad_attr(el, "val")),
    }
}

fn decode_goal(el: &Element) -> Result<Goal, CodecError> {
    if el.name != "goal" {
        return Err(shape(el, "a goal"));
    }
    let [id, hypotheses, conclusion] = children::<3>(el, "string, list, value")?;
    Ok(Goal {
        id: decode_string(id)?,
        hypotheses: decode_list(hypotheses, decode_value)?,
        conclusion: decode_value(conclusion)?,
    })
}

fn decode_goals(el: &Element) -> Result<GoalSet, CodecError> {
    let [foreground, background, shelved, given_up] = children::<4>(el, "four lists")?;
    Ok(GoalSet {
        foreground: decode_list(foreground, decode_goal)?,
        background: decode_list(background, decode_focus_frame)?,
        shelved: decode_list(shelved, decode_goal)?,
        given_up: decode_list(given_up, decode_goal)?,
    })
}

fn decode_focus_frame(el: &Element) -> Result<(Vec<Goal>, Vec<Goal>), CodecError> {
    if el.name != "pair" {
        return Err(shape(el, "a pair of goal lists"));
    }
    let [before, after] = children::<2>(el, "two goal lists")?;
    Ok((decode_list(before, decode_goal)?, decode_list(after, decode_goal)?))
}

fn decode_reply(el: &Element) -> Result<Response, CodecError> {
    match el.attr("val") {
        Some("good") => {
            let [value] = children::<1>(el, "one value")?;
            Ok(Response::Success {
                value: decode_value(value)?,
                messages: None,
            })
        }
        Some("fail") => Ok(Response::Failure(decode_failure(el)?)),
        other => Err(CodecError::UnknownReplyStatus(other.map(str::to_owned))),
    }
}

fn decode_failure(el: &Element) -> Result<Failure, CodecError> {
    let state = el.find("state_id").map(decode_state_id).transpose()?;
    let location = match (el.attr("loc_s"), el.attr("loc_e")) {
        (Some(start), Some(end)) => Some(parse_int(start)?..parse_int(end)?),
        _ => None,
    };
    let message = match el.find("richpp") {
        Some(rich) => FailureMessage::Rich(rich.text()),
        None => {
            tracing::debug!("failure reply carries no rich text, keeping raw document");
            FailureMessage::Raw(el.clone())
        }
    };
    Ok(Failure {
        state,
        location,
        message,
    })
}

fn decode_message(el: &Element) -> Result<Message, CodecError> {
    let level = el
        .find("message_level")
        .and_then(|l| l.attr("val"))
        .map_or(MessageLevel::Notice, MessageLevel::from_wire);
    // The text is the last child; older provers omit the location in between.
    let text = el
        .elements()
        .last()
        .filter(|last| last.name != "message_level")
        .ok_or_else(|| shape(el, "a level and a text"))?;
    Ok(Message {
        level,
        text: text.text(),
    })
}

fn decode_feedback(el: &Element) -> Result<Notification, CodecError> {
    let state = el.find("state_id").map(decode_state_id).transpose()?;
    let content = el
        .find("feedback_content")
        .ok_or_else(|| shape(el, "a feedback_content"))?;
    let message = content.find("message").map(decode_message).transpose()?;
    Ok(Notification::Feedback {
        state,
        content: content.attr("val").unwrap_or_default().to_owned(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(id: &str, concl: &str) -> Goal {
        Goal {
            id: id.into(),
            hypotheses: vec![Value::RichText("H : P".into())],
            conclusion: Value::RichText(concl.into()),
        }
    }

    fn decode_one(wire: &str) -> Result<Value, CodecError> {
        let el = xml::parse(wire)?;
        decode_value(&el)
    }

    fn reply(wire: &str) -> Response {
        match decode_response(wire.as_bytes()).unwrap() {
            Decoded::Complete(r) => r,
            Decoded::Incomplete => panic!("expected a complete reply"),
        }
    }

    #[test]
    fn every_constructor_round_trips() {
        let samples = vec![
            Value::Unit,
            Value::Bool(true),
            Value::Bool(false),
            Value::string("Lemma foo : 1 < 2 & \"x\"."),
            Value::string(""),
            Value::Int(-1),
            Value::StateId(StateId(42)),
            Value::List(vec![Value::Int(1), Value::string("two")]),
            Value::List(vec![]),
            Value::none(),
            Value::some(Value::Unit),
            Value::pair(
                Value::pair(Value::string("Proof."), Value::Int(-1)),
                Value::pair(Value::StateId(StateId(3)), Value::Bool(true)),
            ),
            Value::InL(Box::new(Value::Unit)),
            Value::InR(Box::new(Value::string("focus"))),
            Value::OptionState(Box::new(OptionState {
                sync: true,
                deprecated: false,
                name: "Printing Width".into(),
                value: OptionValue::Int(Some(80)),
            })),
            Value::OptionValue(OptionValue::Int(None)),
            Value::OptionValue(OptionValue::String("s".into())),
            Value::OptionValue(OptionValue::StringOpt(Some("o".into()))),
            Value::OptionValue(OptionValue::Bool(false)),
            Value::Status(Status {
                path: vec!["Top".into()],
                proof_name: Some("foo".into()),
                all_proofs: vec!["foo".into(), "bar".into()],
                proof_index: 2,
            }),
            Value::Goals(Box::new(GoalSet {
                foreground: vec![goal("1", "True")],
                background: vec![(vec![goal("2", "A")], vec![goal("3", "B")])],
                shelved: vec![],
                given_up: vec![goal("4", "C")],
            })),
            Value::Goal(Box::new(goal("9", "x = x"))),
            Value::Evar(Box::new(Value::string("?x"))),
            Value::RichText("forall n, n + 0 = n".into()),
        ];
        for value in samples {
            let wire = encode_value(&value);
            assert_eq!(decode_one(&wire), Ok(value), "wire: {wire}");
        }
    }

    #[test]
    fn call_encoding_matches_protocol() {
        let wire = encode_call("Edit_at", &Value::StateId(StateId(1)));
        assert_eq!(wire, b"<call val=\"Edit_at\"><state_id val=\"1\"/></call>");

        let wire = encode_call("Init", &Value::none());
        assert_eq!(wire, b"<call val=\"Init\"><option val=\"none\"/></call>");
    }

    #[test]
    fn calls_decode_on_the_prover_side() {
        let arg = Value::pair(Value::string("Check nat."), Value::StateId(StateId(5)));
        let mut buf = BytesMut::from(&encode_call("Query", &arg)[..]);
        buf.extend_from_slice(b"<call val=\"Goal\">");
        assert_eq!(take_call(&mut buf), Ok(Some(("Query".into(), arg))));
        assert_eq!(take_call(&mut buf), Ok(None));
        assert_eq!(&buf[..], b"<call val=\"Goal\">");
    }

    #[test]
    fn decode_call_wants_exactly_one_call() {
        let wire = encode_call("Status", &Value::Bool(false));
        assert_eq!(decode_call(&wire), Ok(("Status".into(), Value::Bool(false))));

        let mut doubled = wire.clone();
        doubled.extend_from_slice(&wire);
        assert!(matches!(
            decode_call(&doubled),
            Err(CodecError::Xml(XmlError::StrayText(_)))
        ));
        assert_eq!(
            decode_call(&wire[..wire.len() - 1]),
            Err(CodecError::Xml(XmlError::UnexpectedEof))
        );
    }

    #[test]
    fn prover_entities_are_unescaped_before_parsing() {
        let r = reply(
            "<value val=\"good\"><string>f&nbsp;&#40;x&#41;&nbsp;:=&nbsp;&apos;a&apos; &amp; b</string></value>",
        );
        assert_eq!(r.value(), Some(&Value::string("f (x) := 'a' & b")));
    }

    #[test]
    fn every_strict_prefix_is_incomplete() {
        let stream = concat!(
            "<message><message_level val=\"notice\"/><option val=\"none\"/>",
            "<richpp><_>nat&nbsp;:&nbsp;Set</_></richpp></message>\n",
            "<feedback object=\"state\" route=\"0\"><state_id val=\"2\"/>",
            "<feedback_content val=\"processed\"/></feedback>",
            "<value val=\"good\"><pair><state_id val=\"3\"/>",
            "<pair><union val=\"in_l\"><unit/></union><string></string></pair></pair></value>",
        )
        .as_bytes();
        for cut in 0..stream.len() {
            assert_eq!(
                decode_response(&stream[..cut]),
                Ok(Decoded::Incomplete),
                "prefix of length {cut}"
            );
        }
        let Decoded::Complete(Response::Success { value, messages }) =
            decode_response(stream).unwrap()
        else {
            panic!("expected success");
        };
        assert_eq!(messages.as_deref(), Some("nat : Set"));
        assert_eq!(
            value.as_pair().and_then(|(id, _)| id.as_state_id()),
            Some(StateId(3))
        );
    }

    #[test]
    fn messages_are_joined_in_arrival_order() {
        let r = reply(concat!(
            "<message><message_level val=\"info\"/><richpp><_>one</_></richpp></message>",
            "<feedback object=\"state\" route=\"0\"><state_id val=\"1\"/>",
            "<feedback_content val=\"message\"><message><message_level val=\"notice\"/>",
            "<option val=\"none\"/><richpp><_>two</_></richpp></message></feedback_content></feedback>",
            "<value val=\"good\"><unit/></value>",
        ));
        assert_eq!(
            r,
            Response::Success {
                value: Value::Unit,
                messages: Some("one\n\ntwo".into()),
            }
        );
    }

    #[test]
    fn failure_prefers_rich_text() {
        let r = reply(concat!(
            "<message><message_level val=\"info\"/><richpp><_>ignored</_></richpp></message>",
            "<value val=\"fail\" loc_s=\"4\" loc_e=\"9\"><state_id val=\"7\"/>",
            "<richpp><_>The reference <i>foo</i> was not found.</_></richpp></value>",
        ));
        assert_eq!(
            r,
            Response::Failure(Failure {
                state: Some(StateId(7)),
                location: Some(4..9),
                message: FailureMessage::Rich("The reference foo was not found.".into()),
            })
        );
    }

    #[test]
    fn failure_without_rich_text_keeps_raw_document() {
        let Response::Failure(failure) =
            reply("<value val=\"fail\"><state_id val=\"3\"/><string>Anomaly</string></value>")
        else {
            panic!("expected failure");
        };
        assert!(matches!(failure.message, FailureMessage::Raw(_)));
        assert_eq!(failure.state, Some(StateId(3)));
        assert_eq!(
            failure.to_string(),
            "<value val=\"fail\"><string>Anomaly</string></value>"
        );
    }

    #[test]
    fn unknown_reply_status_is_an_error() {
        assert_eq!(
            decode_response(b"<value val=\"maybe\"><unit/></value>"),
            Err(CodecError::UnknownReplyStatus(Some("maybe".into())))
        );
    }

    #[test]
    fn unknown_tags_are_errors_not_defaults() {
        assert_eq!(
            decode_one("<float>1.5</float>"),
            Err(CodecError::UnknownTag("float".into()))
        );
        assert!(matches!(
            decode_one("<union val=\"in_m\"><unit/></union>"),
            Err(CodecError::BadAttribute { .. })
        ));
        assert!(matches!(
            decode_one("<pair><unit/></pair>"),
            Err(CodecError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn malformed_frame_is_consumed_so_the_stream_can_continue() {
        let mut buf = BytesMut::from(&b"<value val=\"good\"><frob/></value><value val=\"good\"><unit/></value>"[..]);
        let err = decode_frame(&mut buf).unwrap_err();
        assert!(err.is_reply());
        assert_eq!(err.error, CodecError::UnknownTag("frob".into()));
        assert_eq!(
            decode_frame(&mut buf),
            Ok(Some(Frame::Reply(Response::Success {
                value: Value::Unit,
                messages: None,
            })))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_notification_is_not_a_reply() {
        let mut buf = BytesMut::from(
            &b"<message><message_level val=\"notice\"/></message><value val=\"good\"><unit/></value>"[..],
        );
        let err = decode_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind, FrameKind::Notification);
        assert!(matches!(err.error, CodecError::UnexpectedShape { .. }));
        assert!(matches!(decode_frame(&mut buf), Ok(Some(Frame::Reply(_)))));
    }

    #[test]
    fn broken_markup_resyncs_on_the_next_tag() {
        let mut buf = BytesMut::from(&b"<value><unit></value><value val=\"good\"><unit/></value><value"[..]);
        let mut kinds = Vec::new();
        let frame = loop {
            match decode_frame(&mut buf) {
                Err(e) => {
                    assert!(matches!(e.error, CodecError::Xml(_)));
                    kinds.push(e.kind);
                }
                Ok(frame) => break frame,
            }
        };
        assert_eq!(kinds[0], FrameKind::Reply);
        assert!(kinds[1..].iter().all(|k| *k == FrameKind::Unknown));
        assert_eq!(
            frame,
            Some(Frame::Reply(Response::Success {
                value: Value::Unit,
                messages: None,
            }))
        );
        assert_eq!(decode_frame(&mut buf), Ok(None));
        assert_eq!(&buf[..], b"<value");
    }

    #[test]
    fn stray_text_is_skipped_up_to_the_next_element() {
        let mut buf = BytesMut::from(&b"Welcome to Coq\n<value val=\"good\"><unit/></value>"[..]);
        let err = decode_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind, FrameKind::Unknown);
        assert!(matches!(decode_frame(&mut buf), Ok(Some(Frame::Reply(_)))));
    }

    #[test]
    fn frame_codec_yields_bad_frames_as_items() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(
            &b"<feedback><state_id val=\"1\"></feedback><message><message_level val=\"info\"/><richpp><_>hi</_></richpp></message>\n"[..],
        );
        let mut items = Vec::new();
        while let Some(item) = codec.decode_eof(&mut buf).unwrap() {
            items.push(item);
        }
        assert!(buf.is_empty());
        let (good, bad): (Vec<_>, Vec<_>) = items.into_iter().partition(Result::is_ok);
        assert_eq!(good.len(), 1);
        assert!(matches!(
            &good[0],
            Ok(Frame::Notification(Notification::Message(m))) if m.text == "hi"
        ));
        assert_eq!(bad[0].as_ref().unwrap_err().kind, FrameKind::Notification);
    }
}
