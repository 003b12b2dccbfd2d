//! Broker wire protocol: text frames in the STOMP 1.2 style.
//!
//! A frame is a command line, zero or more `name:value` header lines, a blank
//! line, and a body terminated by a NUL octet:
//!
//! ```text
//! SEND
//! destination:/app/chat.send
//! content-type:application/json
//!
//! {"productId":"p1",...}\0
//! ```
//!
//! This module owns encoding, parsing, and header escaping, plus typed
//! constructors for the frames the client emits. Everything above the framing
//! layer (queuing, reconnection, dispatch) lives in [`crate::client`].

use crate::error::{ChatError, Result};

/// Frame commands used by the client-broker conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake request.
    Connect,
    /// Broker handshake acknowledgement.
    Connected,
    /// Client publishes a message to a destination.
    Send,
    /// Client subscribes to a destination.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Broker delivers a message for a subscription.
    Message,
    /// Broker reports a protocol-level error.
    Error,
    /// Client closes the session cleanly.
    Disconnect,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "MESSAGE" => Ok(Command::Message),
            "ERROR" => Ok(Command::Error),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(ChatError::MalformedFrame(format!(
                "Unknown frame command: {other}"
            ))),
        }
    }
}

/// A single protocol frame.
///
/// Headers keep their wire order; lookups return the first occurrence, which
/// is the one the protocol defines as authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builds the client handshake frame.
    ///
    /// `heartbeat` is the (outgoing, incoming) interval pair in milliseconds,
    /// advertised to the broker via the `heart-beat` header.
    #[must_use]
    pub fn connect(host: &str, heartbeat: (u64, u64)) -> Self {
        let mut frame = Frame::new(Command::Connect);
        frame.push_header("accept-version", "1.2");
        frame.push_header("host", host);
        frame.push_header("heart-beat", &format!("{},{}", heartbeat.0, heartbeat.1));
        frame
    }

    /// Builds a subscription frame for a destination.
    #[must_use]
    pub fn subscribe(id: u64, destination: &str) -> Self {
        let mut frame = Frame::new(Command::Subscribe);
        frame.push_header("id", &format!("sub-{id}"));
        frame.push_header("destination", destination);
        frame
    }

    /// Builds the frame that tears down a subscription by id.
    #[must_use]
    pub fn unsubscribe(id: u64) -> Self {
        let mut frame = Frame::new(Command::Unsubscribe);
        frame.push_header("id", &format!("sub-{id}"));
        frame
    }

    /// Builds a publish frame carrying `body` to `destination`.
    ///
    /// Caller-supplied headers are appended after the protocol-mandated ones,
    /// so they cannot shadow `destination` or `content-length`.
    #[must_use]
    pub fn send(destination: &str, body: &str, headers: &[(String, String)]) -> Self {
        let mut frame = Frame::new(Command::Send);
        frame.push_header("destination", destination);
        frame.push_header("content-type", "application/json");
        frame.push_header("content-length", &body.len().to_string());
        for (name, value) in headers {
            frame.push_header(name, value);
        }
        frame.body = body.to_string();
        frame
    }

    /// Builds the clean session teardown frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Appends a header, preserving wire order.
    pub fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Returns the first header with the given name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Shorthand for the `destination` header.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    /// Encodes the frame to its wire form, including the trailing NUL.
    #[must_use]
    pub fn encode(&self) -> String {
        // CONNECT/CONNECTED header values are exempt from escaping by the
        // protocol; every other frame escapes.
        let escaped = !matches!(self.command, Command::Connect | Command::Connected);

        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escaped {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses a frame from its wire form.
    ///
    /// A trailing NUL is accepted and stripped; its absence is tolerated
    /// because some WebSocket bridges drop it on text frames.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MalformedFrame`] on an unknown command, a header
    /// line without a colon, or an invalid escape sequence.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.strip_suffix('\0').unwrap_or(raw);
        let (head, body) = match raw.split_once("\n\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };

        let mut lines = head.lines();
        let command_line = lines
            .next()
            .ok_or_else(|| ChatError::MalformedFrame("Empty frame".to_string()))?;
        let command = Command::parse(command_line.trim_end_matches('\r'))?;
        let escaped = !matches!(command, Command::Connect | Command::Connected);

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ChatError::MalformedFrame(format!("Header line without colon: {line}"))
            })?;
            if escaped {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            command,
            headers,
            body: body.to_string(),
        })
    }

    /// True for the broker keepalive frame: a bare end-of-line.
    #[must_use]
    pub fn is_heartbeat(raw: &str) -> bool {
        matches!(raw, "\n" | "\r\n" | "")
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChatError::MalformedFrame(format!(
                    "Invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
