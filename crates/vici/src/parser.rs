//! Event-driven tree parser.
//!
//! A [`TreeStreamParser`] registers for one named event, turns every event
//! body it is fed into a [`Section`] tree, and records whether the last
//! parse succeeded. Command responses use [`parse_message`] directly.

use crate::transport::Transport;
use crate::tree::{Node, Section};
use crate::wire::{Element, ElementReader};
use common::{Error, Result};
use std::fmt;
use tracing::{debug, trace, warn};

/// Deepest section nesting accepted from the wire
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Unregistered,
    Registered,
    Parsing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    NotParsed,
    Ok,
    ParseError,
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseStatus::NotParsed => write!(f, "NOT_PARSED"),
            ParseStatus::Ok => write!(f, "OK"),
            ParseStatus::ParseError => write!(f, "PARSE_ERROR"),
        }
    }
}

/// Parse a complete message body into a fresh tree.
pub fn parse_message(body: &[u8]) -> Result<Section> {
    let mut root = Section::new();
    parse_into(body, &mut root)?;
    Ok(root)
}

/// Parse a message body into `root`. On failure `root` keeps everything
/// that was parsed before the error.
pub fn parse_into(body: &[u8], root: &mut Section) -> Result<()> {
    let mut reader = ElementReader::new(body);
    parse_section(&mut reader, root, 0)
}

fn parse_section(reader: &mut ElementReader<'_>, section: &mut Section, depth: usize) -> Result<()> {
    loop {
        let Some(element) = reader.next_element()? else {
            return if depth == 0 {
                Ok(())
            } else {
                Err(Error::parse("message ended inside a section"))
            };
        };

        match element {
            Element::SectionStart(name) => {
                if depth + 1 > MAX_DEPTH {
                    return Err(Error::parse(format!("sections nested deeper than {}", MAX_DEPTH)));
                }
                let mut child = Section::new();
                let result = parse_section(reader, &mut child, depth + 1);
                section.insert(name, Node::Section(child));
                result?;
            }
            Element::SectionEnd => {
                if depth == 0 {
                    return Err(Error::parse("section end without matching start"));
                }
                return Ok(());
            }
            Element::KeyValue(name, value) => {
                section.insert(name, Node::Value(value.to_vec()));
            }
            Element::ListStart(name) => {
                let mut items = Vec::new();
                let result = parse_list(reader, &mut items);
                section.insert(name, Node::List(items));
                result?;
            }
            Element::ListItem(_) | Element::ListEnd => {
                return Err(Error::parse("list element outside a list"));
            }
        }
    }
}

fn parse_list(reader: &mut ElementReader<'_>, items: &mut Vec<Vec<u8>>) -> Result<()> {
    loop {
        match reader.next_element()? {
            Some(Element::ListItem(value)) => items.push(value.to_vec()),
            Some(Element::ListEnd) => return Ok(()),
            Some(other) => {
                return Err(Error::parse(format!("unexpected {:?} inside a list", other)));
            }
            None => return Err(Error::parse("message ended inside a list")),
        }
    }
}

/// Parser bound to one event stream.
#[derive(Debug)]
pub struct TreeStreamParser {
    state: ParserState,
    status: ParseStatus,
    event: Option<String>,
    tree: Section,
}

impl Default for TreeStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStreamParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Unregistered,
            status: ParseStatus::NotParsed,
            event: None,
            tree: Section::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn status(&self) -> ParseStatus {
        self.status
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Tree from the most recent event, possibly partial after a parse error.
    pub fn tree(&self) -> &Section {
        &self.tree
    }

    /// Register for `event`, dropping any previous registration first.
    pub fn register<T: Transport + ?Sized>(&mut self, transport: &mut T, event: &str) -> Result<()> {
        if self.state != ParserState::Unregistered
            && let Err(e) = self.unregister(transport)
        {
            debug!("Ignoring failure to drop previous registration: {}", e);
        }

        transport.register_event(event)?;

        self.state = ParserState::Registered;
        self.status = ParseStatus::NotParsed;
        self.event = Some(event.to_string());
        self.tree.clear();
        trace!(event = %event, "Registered for event");
        Ok(())
    }

    /// Drop the current registration. A no-op when unregistered.
    pub fn unregister<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.state == ParserState::Unregistered {
            return Ok(());
        }

        let event = self.event.take().unwrap_or_default();
        self.state = ParserState::Unregistered;
        trace!(event = %event, "Unregistering from event");
        transport.unregister_event(&event)
    }

    /// Parse one delivered event body, replacing the previous tree.
    pub fn feed(&mut self, body: &[u8]) -> ParseStatus {
        if self.state == ParserState::Unregistered {
            warn!("Dropping event body delivered while unregistered");
            return self.status;
        }

        self.state = ParserState::Parsing;
        self.tree.clear();
        self.status = match parse_into(body, &mut self.tree) {
            Ok(()) => ParseStatus::Ok,
            Err(e) => {
                debug!("Event parse failed: {}", e);
                ParseStatus::ParseError
            }
        };
        self.state = ParserState::Registered;
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RequestBuilder;
    use crate::transport::MockTransport;
    use mockall::predicate::eq;

    fn body(build: impl FnOnce(&mut RequestBuilder) -> Result<()>) -> Vec<u8> {
        let mut builder = RequestBuilder::begin("event").unwrap();
        build(&mut builder).unwrap();
        builder.finish().unwrap().into_body().to_vec()
    }

    #[test]
    fn test_parse_nested_message() {
        let message = body(|b| {
            b.begin_section("conn")?
                .add_key_value("state", "ESTABLISHED")?
                .begin_section("child-sas")?
                .begin_section("conn")?
                .add_key_value("bytes-in", "42")?
                .end_section()?
                .end_section()?
                .add_list("local-ts", ["10.0.0.0/24", "10.1.0.0/24"])?
                .end_section()?;
            Ok(())
        });

        let root = parse_message(&message).unwrap();
        let conn = root.section("conn").unwrap();
        assert_eq!(conn.value_str("state"), Some("ESTABLISHED"));
        assert_eq!(conn.list("local-ts").unwrap().len(), 2);
        let child = conn.section("child-sas").unwrap().section("conn").unwrap();
        assert_eq!(child.value_str("bytes-in"), Some("42"));
    }

    #[test]
    fn test_partial_tree_kept_on_error() {
        // first = 1, then section "s" holding k = v that never ends
        let mut message = vec![3, 5, b'f', b'i', b'r', b's', b't', 0, 1, b'1'];
        message.extend_from_slice(&[1, 1, b's', 3, 1, b'k', 0, 1, b'v']);

        let mut root = Section::new();
        assert!(parse_into(&message, &mut root).is_err());
        assert_eq!(root.value_str("first"), Some("1"));
        assert_eq!(root.section("s").unwrap().value_str("k"), Some("v"));
    }

    #[test]
    fn test_malformed_structures() {
        // Stray section end
        assert!(parse_message(&[2]).is_err());
        // List item outside a list
        assert!(parse_message(&[5, 0, 0]).is_err());
        // Unterminated list
        assert!(parse_message(&[4, 1, b'l', 5, 0, 1, b'a']).is_err());
        // Section inside a list
        assert!(parse_message(&[4, 1, b'l', 1, 1, b's']).is_err());
        // Empty body is an empty tree
        assert!(parse_message(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_nesting_limit() {
        let mut message = Vec::new();
        for _ in 0..=MAX_DEPTH {
            message.extend_from_slice(&[1, 1, b'n']);
        }
        for _ in 0..=MAX_DEPTH {
            message.push(2);
        }
        let err = parse_message(&message).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_registration_state_machine() {
        let mut transport = MockTransport::new();
        transport
            .expect_register_event()
            .with(eq("list-sa"))
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_unregister_event()
            .with(eq("list-sa"))
            .times(1)
            .returning(|_| Ok(()));

        let mut parser = TreeStreamParser::new();
        assert_eq!(parser.state(), ParserState::Unregistered);

        parser.register(&mut transport, "list-sa").unwrap();
        assert_eq!(parser.state(), ParserState::Registered);
        assert_eq!(parser.status(), ParseStatus::NotParsed);

        let status = parser.feed(&body(|b| {
            b.add_key_value("k", "v")?;
            Ok(())
        }));
        assert_eq!(status, ParseStatus::Ok);
        assert_eq!(parser.state(), ParserState::Registered);
        assert_eq!(parser.tree().value_str("k"), Some("v"));

        parser.unregister(&mut transport).unwrap();
        assert_eq!(parser.state(), ParserState::Unregistered);
    }

    #[test]
    fn test_unregister_twice_is_noop() {
        let mut transport = MockTransport::new();
        transport.expect_register_event().returning(|_| Ok(()));
        transport
            .expect_unregister_event()
            .times(1)
            .returning(|_| Ok(()));

        let mut parser = TreeStreamParser::new();
        // Never registered: no transport call
        parser.unregister(&mut transport).unwrap();

        parser.register(&mut transport, "list-sa").unwrap();
        parser.unregister(&mut transport).unwrap();
        parser.unregister(&mut transport).unwrap();
        assert_eq!(parser.state(), ParserState::Unregistered);
    }

    #[test]
    fn test_reregister_unregisters_first() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_register_event()
            .with(eq("a"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        transport
            .expect_unregister_event()
            .with(eq("a"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::other("daemon went away")));
        transport
            .expect_register_event()
            .with(eq("b"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut parser = TreeStreamParser::new();
        parser.register(&mut transport, "a").unwrap();
        parser.register(&mut transport, "b").unwrap();
        assert_eq!(parser.event(), Some("b"));
    }

    #[test]
    fn test_new_event_replaces_tree() {
        let mut transport = MockTransport::new();
        transport.expect_register_event().returning(|_| Ok(()));

        let mut parser = TreeStreamParser::new();
        parser.register(&mut transport, "list-sa").unwrap();

        parser.feed(&body(|b| {
            b.add_key_value("old", "1")?;
            Ok(())
        }));
        assert_eq!(parser.feed(&[2]), ParseStatus::ParseError);
        assert!(parser.tree().get("old").is_none());

        parser.feed(&body(|b| {
            b.add_key_value("new", "1")?;
            Ok(())
        }));
        assert_eq!(parser.status(), ParseStatus::Ok);
        assert!(parser.tree().get("new").is_some());
    }
}
