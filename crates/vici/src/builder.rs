//! Request message builder.

use crate::wire::{ElementType, check_name, check_value, put_name, put_value};
use bytes::{BufMut, Bytes, BytesMut};
use common::{Error, Result};

/// A finished command request: command name plus encoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: String,
    body: Bytes,
}

impl Request {
    /// A request with an empty message body.
    pub fn empty(command: &str) -> Result<Self> {
        RequestBuilder::begin(command)?.finish()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Section,
    List,
}

/// Incremental encoder for a request message.
///
/// Every step validates sizes and nesting, so a request that reaches
/// [`finish`](Self::finish) is well formed.
#[derive(Debug)]
pub struct RequestBuilder {
    command: String,
    buf: BytesMut,
    open: Vec<Open>,
}

impl RequestBuilder {
    pub fn begin(command: &str) -> Result<Self> {
        check_name(command)?;
        Ok(Self {
            command: command.to_string(),
            buf: BytesMut::with_capacity(256),
            open: Vec::new(),
        })
    }

    fn ensure_not_in_list(&self, what: &str) -> Result<()> {
        if self.open.last() == Some(&Open::List) {
            return Err(Error::other(format!("{} not allowed inside a list", what)));
        }
        Ok(())
    }

    pub fn begin_section(&mut self, name: &str) -> Result<&mut Self> {
        self.ensure_not_in_list("section")?;
        check_name(name)?;
        self.buf.put_u8(ElementType::SectionStart as u8);
        put_name(&mut self.buf, name);
        self.open.push(Open::Section);
        Ok(self)
    }

    pub fn end_section(&mut self) -> Result<&mut Self> {
        if self.open.last() != Some(&Open::Section) {
            return Err(Error::other("end_section without an open section"));
        }
        self.open.pop();
        self.buf.put_u8(ElementType::SectionEnd as u8);
        Ok(self)
    }

    pub fn add_key_value(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        let value = value.as_ref();
        self.ensure_not_in_list("key/value")?;
        check_name(key)?;
        check_value(value)?;
        self.buf.put_u8(ElementType::KeyValue as u8);
        put_name(&mut self.buf, key);
        put_value(&mut self.buf, value);
        Ok(self)
    }

    pub fn begin_list(&mut self, name: &str) -> Result<&mut Self> {
        self.ensure_not_in_list("list")?;
        check_name(name)?;
        self.buf.put_u8(ElementType::ListStart as u8);
        put_name(&mut self.buf, name);
        self.open.push(Open::List);
        Ok(self)
    }

    pub fn add_list_item(&mut self, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        if self.open.last() != Some(&Open::List) {
            return Err(Error::other("list item outside a list"));
        }
        let value = value.as_ref();
        check_value(value)?;
        self.buf.put_u8(ElementType::ListItem as u8);
        put_value(&mut self.buf, value);
        Ok(self)
    }

    pub fn end_list(&mut self) -> Result<&mut Self> {
        if self.open.last() != Some(&Open::List) {
            return Err(Error::other("end_list without an open list"));
        }
        self.open.pop();
        self.buf.put_u8(ElementType::ListEnd as u8);
        Ok(self)
    }

    /// Convenience for a complete list in one call.
    pub fn add_list<I, V>(&mut self, name: &str, items: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        self.begin_list(name)?;
        for item in items {
            self.add_list_item(item)?;
        }
        self.end_list()
    }

    pub fn finish(&mut self) -> Result<Request> {
        if !self.open.is_empty() {
            return Err(Error::other(format!(
                "{} unterminated section(s) or list(s) in {}",
                self.open.len(),
                self.command
            )));
        }
        Ok(Request {
            command: self.command.clone(),
            body: self.buf.split().freeze(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    #[test]
    fn test_nested_request_encoding() {
        let request = RequestBuilder::begin("load-conn")
            .unwrap()
            .begin_section("c")
            .unwrap()
            .add_key_value("v", "2")
            .unwrap()
            .add_list("l", ["a"])
            .unwrap()
            .end_section()
            .unwrap()
            .finish()
            .unwrap();

        assert_eq!(request.command(), "load-conn");
        assert_eq!(
            request.body(),
            &[1, 1, b'c', 3, 1, b'v', 0, 1, b'2', 4, 1, b'l', 5, 0, 1, b'a', 6, 2]
        );
    }

    #[test]
    fn test_oversized_name_and_value() {
        let mut builder = RequestBuilder::begin("x").unwrap();
        let err = builder.add_key_value(&"k".repeat(256), "v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSize);

        let err = builder.add_key_value("k", vec![0u8; 65536]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSize);

        // Rejected elements leave nothing behind
        assert!(builder.finish().unwrap().body().is_empty());
        assert!(builder.add_key_value("k", vec![0u8; 65535]).is_ok());
        assert_eq!(
            RequestBuilder::begin(&"c".repeat(300)).unwrap_err().kind(),
            ErrorKind::InvalidSize
        );
    }

    #[test]
    fn test_unbalanced_nesting_rejected() {
        let mut builder = RequestBuilder::begin("x").unwrap();
        assert!(builder.end_section().is_err());
        assert!(builder.add_list_item("a").is_err());

        builder.begin_list("l").unwrap();
        assert!(builder.add_key_value("k", "v").is_err());
        assert!(builder.begin_section("s").is_err());
        assert!(builder.end_section().is_err());
        assert!(builder.finish().is_err());

        builder.end_list().unwrap();
        assert!(builder.finish().is_ok());
    }

    #[test]
    fn test_empty_request() {
        let request = Request::empty("version").unwrap();
        assert!(request.body().is_empty());
    }
}
