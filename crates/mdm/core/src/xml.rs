//! Minimal namespace-tolerant XML tree and writer.
//!
//! Windows clients mix default namespaces and prefixes freely (`wsse:BinarySecurityToken`
//! in one request, `<BinarySecurityToken xmlns="...">` in the next), so elements are matched
//! by local name. SOAP requests are read through serde (see `soap::parse_request`); the tree
//! serves DDF, SyncML and provisioning documents.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

/// Errors produced while reading or writing protocol XML.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("XML is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("failed to write XML: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing element or attribute '{0}'")]
    Missing(String),
    #[error("unexpected value for '{field}': {value}")]
    Unexpected { field: String, value: String },
    #[error("document has no root element")]
    Empty,
}

/// Local name of the document's root element.
pub fn root_name(input: &str) -> Result<String, XmlError> {
    let mut reader = Reader::from_str(input);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(std::str::from_utf8(e.local_name().as_ref())?.to_string());
            }
            Event::Eof => return Err(XmlError::Empty),
            _ => {}
        }
    }
}

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Local name without prefix.
    pub name: String,
    /// Attributes keyed by local name; namespace declarations are dropped.
    pub attributes: Vec<(String, String)>,
    /// Concatenated, unescaped character data directly inside this element.
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document and return its root element.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Self::from_start(&e)?),
                Event::Empty(e) => {
                    let node = Self::from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::End(_) => {
                    let Some(node) = stack.pop() else {
                        return Err(XmlError::Empty);
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(std::str::from_utf8(&c.into_inner())?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Missing(format!("closing tag for '{}'", stack[0].name)));
        }
        root.ok_or(XmlError::Empty)
    }

    fn from_start(e: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = std::str::from_utf8(e.local_name().as_ref())?.to_string();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let raw = attr.key.as_ref();
            if raw == b"xmlns" || raw.starts_with(b"xmlns:") {
                continue;
            }
            let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Walk a `/`-separated path of local names.
    pub fn path(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Like [`XmlNode::path`] but reports the missing path.
    pub fn require(&self, path: &str) -> Result<&XmlNode, XmlError> {
        self.path(path)
            .ok_or_else(|| XmlError::Missing(format!("{}/{}", self.name, path)))
    }

    /// Trimmed text at `path`, if the element exists.
    pub fn text_at(&self, path: &str) -> Option<String> {
        self.path(path).map(|n| n.text.trim().to_string())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require_attr(&self, name: &str) -> Result<&str, XmlError> {
        self.attr(name)
            .ok_or_else(|| XmlError::Missing(format!("{}@{}", self.name, name)))
    }
}

/// Thin event writer producing compact (whitespace-free) XML.
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    /// Write `<?xml version="1.0" encoding="UTF-8"?>`.
    pub fn declaration(&mut self) -> Result<(), XmlError> {
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(())
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Start(start))?;
        Ok(())
    }

    pub fn end(&mut self, name: &str) -> Result<(), XmlError> {
        self.inner.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Empty(start))?;
        Ok(())
    }

    pub fn text(&mut self, text: &str) -> Result<(), XmlError> {
        self.inner.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    /// `<name attrs>text</name>`, always with an explicit end tag.
    pub fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), XmlError> {
        self.start(name, attrs)?;
        if !text.is_empty() {
            self.text(text)?;
        }
        self.end(name)
    }

    pub fn into_string(self) -> Result<String, XmlError> {
        let bytes = self.inner.into_inner();
        Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?)
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}
