use quick_xml::{Reader, events::BytesStart, events::Event};

use crate::{Result, XmlflowError};

/// Index of an element in document (pre-)order.
pub type ElementId = usize;

#[derive(Debug, Clone)]
enum Content {
    Element(ElementId),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct XmlElement {
    /// Qualified tag name as written in the document.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub parent: Option<ElementId>,
    pub depth: usize,
    children: Vec<ElementId>,
    content: Vec<Content>,
    /// One past the last descendant id.
    end: ElementId,
}

impl XmlElement {
    fn new(
        name: String,
        attributes: Vec<(String, String)>,
        parent: Option<ElementId>,
        depth: usize,
        id: ElementId,
    ) -> Self {
        Self {
            name,
            attributes,
            parent,
            depth,
            children: Vec::new(),
            content: Vec::new(),
            end: id + 1,
        }
    }

    pub fn attribute(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Parsed XML document stored as an element arena.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    elements: Vec<XmlElement>,
    root: Option<ElementId>,
}

impl XmlDocument {
    /// Parse XML text into an arena. Fails on malformed input or a missing root.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut doc = XmlDocument::default();
        let mut stack: Vec<ElementId> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let id = doc.open(e, &stack)?;
                    stack.push(id);
                }
                Ok(Event::Empty(ref e)) => {
                    let id = doc.open(e, &stack)?;
                    doc.elements[id].end = id + 1;
                }
                Ok(Event::End(_)) => {
                    let closed = stack.pop().ok_or_else(|| XmlflowError::Xml("unexpected closing tag".to_string()))?;
                    doc.elements[closed].end = doc.elements.len();
                }
                Ok(Event::Text(ref e)) => {
                    let text = e.unescape().map_err(|err| XmlflowError::Xml(format!("text error: {err}")))?;
                    doc.push_text(&stack, text.into_owned());
                }
                Ok(Event::CData(ref e)) => {
                    let text = std::str::from_utf8(e.as_ref()).map_err(|err| XmlflowError::Xml(format!("cdata error: {err}")))?;
                    doc.push_text(&stack, text.to_string());
                }
                Ok(Event::Eof) => {
                    if !stack.is_empty() {
                        let unclosed: Vec<&str> = stack.iter().map(|id| doc.elements[*id].name.as_str()).collect();
                        return Err(XmlflowError::Xml(format!("unclosed element(s): <{}>", unclosed.join(">, <"))));
                    }
                    break;
                }
                // declarations, comments, processing instructions
                Ok(_) => {}
                Err(e) => return Err(XmlflowError::Xml(format!("parse error at position {}: {e}", reader.buffer_position()))),
            }
        }

        if doc.root.is_none() {
            return Err(XmlflowError::Xml("no root element found".to_string()));
        }
        Ok(doc)
    }

    fn open(
        &mut self,
        e: &BytesStart,
        stack: &[ElementId],
    ) -> Result<ElementId> {
        let name = std::str::from_utf8(e.name().as_ref()).map_err(|err| XmlflowError::Xml(format!("invalid element name: {err}")))?.to_string();
        let attributes = read_attributes(e)?;
        let id = self.elements.len();
        let parent = stack.last().copied();

        match parent {
            Some(p) => {
                self.elements[p].children.push(id);
                self.elements[p].content.push(Content::Element(id));
            }
            None if self.root.is_some() => return Err(XmlflowError::Xml(format!("unexpected second root element <{}>", name))),
            None => self.root = Some(id),
        }

        self.elements.push(XmlElement::new(name, attributes, parent, stack.len(), id));
        Ok(id)
    }

    fn push_text(
        &mut self,
        stack: &[ElementId],
        text: String,
    ) {
        if let Some(parent) = stack.last() {
            self.elements[*parent].content.push(Content::Text(text));
        }
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(
        &self,
        id: ElementId,
    ) -> &XmlElement {
        &self.elements[id]
    }

    /// Tag name as written.
    pub fn tag(
        &self,
        id: ElementId,
    ) -> &str {
        &self.elements[id].name
    }

    /// Lower-cased tag name used for mapping lookups.
    pub fn tag_key(
        &self,
        id: ElementId,
    ) -> String {
        self.elements[id].name.to_lowercase()
    }

    pub fn attribute(
        &self,
        id: ElementId,
        name: &str,
    ) -> Option<&str> {
        self.elements[id].attribute(name)
    }

    pub fn attributes(
        &self,
        id: ElementId,
    ) -> &[(String, String)] {
        &self.elements[id].attributes
    }

    pub fn parent(
        &self,
        id: ElementId,
    ) -> Option<ElementId> {
        self.elements[id].parent
    }

    pub fn children(
        &self,
        id: ElementId,
    ) -> &[ElementId] {
        &self.elements[id].children
    }

    /// All descendants in document order.
    pub fn descendants(
        &self,
        id: ElementId,
    ) -> std::ops::Range<ElementId> {
        (id + 1)..self.elements[id].end
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(
        &self,
        id: ElementId,
    ) -> impl Iterator<Item = ElementId> + '_ {
        std::iter::successors(self.elements[id].parent, move |p| self.elements[*p].parent)
    }

    /// Concatenated text of the element and all its descendants, trimmed.
    pub fn text_content(
        &self,
        id: ElementId,
    ) -> String {
        let mut out = String::new();
        let mut pending: Vec<(ElementId, usize)> = vec![(id, 0)];

        while let Some((current, pos)) = pending.pop() {
            let content = &self.elements[current].content;
            if pos >= content.len() {
                continue;
            }
            pending.push((current, pos + 1));
            match &content[pos] {
                Content::Text(t) => out.push_str(t),
                Content::Element(child) => pending.push((*child, 0)),
            }
        }

        out.trim().to_string()
    }

    /// Text directly inside the element, excluding child elements, trimmed.
    pub fn own_text(
        &self,
        id: ElementId,
    ) -> String {
        let mut out = String::new();
        for c in &self.elements[id].content {
            if let Content::Text(t) = c {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// `xml:id`, falling back to `id`.
    pub fn identifier(
        &self,
        id: ElementId,
    ) -> Option<&str> {
        self.attribute(id, "xml:id").or_else(|| self.attribute(id, "id"))
    }

    /// First element in document order with the given lower-cased tag.
    pub fn find_first(
        &self,
        tag_key: &str,
    ) -> Option<ElementId> {
        (0..self.elements.len()).find(|id| self.elements[*id].name.to_lowercase() == tag_key)
    }
}

fn read_attributes(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlflowError::Xml(format!("attribute error: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|err| XmlflowError::Xml(format!("attribute key error: {err}")))?.to_string();
        let val = attr.unescape_value().map_err(|err| XmlflowError::Xml(format!("attribute value error: {err}")))?.to_string();
        attrs.push((key, val));
    }
    Ok(attrs)
}
