//! DOM Node
//!
//! Nodes link to each other through `NodeId` indices into the tree arena
//! rather than pointers, so detached subtrees stay intact and can still be
//! inspected after removal.

use crate::NodeId;

/// DOM Node - Core structure
#[derive(Debug)]
pub struct Node {
    /// Parent node (NONE if detached or root)
    pub parent: NodeId,
    /// First child
    pub first_child: NodeId,
    /// Last child (for O(1) append)
    pub last_child: NodeId,
    /// Previous sibling
    pub prev_sibling: NodeId,
    /// Next sibling
    pub next_sibling: NodeId,
    /// Node-specific data
    pub data: NodeData,
}

impl Node {
    fn with_data(data: NodeData) -> Self {
        Self {
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
            data,
        }
    }

    /// Create a new element node
    pub fn element(tag_name: &str) -> Self {
        Self::with_data(NodeData::Element(ElementData::new(tag_name)))
    }

    /// Create a new text node
    pub fn text(content: &str) -> Self {
        Self::with_data(NodeData::Text(TextData { content: content.to_string() }))
    }

    /// Create a new comment node
    pub fn comment(content: &str) -> Self {
        Self::with_data(NodeData::Comment(content.to_string()))
    }

    /// Create a document node
    pub fn document() -> Self {
        Self::with_data(NodeData::Document)
    }

    /// Check if this is an element
    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    /// Check if this is text
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self.data, NodeData::Text(_))
    }

    /// Check if this is the document node
    #[inline]
    pub fn is_document(&self) -> bool {
        matches!(self.data, NodeData::Document)
    }

    /// Whether this node may have children
    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self.data, NodeData::Document | NodeData::Element(_))
    }

    /// Get element data if this is an element
    #[inline]
    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Get mutable element data
    #[inline]
    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Get text content if this is a text node
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            NodeData::Text(t) => Some(&t.content),
            _ => None,
        }
    }

    /// Character data of text and comment nodes
    pub fn character_data_mut(&mut self) -> Option<&mut String> {
        match &mut self.data {
            NodeData::Text(t) => Some(&mut t.content),
            NodeData::Comment(c) => Some(c),
            _ => None,
        }
    }
}

/// Node-specific data
#[derive(Debug)]
pub enum NodeData {
    /// Document root
    Document,
    /// Element
    Element(ElementData),
    /// Text content
    Text(TextData),
    /// Comment
    Comment(String),
}

/// Element-specific data
#[derive(Debug, Clone)]
pub struct ElementData {
    tag_name: String,
    attrs: Vec<Attribute>,
    /// Cached id attribute (very common lookup)
    id: Option<String>,
    /// Cached class list
    classes: Vec<String>,
}

impl ElementData {
    pub fn new(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs: Vec::new(),
            id: None,
            classes: Vec::new(),
        }
    }

    /// Lowercase tag name
    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Get an attribute value
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    /// Set an attribute, returning the previous value
    pub fn set_attr(&mut self, name: &str, value: &str) -> Option<String> {
        let old = match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => Some(std::mem::replace(&mut attr.value, value.to_string())),
            None => {
                self.attrs.push(Attribute {
                    name: name.to_string(),
                    value: value.to_string(),
                });
                None
            }
        };
        self.refresh_cache(name);
        old
    }

    /// Remove an attribute, returning its value if it existed
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|a| a.name == name)?;
        let removed = self.attrs.remove(index);
        self.refresh_cache(name);
        Some(removed.value)
    }

    fn refresh_cache(&mut self, name: &str) {
        match name {
            "id" => self.id = self.get_attr("id").map(str::to_string),
            "class" => {
                self.classes = self
                    .get_attr("class")
                    .map(|v| v.split_ascii_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
            }
            _ => {}
        }
    }
}

/// Text node data
#[derive(Debug)]
pub struct TextData {
    pub content: String,
}

/// Attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}
