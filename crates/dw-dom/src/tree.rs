//! DOM Tree (arena-based allocation)
//!
//! Nodes are never freed: a removed subtree keeps its internal links, which
//! is what lets removal records be inspected after the fact.

use crate::{DomError, DomResult, Node, NodeId, Selector};

/// Arena-based DOM tree
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Node>,
}

impl DomTree {
    /// Create a tree holding only the document node
    pub fn new() -> Self {
        Self { nodes: vec![Node::document()] }
    }

    /// Document node
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        self.push(Node::element(tag_name))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.push(Node::text(content))
    }

    /// Create a detached comment node
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.push(Node::comment(content))
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn link(&self, id: NodeId, pick: impl Fn(&Node) -> NodeId) -> Option<NodeId> {
        self.get(id).map(pick).filter(|n| n.is_valid())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.link(id, |n| n.parent)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.link(id, |n| n.first_child)
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.link(id, |n| n.prev_sibling)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.link(id, |n| n.next_sibling)
    }

    /// Iterate direct children
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(id),
        }
    }

    /// Iterate ancestors, nearest first (excluding `id`)
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// All descendants in tree order (excluding `id`)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).map(|(c, _)| c).collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node);
            let mut children: Vec<NodeId> = self.children(node).map(|(c, _)| c).collect();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Inclusive descendant check: `node` is `ancestor` or lies inside it
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        if self.get(ancestor).is_none() || self.get(node).is_none() {
            return false;
        }
        node == ancestor || self.ancestors(node).any(|a| a == ancestor)
    }

    /// Attached (directly or transitively) to the document node
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(NodeId::ROOT, id)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_element)
    }

    /// Validate an insertion without performing it
    pub fn check_insert(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> DomResult<()> {
        let parent_node = self.get(parent).ok_or(DomError::NotFound)?;
        let child_node = self.get(child).ok_or(DomError::NotFound)?;

        if !parent_node.is_container() || child_node.is_document() {
            return Err(DomError::HierarchyRequest);
        }
        // Cannot insert a node into itself or its own subtree
        if self.contains(child, parent) {
            return Err(DomError::HierarchyRequest);
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild);
            }
        }
        Ok(())
    }

    /// Insert `child` before `reference` (append when `None`), moving it
    /// out of any previous parent first
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> DomResult<()> {
        self.check_insert(parent, child, reference)?;

        let reference = match reference {
            Some(r) if r == child => self.next_sibling(child),
            other => other,
        };

        self.detach(child);
        self.link_child(parent, child, reference.unwrap_or(NodeId::NONE));
        Ok(())
    }

    /// Append `child` as last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        if self.get(parent).is_none() || self.get(child).is_none() {
            return Err(DomError::NotFound);
        }
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild);
        }
        self.detach(child);
        Ok(())
    }

    /// Unlink a node from its parent; its own subtree stays intact
    pub(crate) fn detach(&mut self, child: NodeId) {
        let (parent, prev, next) = {
            let n = &self.nodes[child.index()];
            (n.parent, n.prev_sibling, n.next_sibling)
        };
        if !parent.is_valid() {
            return;
        }

        if prev.is_valid() {
            self.nodes[prev.index()].next_sibling = next;
        } else {
            self.nodes[parent.index()].first_child = next;
        }
        if next.is_valid() {
            self.nodes[next.index()].prev_sibling = prev;
        } else {
            self.nodes[parent.index()].last_child = prev;
        }

        let n = &mut self.nodes[child.index()];
        n.parent = NodeId::NONE;
        n.prev_sibling = NodeId::NONE;
        n.next_sibling = NodeId::NONE;
    }

    fn link_child(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        if reference.is_valid() {
            let prev = self.nodes[reference.index()].prev_sibling;
            self.nodes[child.index()].prev_sibling = prev;
            self.nodes[child.index()].next_sibling = reference;
            self.nodes[reference.index()].prev_sibling = child;
            if prev.is_valid() {
                self.nodes[prev.index()].next_sibling = child;
            } else {
                self.nodes[parent.index()].first_child = child;
            }
        } else {
            let last = self.nodes[parent.index()].last_child;
            self.nodes[child.index()].prev_sibling = last;
            self.nodes[child.index()].next_sibling = NodeId::NONE;
            if last.is_valid() {
                self.nodes[last.index()].next_sibling = child;
            } else {
                self.nodes[parent.index()].first_child = child;
            }
            self.nodes[parent.index()].last_child = child;
        }
        self.nodes[child.index()].parent = parent;
    }

    /// Check if element matches selector (false for non-elements)
    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.get(id)
            .and_then(Node::as_element)
            .is_some_and(|e| selector.matches(e))
    }

    /// First descendant element (excluding `root`) matching selector
    pub fn query_selector(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|&id| self.matches(id, selector))
    }

    /// All descendant elements (excluding `root`) matching selector
    pub fn query_selector_all(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| self.matches(id, selector))
            .collect()
    }

    /// Find closest inclusive ancestor matching selector
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| self.matches(n, selector))
    }

    /// First element with the given id attribute under `start`
    pub fn find_by_id(&self, start: NodeId, id: &str) -> Option<NodeId> {
        self.descendants(start).into_iter().find(|&n| {
            self.get(n)
                .and_then(Node::as_element)
                .is_some_and(|e| e.id() == Some(id))
        })
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Child iterator yielding `(id, node)` pairs
pub struct Children<'a> {
    tree: &'a DomTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.tree.get(id)?;
        self.next = self.tree.next_sibling(id);
        Some((id, node))
    }
}

/// Ancestor iterator, nearest first
pub struct Ancestors<'a> {
    tree: &'a DomTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.parent(id);
        Some(id)
    }
}
