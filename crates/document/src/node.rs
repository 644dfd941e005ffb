//! The attributed tree model shared by the merge engine, patches and the materializer.

use indexmap::IndexMap;

/// A named node with ordered attributes, optional inner text and ordered children.
///
/// Attribute values are always text. Typed interpretation is left to whoever
/// consumes the node (the merge engine reads flags, parsers read values).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentNode {
	name: String,
	attributes: IndexMap<String, String>,
	text: Option<String>,
	children: Vec<DocumentNode>,
}

impl DocumentNode {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.set_attr(key, value);
		self
	}

	pub fn with_text(mut self, text: impl Into<String>) -> Self {
		self.text = Some(text.into());
		self
	}

	pub fn with_child(mut self, child: DocumentNode) -> Self {
		self.children.push(child);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn set_name(&mut self, name: impl Into<String>) {
		self.name = name.into();
	}

	pub fn attr(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(String::as_str)
	}

	/// Reads a boolean flag attribute.
	///
	/// Accepts `true`/`false` in any case. Missing or unparsable values yield `None`
	/// so callers can apply their own default.
	pub fn attr_flag(&self, key: &str) -> Option<bool> {
		let value = self.attr(key)?.trim();
		if value.eq_ignore_ascii_case("true") {
			Some(true)
		} else if value.eq_ignore_ascii_case("false") {
			Some(false)
		} else {
			None
		}
	}

	/// Sets an attribute, keeping its original position when it already exists.
	pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
		self.attributes.insert(key.into(), value.into())
	}

	pub fn remove_attr(&mut self, key: &str) -> Option<String> {
		self.attributes.shift_remove(key)
	}

	pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
		self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn text(&self) -> Option<&str> {
		self.text.as_deref()
	}

	pub fn set_text(&mut self, text: Option<String>) {
		self.text = text;
	}

	pub fn children(&self) -> &[DocumentNode] {
		&self.children
	}

	pub fn children_mut(&mut self) -> &mut Vec<DocumentNode> {
		&mut self.children
	}

	/// First child with the given name.
	pub fn child(&self, name: &str) -> Option<&DocumentNode> {
		self.children.iter().find(|c| c.name == name)
	}

	pub fn child_mut(&mut self, name: &str) -> Option<&mut DocumentNode> {
		self.children.iter_mut().find(|c| c.name == name)
	}

	pub fn push_child(&mut self, child: DocumentNode) {
		self.children.push(child);
	}

	/// A node holding only a plain value: inner text and no element children.
	///
	/// An empty node is not a value node.
	pub fn is_value_node(&self) -> bool {
		self.children.is_empty() && self.text.is_some()
	}

	/// Deep clone under a different name.
	pub fn clone_with_name(&self, name: impl Into<String>) -> Self {
		let mut clone = self.clone();
		clone.name = name.into();
		clone
	}

	/// Follows a path of child indices starting at this node.
	pub fn descendant_at(&self, path: &[usize]) -> Option<&DocumentNode> {
		path.iter().try_fold(self, |node, &index| node.children.get(index))
	}

	pub fn descendant_at_mut(&mut self, path: &[usize]) -> Option<&mut DocumentNode> {
		path.iter().try_fold(self, |node, &index| node.children.get_mut(index))
	}

	/// Detaches the descendant at `path`. The empty path (this node) cannot be removed.
	pub fn remove_at(&mut self, path: &[usize]) -> Option<DocumentNode> {
		let (last, parent) = path.split_last()?;
		let parent = self.descendant_at_mut(parent)?;
		(*last < parent.children.len()).then(|| parent.children.remove(*last))
	}
}

/// A parsed source document: an ordered list of top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
	nodes: Vec<DocumentNode>,
}

impl Document {
	pub fn new(nodes: Vec<DocumentNode>) -> Self {
		Self { nodes }
	}

	/// The document element. Only the first top-level node is considered.
	pub fn root(&self) -> Option<&DocumentNode> {
		self.nodes.first()
	}

	pub fn into_root(self) -> Option<DocumentNode> {
		self.nodes.into_iter().next()
	}

	pub fn nodes(&self) -> &[DocumentNode] {
		&self.nodes
	}
}

impl From<DocumentNode> for Document {
	fn from(root: DocumentNode) -> Self {
		Self { nodes: vec![root] }
	}
}
