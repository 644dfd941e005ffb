//! KDL reading and writing for [`DocumentNode`] trees.
//!
//! Mapping: node name to name, properties to attributes, the single positional
//! argument (if any) to inner text, and the children block to child nodes.
//! Property and argument values are stringified; `null` is treated as absent.

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};

use crate::{Document, DocumentError, DocumentNode};

/// Parses KDL source into a [`Document`].
pub fn parse_document(input: &str) -> Result<Document, DocumentError> {
	let doc: KdlDocument = input.parse()?;
	let nodes = doc.nodes().iter().map(node_from_kdl).collect::<Result<Vec<_>, _>>()?;
	Ok(Document::new(nodes))
}

fn node_from_kdl(node: &KdlNode) -> Result<DocumentNode, DocumentError> {
	let mut out = DocumentNode::new(node.name().value());
	let mut positional = 0usize;

	for entry in node.entries() {
		let text = value_text(entry.value());
		match entry.name() {
			Some(key) => {
				if let Some(text) = text {
					out.set_attr(key.value(), text);
				}
			}
			None => {
				positional += 1;
				out.set_text(text);
			}
		}
	}

	if positional > 1 {
		return Err(DocumentError::TooManyValues {
			node: node.name().value().to_string(),
			count: positional,
		});
	}

	if let Some(children) = node.children() {
		for child in children.nodes() {
			out.push_child(node_from_kdl(child)?);
		}
	}

	Ok(out)
}

fn value_text(value: &KdlValue) -> Option<String> {
	if let Some(s) = value.as_string() {
		Some(s.to_string())
	} else if let Some(i) = value.as_integer() {
		Some(i.to_string())
	} else if let Some(f) = value.as_float() {
		Some(f.to_string())
	} else {
		value.as_bool().map(|b| b.to_string())
	}
}

fn node_to_kdl(node: &DocumentNode) -> KdlNode {
	let mut out = KdlNode::new(node.name().to_string());
	if let Some(text) = node.text() {
		out.entries_mut().push(KdlEntry::new(text.to_string()));
	}
	for (key, value) in node.attributes() {
		out.entries_mut().push(KdlEntry::new_prop(key.to_string(), value.to_string()));
	}
	if !node.children().is_empty() {
		let mut children = KdlDocument::new();
		children.nodes_mut().extend(node.children().iter().map(node_to_kdl));
		out.set_children(children);
	}
	out
}

fn render(nodes: &[DocumentNode]) -> String {
	let mut doc = KdlDocument::new();
	doc.nodes_mut().extend(nodes.iter().map(node_to_kdl));
	doc.autoformat();
	doc.to_string()
}

impl Document {
	/// Renders the document as formatted KDL.
	pub fn to_kdl_string(&self) -> String {
		render(self.nodes())
	}
}

impl DocumentNode {
	/// Renders this node (and its subtree) as formatted KDL.
	pub fn to_kdl_string(&self) -> String {
		render(std::slice::from_ref(self))
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn parses_defs_document() {
		let doc = parse_document(
			r#"
			Defs {
				Weapon Type="GunDef" Abstract="true" {
					Damage 5
					Spread 0.5
					Automatic #true
					Tags {
						li "loud"
						li "heavy"
					}
				}
			}
			"#,
		)
		.expect("document should parse");

		let root = doc.root().expect("root should exist");
		assert_eq!(root.name(), "Defs");
		let weapon = root.child("Weapon").expect("weapon should exist");
		assert_eq!(weapon.attr("Type"), Some("GunDef"));
		assert_eq!(weapon.attr_flag("Abstract"), Some(true));
		assert_eq!(weapon.child("Damage").and_then(|n| n.text()), Some("5"));
		assert_eq!(weapon.child("Spread").and_then(|n| n.text()), Some("0.5"));
		assert_eq!(weapon.child("Automatic").and_then(|n| n.text()), Some("true"));
		let tags: Vec<_> = weapon
			.child("Tags")
			.map(|t| t.children().iter().filter_map(|li| li.text()).collect())
			.unwrap_or_default();
		assert_eq!(tags, vec!["loud", "heavy"]);
	}

	#[test]
	fn null_values_are_absent() {
		let doc = parse_document("Defs { Gun Parent=#null { Value #null } }").expect("document should parse");
		let gun = doc.root().and_then(|r| r.child("Gun")).expect("gun should exist");
		assert_eq!(gun.attr("Parent"), None);
		assert_eq!(gun.child("Value").and_then(|n| n.text()), None);
	}

	#[test]
	fn rejects_multiple_values() {
		let err = parse_document("Defs { Gun 1 2 }").expect_err("two values should be rejected");
		assert!(matches!(err, DocumentError::TooManyValues { count: 2, .. }));
	}

	#[test]
	fn rejects_invalid_syntax() {
		assert!(matches!(parse_document("Defs {"), Err(DocumentError::Kdl(_))));
	}

	#[test]
	fn rendering_reparses_to_same_tree() {
		let node = DocumentNode::new("Defs").with_child(
			DocumentNode::new("Gun")
				.with_attr("Type", "GunDef")
				.with_attr("Source", "base.kdl")
				.with_child(DocumentNode::new("Damage").with_text("5"))
				.with_child(DocumentNode::new("Label").with_text("a \"quoted\" name")),
		);
		let text = node.to_kdl_string();
		let reparsed = parse_document(&text).expect("rendered KDL should parse");
		assert_eq!(reparsed.root(), Some(&node));
	}
}
