//! The master document and inheritance resolution.
//!
//! Sources are appended as-is under one `Defs` root; same-named nodes coexist
//! until [`MasterDocument::resolve_inheritance`] folds each `Parent` chain into a
//! single node. Merging follows a few attribute conventions:
//!
//! - `Inherit="false"` on a source node replaces the destination outright.
//! - `Abstract` and `Null` are never inherited.
//! - A destination without children takes the source value wholesale.
//! - Children either append (list mode) or merge by name. List mode comes from
//!   `IsList`, or is implied when every source child uses the list item name.

use defloom_document::{Document, DocumentNode};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use crate::diagnostics::{DiagnosticKind, Diagnostics};

const NOT_INHERITED: [&str; 2] = ["Abstract", "Null"];

/// Accumulated def sources.
#[derive(Debug, Clone)]
pub struct MasterDocument {
	root: DocumentNode,
	list_item_name: String,
	resolved: bool,
}

impl MasterDocument {
	pub const ROOT_NAME: &'static str = "Defs";

	pub fn new(list_item_name: impl Into<String>) -> Self {
		Self {
			root: DocumentNode::new(Self::ROOT_NAME),
			list_item_name: list_item_name.into(),
			resolved: false,
		}
	}

	pub fn root(&self) -> &DocumentNode {
		&self.root
	}

	pub fn root_mut(&mut self) -> &mut DocumentNode {
		&mut self.root
	}

	pub fn is_resolved(&self) -> bool {
		self.resolved
	}

	/// Imports every top-level node under the document's root, stamping each with
	/// a `Source` attribute. Returns the number of imported nodes.
	pub fn append(&mut self, document: Document, source: &str, diagnostics: &mut Diagnostics) -> usize {
		let Some(root) = document.into_root() else {
			diagnostics.warn(DiagnosticKind::Structural, source, "document has no root node, nothing to load");
			return 0;
		};
		let mut imported = 0;
		for mut node in root.children().iter().cloned() {
			if !source.is_empty() {
				node.set_attr("Source", source);
			}
			self.root.push_child(node);
			imported += 1;
		}
		imported
	}

	/// Folds every `Parent` chain into its def node. A second call does nothing.
	///
	/// A def whose chain is cyclic is dropped together with every node of the chain.
	/// A def whose parent does not exist is dropped on its own.
	pub fn resolve_inheritance(&mut self, diagnostics: &mut Diagnostics) {
		if self.resolved {
			return;
		}
		self.resolved = true;

		let snapshot = self.root.children().to_vec();
		let mut first_by_name: HashMap<&str, usize> = HashMap::default();
		for (index, node) in snapshot.iter().enumerate() {
			first_by_name.entry(node.name()).or_insert(index);
		}

		let mut dropped = vec![false; snapshot.len()];
		let mut folded = Vec::new();
		for (index, node) in snapshot.iter().enumerate() {
			if node.attr_flag("Abstract") == Some(true) || node.attr("Parent").is_none() {
				continue;
			}
			match inheritance_chain(&snapshot, &first_by_name, index) {
				Ok(chain) => {
					let Some((&ancestor, rest)) = chain.split_last() else {
						continue;
					};
					let mut composed = snapshot[ancestor].clone_with_name(node.name());
					for &part in rest.iter().rev() {
						self.merge(&mut composed, &snapshot[part]);
					}
					folded.push((index, composed));
				}
				Err(Broken::Cycle(chain)) => {
					let names: Vec<&str> = chain.iter().map(|&i| snapshot[i].name()).collect();
					diagnostics.error(
						DiagnosticKind::Resolution,
						node.name(),
						format!("cyclic inheritance ({}); def will not be loaded", names.join(" -> ")),
					);
					for i in chain {
						dropped[i] = true;
					}
				}
				Err(Broken::MissingParent { child, parent }) => {
					diagnostics.error(
						DiagnosticKind::Resolution,
						node.name(),
						format!(
							"failed to find parent '{parent}' of '{}'; def will not be loaded",
							snapshot[child].name()
						),
					);
					dropped[index] = true;
				}
			}
		}

		let children = self.root.children_mut();
		for (index, composed) in folded {
			children[index] = composed;
		}
		let mut index = 0;
		children.retain(|_| {
			let keep = !dropped[index];
			index += 1;
			keep
		});
		tracing::debug!(defs = children.len(), "resolved inheritance");
	}

	/// Merges `source` into `destination`.
	pub fn merge(&self, destination: &mut DocumentNode, source: &DocumentNode) {
		if source.attr_flag("Inherit") == Some(false) {
			let name = destination.name().to_string();
			*destination = source.clone_with_name(name);
			destination.remove_attr("Inherit");
			return;
		}

		for attr in NOT_INHERITED {
			destination.remove_attr(attr);
		}
		for (key, value) in source.attributes() {
			destination.set_attr(key, value);
		}

		if destination.is_value_node() {
			destination.set_text(source.text().map(str::to_string));
			destination.children_mut().extend(source.children().iter().cloned());
			return;
		}
		if let Some(text) = source.text() {
			destination.set_text(Some(text.to_string()));
		}

		let append = destination
			.attr_flag("IsList")
			.unwrap_or_else(|| self.is_list_implied(source));
		for child in source.children() {
			let existing = if append {
				None
			} else {
				destination.children().iter().position(|c| c.name() == child.name())
			};
			match existing {
				Some(index) => self.merge(&mut destination.children_mut()[index], child),
				None => destination.push_child(child.clone()),
			}
		}
	}

	fn is_list_implied(&self, node: &DocumentNode) -> bool {
		!node.children().is_empty() && node.children().iter().all(|c| c.name() == self.list_item_name)
	}

	pub fn to_kdl_string(&self) -> String {
		self.root.to_kdl_string()
	}
}

enum Broken {
	Cycle(Vec<usize>),
	MissingParent { child: usize, parent: String },
}

/// Indices from `origin` up to its root ancestor.
fn inheritance_chain(
	nodes: &[DocumentNode],
	first_by_name: &HashMap<&str, usize>,
	origin: usize,
) -> Result<Vec<usize>, Broken> {
	let mut seen = HashSet::default();
	let mut chain = Vec::new();
	let mut current = origin;
	loop {
		if !seen.insert(current) {
			chain.push(current);
			return Err(Broken::Cycle(chain));
		}
		chain.push(current);
		let Some(parent) = nodes[current].attr("Parent") else {
			return Ok(chain);
		};
		match first_by_name.get(parent) {
			Some(&next) => current = next,
			None => {
				return Err(Broken::MissingParent {
					child: current,
					parent: parent.to_string(),
				});
			}
		}
	}
}
