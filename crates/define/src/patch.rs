//! Patches: typed mutations applied to the master tree after inheritance.

use defloom_document::{DocumentNode, NodePath, Selector};

use crate::types::{Bindable, TypeKey, TypeRegistryBuilder};

/// Result of executing one patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
	pub success: bool,
	pub modifications: usize,
	pub message: Option<String>,
}

impl PatchOutcome {
	/// Successful when at least one node was modified.
	pub fn from_count(modifications: usize) -> Self {
		Self {
			success: modifications > 0,
			modifications,
			message: None,
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			success: false,
			modifications: 0,
			message: Some(message.into()),
		}
	}
}

/// A mutation of the master tree.
///
/// Patch types are populated from patch documents like any other class and
/// registered with `ClassBuilder::patch`.
pub trait Patch: Send + Sync {
	/// Applies the patch to the master root node.
	fn execute(&self, root: &mut DocumentNode) -> PatchOutcome;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Operation {
	/// Append `Value` to matched nodes lacking a child of the same name.
	Add,
	/// Replace the first same-named child of matched nodes.
	Modify,
	/// Replace when present, append otherwise.
	#[default]
	ModifyOrAdd,
	/// Remove matched nodes.
	Remove,
}

crate::bind_enum!(Operation, "defloom.PatchOperation", { Add, Modify, ModifyOrAdd, Remove });

/// The built-in patch: select nodes by `Path` and add, replace or remove children.
///
/// `Value` is a wrapper node; its first child is the fragment that gets inserted.
///
/// ```kdl
/// Patches {
///     - Type="ModifyPatch" {
///         Path "Gun"
///         Operation "Add"
///         Value { Range 12 }
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyPatch {
	pub path: String,
	pub operation: Operation,
	pub value: Option<DocumentNode>,
}

impl Bindable for ModifyPatch {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("defloom.ModifyPatch")
			.field("Path", |p| &mut p.path)
			.field("Operation", |p| &mut p.operation)
			.field("Value", |p| &mut p.value)
			.patch()
			.finish()
	}
}

impl Patch for ModifyPatch {
	fn execute(&self, root: &mut DocumentNode) -> PatchOutcome {
		let selector = match Selector::parse(&self.path) {
			Ok(selector) => selector,
			Err(err) => return PatchOutcome::failed(format!("invalid Path '{}': {err}", self.path)),
		};
		let matches = selector.select(root);

		if self.operation == Operation::Remove {
			let removed = matches
				.iter()
				.rev()
				.filter(|path| root.remove_at(path).is_some())
				.count();
			return PatchOutcome::from_count(removed);
		}

		let Some(fragment) = self.value.as_ref().and_then(|value| value.children().first()) else {
			return PatchOutcome::failed(format!(
				"Value must contain a node when Operation is {:?}",
				self.operation
			));
		};

		let mut modifications = 0;
		// Matches inside a replaced child no longer exist in the tree.
		let mut replaced: Vec<NodePath> = Vec::new();
		for path in &matches {
			if replaced.iter().any(|r| path.starts_with(r)) {
				continue;
			}
			let Some(node) = root.descendant_at_mut(path) else {
				continue;
			};
			let existing = node.children().iter().position(|c| c.name() == fragment.name());
			match (self.operation, existing) {
				(Operation::Add | Operation::ModifyOrAdd, None) => node.push_child(fragment.clone()),
				(Operation::Modify | Operation::ModifyOrAdd, Some(index)) => {
					node.children_mut()[index] = fragment.clone();
					let mut child = path.clone();
					child.push(index);
					replaced.push(child);
				}
				_ => continue,
			}
			modifications += 1;
		}
		PatchOutcome::from_count(modifications)
	}
}
