//! Structured load diagnostics.
//!
//! Every recoverable problem found while loading becomes a [`Diagnostic`]. They are
//! collected per session, emitted as `tracing` events when recorded, and returned
//! with the load report. Nothing here aborts a load.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Warning,
	Error,
}

/// Which stage of the pipeline produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
	/// A source or patch document is missing its root node.
	Structural,
	/// A type name, parent name or def ID could not be resolved, or collided.
	Resolution,
	/// A value could not be parsed or assigned.
	Conversion,
	/// An instance could not be constructed.
	Construction,
	/// A def callback failed.
	Lifecycle,
	/// A def reported a problem with its own configuration.
	Config,
	/// A patch failed or modified nothing.
	Patch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
	pub severity: Severity,
	pub kind: DiagnosticKind,
	/// Where the problem was found: a def ID, a node path, or a source label.
	pub path: String,
	pub message: String,
}

impl fmt::Display for Diagnostic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.path.is_empty() {
			f.write_str(&self.message)
		} else {
			write!(f, "[{}] {}", self.path, self.message)
		}
	}
}

/// Ordered diagnostic sink.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
	entries: Vec<Diagnostic>,
}

impl Diagnostics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, diagnostic: Diagnostic) {
		match diagnostic.severity {
			Severity::Warning => {
				tracing::warn!(kind = ?diagnostic.kind, path = %diagnostic.path, "{}", diagnostic.message)
			}
			Severity::Error => {
				tracing::error!(kind = ?diagnostic.kind, path = %diagnostic.path, "{}", diagnostic.message)
			}
		}
		self.entries.push(diagnostic);
	}

	pub fn error(&mut self, kind: DiagnosticKind, path: impl Into<String>, message: impl Into<String>) {
		self.push(Diagnostic {
			severity: Severity::Error,
			kind,
			path: path.into(),
			message: message.into(),
		});
	}

	pub fn warn(&mut self, kind: DiagnosticKind, path: impl Into<String>, message: impl Into<String>) {
		self.push(Diagnostic {
			severity: Severity::Warning,
			kind,
			path: path.into(),
			message: message.into(),
		});
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn error_count(&self) -> usize {
		self.entries.iter().filter(|d| d.severity == Severity::Error).count()
	}

	pub fn has_errors(&self) -> bool {
		self.entries.iter().any(|d| d.severity == Severity::Error)
	}

	/// Diagnostics of one kind, in recording order.
	pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
		self.entries.iter().filter(move |d| d.kind == kind)
	}

	pub fn into_vec(self) -> Vec<Diagnostic> {
		self.entries
	}
}

impl<'a> IntoIterator for &'a Diagnostics {
	type Item = &'a Diagnostic;
	type IntoIter = std::slice::Iter<'a, Diagnostic>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_prefixes_path() {
		let diagnostic = Diagnostic {
			severity: Severity::Error,
			kind: DiagnosticKind::Config,
			path: "Rifle".into(),
			message: "range must be positive".into(),
		};
		assert_eq!(diagnostic.to_string(), "[Rifle] range must be positive");
	}

	#[test]
	fn counts_errors_only() {
		let mut diagnostics = Diagnostics::new();
		diagnostics.warn(DiagnosticKind::Patch, "", "patch modified nothing");
		diagnostics.error(DiagnosticKind::Resolution, "Gun", "unknown type");
		assert_eq!(diagnostics.len(), 2);
		assert_eq!(diagnostics.error_count(), 1);
		assert!(diagnostics.has_errors());
		assert_eq!(diagnostics.of_kind(DiagnosticKind::Patch).count(), 1);
		assert_eq!(diagnostics.iter().next().map(|d| d.to_string()), Some("patch modified nothing".to_string()));
	}
}
