//! Load sessions.
//!
//! A [`LoadSession`] owns everything one load needs: the master document, the
//! parser registry, member and type caches, and the diagnostic list. It borrows
//! its [`DefDatabase`] mutably, so a database serves one session at a time.
//!
//! Stages run in order: append sources, resolve inheritance
//! ([`LoadSession::finish_adding_defs`], implicit on first patch or on finish),
//! apply patches, then [`LoadSession::finish`] to materialize and register defs
//! and run their callbacks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use defloom_document::{Document, DocumentError, DocumentNode, parse_document};
use indexmap::IndexMap;
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;
use walkdir::WalkDir;

use crate::binding::MemberBindings;
use crate::config::{DuplicateIds, LoadConfig};
use crate::database::DefDatabase;
use crate::def::{DefHandle, DefLookup};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::materialize::{Materializer, ParseEnv};
use crate::merge::MasterDocument;
use crate::parsers::{ParserRegistry, ValueParser};
use crate::resolver::TypeResolver;
use crate::types::{TypeInfo, TypeRegistry};

/// Errors that abort a session call. Problems in the loaded data are diagnostics instead.
#[derive(Debug, Error)]
pub enum LoadError {
	/// A stage was invoked out of order.
	#[error("load stage out of order: {0}")]
	Sequencing(&'static str),
	/// A source file or directory could not be read.
	#[error("I/O error reading {path}: {source}")]
	Io { path: PathBuf, source: std::io::Error },
	/// A source is not a valid document.
	#[error("cannot read document '{origin}': {error}")]
	Document { origin: String, error: DocumentError },
}

/// Summary of a finished load.
#[derive(Debug)]
pub struct LoadReport {
	/// Defs instantiated by this load.
	pub created: usize,
	/// Existing defs repopulated in place.
	pub reused: usize,
	/// Defs in the database once the load finished.
	pub registered: usize,
	pub diagnostics: Diagnostics,
}

impl LoadReport {
	pub fn has_errors(&self) -> bool {
		self.diagnostics.has_errors()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadMode {
	Fresh,
	Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
	Appending,
	Added,
}

pub struct LoadSession<'db> {
	db: &'db mut DefDatabase,
	types: Arc<TypeRegistry>,
	config: LoadConfig,
	mode: LoadMode,
	stage: Stage,
	master: MasterDocument,
	resolver: TypeResolver,
	parsers: ParserRegistry,
	members: MemberBindings,
	diagnostics: Diagnostics,
}

impl<'db> LoadSession<'db> {
	pub(crate) fn new(db: &'db mut DefDatabase, config: LoadConfig, mode: LoadMode) -> Self {
		tracing::debug!(?mode, "load started");
		Self {
			types: Arc::clone(db.types()),
			db,
			master: MasterDocument::new(config.list_item_name.clone()),
			members: MemberBindings::new(&config),
			config,
			mode,
			stage: Stage::Appending,
			resolver: TypeResolver::new(),
			parsers: ParserRegistry::with_builtins(),
			diagnostics: Diagnostics::new(),
		}
	}

	pub fn config(&self) -> &LoadConfig {
		&self.config
	}

	/// Registers a parser after the built-ins and any parser added before.
	pub fn add_parser(&mut self, parser: impl ValueParser + 'static) {
		self.parsers.add(parser);
	}

	pub fn master(&self) -> &DocumentNode {
		self.master.root()
	}

	pub fn master_kdl(&self) -> String {
		self.master.to_kdl_string()
	}

	pub fn diagnostics(&self) -> &Diagnostics {
		&self.diagnostics
	}

	fn sequencing(&self, message: &'static str) -> LoadError {
		tracing::error!(stage = ?self.stage, "{message}");
		LoadError::Sequencing(message)
	}

	/// Adds every def node of `document` to the master document.
	///
	/// Returns the number of nodes imported.
	pub fn append_document(&mut self, document: Document, source: &str) -> Result<usize, LoadError> {
		if self.stage != Stage::Appending {
			return Err(self.sequencing("documents must be appended before finish_adding_defs"));
		}
		let imported = self.master.append(document, source, &mut self.diagnostics);
		tracing::debug!(source, imported, "appended document");
		Ok(imported)
	}

	pub fn append_kdl(&mut self, input: &str, source: &str) -> Result<usize, LoadError> {
		let document = parse_document(input).map_err(|error| LoadError::Document {
			origin: source.to_string(),
			error,
		})?;
		self.append_document(document, source)
	}

	pub fn append_file(&mut self, path: &Path) -> Result<usize, LoadError> {
		if self.stage != Stage::Appending {
			return Err(self.sequencing("files must be appended before finish_adding_defs"));
		}
		let input = read_source(path)?;
		self.append_kdl(&input, &path.display().to_string())
	}

	/// Appends every `*.kdl` file below `dir`, in path order. Returns the number of files.
	pub fn append_dir(&mut self, dir: &Path) -> Result<usize, LoadError> {
		if self.stage != Stage::Appending {
			return Err(self.sequencing("directories must be appended before finish_adding_defs"));
		}
		let files = collect_kdl_files(dir)?;
		for file in &files {
			self.append_file(file)?;
		}
		Ok(files.len())
	}

	/// Closes the append stage and resolves inheritance. Later calls do nothing.
	pub fn finish_adding_defs(&mut self) -> Result<(), LoadError> {
		if self.stage == Stage::Added {
			return Ok(());
		}
		self.master.resolve_inheritance(&mut self.diagnostics);
		self.stage = Stage::Added;
		tracing::debug!(defs = self.master.root().children().len(), "finished adding defs");
		Ok(())
	}

	/// Applies every patch under the root of `document` to the master document.
	///
	/// Closes the append stage if still open. Returns the number of patches that succeeded.
	pub fn apply_patches(&mut self, document: Document, source: &str) -> Result<usize, LoadError> {
		if self.stage == Stage::Appending {
			self.finish_adding_defs()?;
		}
		let Some(root) = document.into_root() else {
			self.diagnostics
				.warn(DiagnosticKind::Structural, source, "patch document has no root node");
			return Ok(0);
		};

		let types = Arc::clone(&self.types);
		let mut typed = Vec::new();
		for (index, node) in root.children().iter().enumerate() {
			let label = format!("{source}:{}[{index}]", node.name());
			match patch_type(&types, &self.resolver, node) {
				Ok(info) => typed.push((label, info, node)),
				Err(message) => self.diagnostics.error(DiagnosticKind::Resolution, label, message),
			}
		}

		let mut built = Vec::new();
		{
			let env = ParseEnv {
				types: &types,
				resolver: &self.resolver,
				defs: &*self.db,
				config: &self.config,
			};
			let mut materializer = Materializer::new(&env, &self.parsers, &self.members, &mut self.diagnostics);
			for (label, info, node) in typed {
				if let Some(value) = materializer.materialize_class(info, node, &label) {
					built.push((label, info, value));
				}
			}
		}

		let mut succeeded = 0;
		for (label, info, value) in built {
			let Some(patch) = info.patch_cast.and_then(|cast| cast(value).ok()) else {
				self.diagnostics.error(
					DiagnosticKind::Construction,
					label,
					format!("cannot use {} as a patch", info.name()),
				);
				continue;
			};
			let outcome = patch.execute(self.master.root_mut());
			if outcome.success {
				succeeded += 1;
				tracing::debug!(patch = %label, modifications = outcome.modifications, "applied patch");
			} else {
				self.diagnostics.warn(
					DiagnosticKind::Patch,
					label,
					format!(
						"patch of type '{}' failed: {}; {} nodes were modified",
						info.name(),
						outcome.message.as_deref().unwrap_or("nothing matched"),
						outcome.modifications
					),
				);
			}
		}
		Ok(succeeded)
	}

	pub fn apply_patches_kdl(&mut self, input: &str, source: &str) -> Result<usize, LoadError> {
		let document = parse_document(input).map_err(|error| LoadError::Document {
			origin: source.to_string(),
			error,
		})?;
		self.apply_patches(document, source)
	}

	pub fn apply_patches_file(&mut self, path: &Path) -> Result<usize, LoadError> {
		let input = read_source(path)?;
		self.apply_patches_kdl(&input, &path.display().to_string())
	}

	/// Materializes every def node, registers the defs and runs their callbacks.
	pub fn finish(mut self) -> LoadReport {
		if !self.master.is_resolved() {
			self.master.resolve_inheritance(&mut self.diagnostics);
		}
		let types = Arc::clone(&self.types);
		let nodes = self.master.root().children();

		let mut typed = Vec::with_capacity(nodes.len());
		for (index, node) in nodes.iter().enumerate() {
			if node.attr_flag("Abstract") == Some(true) {
				continue;
			}
			let id = node.name();
			if self.mode == LoadMode::Reload
				&& let Some(existing) = self.db.get(id)
			{
				match types.get(existing.type_key()) {
					Some(info) => typed.push((index, info, Some(existing.clone()))),
					None => self.diagnostics.error(
						DiagnosticKind::Resolution,
						id,
						"type of the existing def is not registered",
					),
				}
				continue;
			}
			match def_type(&types, &self.resolver, node) {
				Ok(info) => typed.push((index, info, None)),
				Err(message) => self.diagnostics.error(DiagnosticKind::Resolution, id, message),
			}
		}

		let candidates: Vec<usize> = typed.iter().map(|(index, ..)| *index).collect();
		let selected = select_defs(nodes, &candidates, self.config.duplicate_ids, &mut self.diagnostics);
		typed.retain(|(index, ..)| selected.binary_search(index).is_ok());

		let mut pending: Vec<Pending<'_>> = Vec::with_capacity(typed.len());
		for (index, info, existing) in typed {
			let node = &nodes[index];
			let id = node.name();
			if let Some(handle) = existing {
				pending.push(Pending {
					handle,
					info,
					node,
					reused: true,
				});
				continue;
			}
			let cell = match info.instantiate(None) {
				Ok(value) => info.def_cast.and_then(|cast| cast(value).ok()),
				Err(err) => {
					self.diagnostics.error(DiagnosticKind::Construction, id, err.to_string());
					continue;
				}
			};
			let Some(cell) = cell else {
				self.diagnostics.error(
					DiagnosticKind::Construction,
					id,
					format!("{} did not produce a def", info.name()),
				);
				continue;
			};
			cell.write().set_id(id);
			pending.push(Pending {
				handle: DefHandle::from_cell(cell),
				info,
				node,
				reused: false,
			});
		}

		{
			let lookup = PendingDefs {
				pending: pending.iter().map(|p| (p.handle.id(), &p.handle)).collect(),
				db: &*self.db,
			};
			let env = ParseEnv {
				types: &types,
				resolver: &self.resolver,
				defs: &lookup,
				config: &self.config,
			};
			let mut materializer = Materializer::new(&env, &self.parsers, &self.members, &mut self.diagnostics);
			for def in &pending {
				if def.reused {
					materializer.reset(def.handle.cell(), def.info, def.handle.id());
				}
				materializer.populate_def(def.handle.cell(), def.info, def.handle.id(), def.node);
			}
		}
		for parser in self.parsers.iter() {
			parser.early_post_load();
		}

		// Defs created by this load always get their callbacks; reused ones only when asked.
		let rerun = self.mode == LoadMode::Fresh || self.config.rerun_callbacks_on_reload;
		let (mut created, mut reused) = (0, 0);
		let mut loaded = Vec::with_capacity(pending.len());
		for def in pending {
			if def.reused {
				reused += 1;
				if !rerun {
					continue;
				}
			} else if self.db.register(def.handle.clone()) {
				created += 1;
			} else {
				self.diagnostics.error(
					DiagnosticKind::Resolution,
					def.handle.id(),
					"a def with this ID is already registered",
				);
				continue;
			}
			loaded.push(def.handle);
		}

		DefDatabase::run_callbacks(&loaded, &mut self.diagnostics);

		tracing::debug!(
			created,
			reused,
			errors = self.diagnostics.error_count(),
			"load finished"
		);
		LoadReport {
			created,
			reused,
			registered: self.db.len(),
			diagnostics: self.diagnostics,
		}
	}
}

struct Pending<'a> {
	handle: DefHandle,
	info: &'a TypeInfo,
	node: &'a DocumentNode,
	reused: bool,
}

/// Resolves def IDs against the defs of the running load first, then the database.
struct PendingDefs<'a> {
	pending: HashMap<&'a str, &'a DefHandle>,
	db: &'a DefDatabase,
}

impl DefLookup for PendingDefs<'_> {
	fn find_def(&self, id: &str) -> Option<DefHandle> {
		match self.pending.get(id) {
			Some(handle) => Some((*handle).clone()),
			None => self.db.find_def(id),
		}
	}
}

/// Which of the typed `candidates` (indices into `nodes`) become defs under `policy`.
///
/// Returned indices are sorted.
fn select_defs(
	nodes: &[DocumentNode],
	candidates: &[usize],
	policy: DuplicateIds,
	diagnostics: &mut Diagnostics,
) -> Vec<usize> {
	let mut by_id: IndexMap<&str, Vec<usize>> = IndexMap::new();
	for &index in candidates {
		by_id.entry(nodes[index].name()).or_default().push(index);
	}

	let mut selected = Vec::with_capacity(by_id.len());
	for (id, indices) in &by_id {
		let keep = match policy {
			DuplicateIds::FirstWins => indices.first().copied(),
			DuplicateIds::LastWins => indices.last().copied(),
			DuplicateIds::RejectAll => (indices.len() == 1).then(|| indices[0]),
		};
		for &index in indices {
			if Some(index) != keep {
				let source = nodes[index].attr("Source").unwrap_or("<unknown source>");
				diagnostics.error(
					DiagnosticKind::Resolution,
					*id,
					format!("duplicate def ID '{id}'; node from {source} skipped"),
				);
			}
		}
		selected.extend(keep);
	}
	selected.sort_unstable();
	selected
}

fn def_type<'t>(types: &'t TypeRegistry, resolver: &TypeResolver, node: &DocumentNode) -> Result<&'t TypeInfo, String> {
	let name = node
		.attr("Type")
		.ok_or_else(|| "def node has no Type attribute".to_string())?;
	let info = resolver
		.resolve(types, name)
		.and_then(|key| types.get(key))
		.ok_or_else(|| format!("cannot resolve def type '{name}'"))?;
	if info.is_abstract() {
		return Err(format!("def type '{name}' is abstract"));
	}
	if !info.is_def() {
		return Err(format!("type '{name}' is not a def type"));
	}
	Ok(info)
}

fn patch_type<'t>(types: &'t TypeRegistry, resolver: &TypeResolver, node: &DocumentNode) -> Result<&'t TypeInfo, String> {
	let name = node
		.attr("Type")
		.ok_or_else(|| "patch node has no Type attribute".to_string())?;
	let info = resolver
		.resolve(types, name)
		.and_then(|key| types.get(key))
		.ok_or_else(|| format!("cannot resolve patch type '{name}'"))?;
	if !info.is_patch() {
		return Err(format!("type '{name}' is not a patch type"));
	}
	Ok(info)
}

fn read_source(path: &Path) -> Result<String, LoadError> {
	std::fs::read_to_string(path).map_err(|source| LoadError::Io {
		path: path.to_path_buf(),
		source,
	})
}

/// Every `*.kdl` file below `root`, sorted by path.
fn collect_kdl_files(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
	let mut paths = Vec::new();
	for entry in WalkDir::new(root) {
		let entry = entry.map_err(|err| LoadError::Io {
			path: err.path().unwrap_or(root).to_path_buf(),
			source: err.into(),
		})?;
		if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "kdl") {
			paths.push(entry.into_path());
		}
	}
	paths.sort();
	Ok(paths)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TypeRegistryBuilder;

	fn database() -> DefDatabase {
		DefDatabase::new(Arc::new(TypeRegistryBuilder::new().build()))
	}

	#[test]
	fn stages_run_in_order() {
		let mut db = database();
		let mut session = db.start_loading(LoadConfig::default());
		session.append_kdl("Defs { A { Damage 1 } }", "a.kdl").expect("append succeeds");
		session.finish_adding_defs().expect("first call succeeds");
		session.finish_adding_defs().expect("later calls are no-ops");

		assert!(matches!(
			session.append_kdl("Defs { B }", "b.kdl"),
			Err(LoadError::Sequencing(_))
		));
	}

	#[test]
	fn patches_close_the_append_stage() {
		let mut db = database();
		let mut session = db.start_loading(LoadConfig::default());
		session.append_kdl("Defs { A { Damage 1 } }", "a.kdl").expect("append succeeds");
		session
			.apply_patches_kdl("Patches", "patches.kdl")
			.expect("an empty patch document is fine");
		assert!(matches!(
			session.append_kdl("Defs { B }", "b.kdl"),
			Err(LoadError::Sequencing(_))
		));
	}

	#[test]
	fn invalid_sources_are_errors() {
		let mut db = database();
		let mut session = db.start_loading(LoadConfig::default());
		let err = session.append_kdl("Defs {", "broken.kdl").expect_err("source is not KDL");
		assert!(matches!(err, LoadError::Document { ref origin, .. } if origin == "broken.kdl"));

		let err = session
			.append_file(Path::new("/nonexistent/defs.kdl"))
			.expect_err("file does not exist");
		assert!(matches!(err, LoadError::Io { .. }));
	}

	#[test]
	fn patches_then_finish_adding_defs_is_allowed() {
		let mut db = database();
		let mut session = db.start_loading(LoadConfig::default());
		session
			.append_kdl("Defs { A { Damage 1 }; B Parent=\"A\" }", "a.kdl")
			.expect("append succeeds");
		session
			.apply_patches_kdl("Patches", "patches.kdl")
			.expect("an empty patch document is fine");
		session.finish_adding_defs().expect("the stage is already closed");
		let damage = session.master().child("B").and_then(|b| b.child("Damage"));
		assert_eq!(damage.and_then(DocumentNode::text), Some("1"));
		assert_eq!(session.master().children().len(), 2);
	}

	#[test]
	fn duplicate_policies_pick_the_surviving_node() {
		let nodes = vec![
			DocumentNode::new("Gun").with_text("1"),
			DocumentNode::new("Knife").with_text("untyped"),
			DocumentNode::new("Gun").with_text("2"),
			DocumentNode::new("Gun").with_text("3"),
			DocumentNode::new("Knife"),
		];
		let typed = [0, 2, 4];
		let cases = [
			(DuplicateIds::FirstWins, vec![0, 4]),
			(DuplicateIds::LastWins, vec![2, 4]),
			(DuplicateIds::RejectAll, vec![4]),
		];
		for (policy, expected) in cases {
			let mut diagnostics = Diagnostics::new();
			assert_eq!(select_defs(&nodes, &typed, policy, &mut diagnostics), expected, "{policy:?}");
			let expected_errors = if policy == DuplicateIds::RejectAll { 2 } else { 1 };
			assert_eq!(diagnostics.error_count(), expected_errors, "{policy:?}");
		}
	}
}
