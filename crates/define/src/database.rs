//! The def database: ID and type indices over loaded defs.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap as HashMap;

use crate::config::LoadConfig;
use crate::def::{ConfigErrorReporter, Def, DefHandle, DefLookup};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::session::{LoadMode, LoadSession};
use crate::types::{TypeKey, TypeRegistry};

/// Every def produced by completed loads, indexed by ID and by type.
///
/// A def is indexed under its runtime type and every supertype declared for it,
/// so [`DefDatabase::all_of`] also answers queries for marker supertypes.
pub struct DefDatabase {
	types: Arc<TypeRegistry>,
	by_id: IndexMap<Arc<str>, DefHandle>,
	by_type: HashMap<TypeKey, Vec<DefHandle>>,
}

impl DefDatabase {
	pub fn new(types: Arc<TypeRegistry>) -> Self {
		Self {
			types,
			by_id: IndexMap::new(),
			by_type: HashMap::default(),
		}
	}

	pub fn types(&self) -> &Arc<TypeRegistry> {
		&self.types
	}

	/// Opens a fresh load. The database is cleared first.
	pub fn start_loading(&mut self, config: LoadConfig) -> LoadSession<'_> {
		self.clear();
		LoadSession::new(self, config, LoadMode::Fresh)
	}

	/// Opens a reload. Defs whose ID is loaded again are repopulated in place.
	pub fn start_reload(&mut self, config: LoadConfig) -> LoadSession<'_> {
		LoadSession::new(self, config, LoadMode::Reload)
	}

	/// Indexes `handle`. Returns `false` for an empty or already registered ID.
	pub fn register(&mut self, handle: DefHandle) -> bool {
		if handle.id().is_empty() || self.by_id.contains_key(handle.id()) {
			return false;
		}
		for key in self.index_keys(handle.type_key()) {
			self.by_type.entry(key).or_default().push(handle.clone());
		}
		self.by_id.insert(Arc::from(handle.id()), handle);
		true
	}

	pub fn unregister(&mut self, id: &str) -> Option<DefHandle> {
		let handle = self.by_id.shift_remove(id)?;
		for key in self.index_keys(handle.type_key()) {
			if let Some(list) = self.by_type.get_mut(&key) {
				list.retain(|h| !h.ptr_eq(&handle));
				if list.is_empty() {
					self.by_type.remove(&key);
				}
			}
		}
		Some(handle)
	}

	fn index_keys(&self, ty: TypeKey) -> Vec<TypeKey> {
		let mut keys = vec![ty];
		keys.extend(self.types.supertypes(ty));
		keys
	}

	pub fn get(&self, id: &str) -> Option<&DefHandle> {
		self.by_id.get(id)
	}

	/// Looks up a def and checks its concrete type.
	pub fn get_as<T: Def>(&self, id: &str) -> Option<&DefHandle> {
		self.get(id).filter(|h| h.type_key() == TypeKey::of::<T>())
	}

	/// Every def in registration order.
	pub fn all(&self) -> impl Iterator<Item = &DefHandle> {
		self.by_id.values()
	}

	/// Defs whose type is `T` or declares `T` as a supertype.
	pub fn all_of<T: ?Sized + 'static>(&self) -> &[DefHandle] {
		self.all_of_key(TypeKey::of::<T>())
	}

	pub fn all_of_key(&self, key: TypeKey) -> &[DefHandle] {
		self.by_type.get(&key).map(Vec::as_slice).unwrap_or_default()
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_id.is_empty()
	}

	pub fn clear(&mut self) {
		self.by_id.clear();
		self.by_type.clear();
	}

	/// Runs `post_load` on every def, then `late_post_load`, then `config_errors`.
	pub(crate) fn run_callbacks(defs: &[DefHandle], diagnostics: &mut Diagnostics) {
		for handle in defs {
			if let Err(err) = handle.write().post_load() {
				diagnostics.error(DiagnosticKind::Lifecycle, handle.id(), format!("post_load failed: {err:#}"));
			}
		}
		for handle in defs {
			if let Err(err) = handle.write().late_post_load() {
				diagnostics.error(
					DiagnosticKind::Lifecycle,
					handle.id(),
					format!("late_post_load failed: {err:#}"),
				);
			}
		}
		for handle in defs {
			let def = handle.read();
			let result = def.config_errors(&mut ConfigErrorReporter::new(handle.id(), diagnostics));
			if let Err(err) = result {
				diagnostics.error(
					DiagnosticKind::Lifecycle,
					handle.id(),
					format!("config_errors failed: {err:#}"),
				);
			}
		}
	}
}

impl DefLookup for DefDatabase {
	fn find_def(&self, id: &str) -> Option<DefHandle> {
		self.get(id).cloned()
	}
}

impl std::fmt::Debug for DefDatabase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DefDatabase")
			.field("defs", &self.by_id.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{Bindable, TypeRegistryBuilder};

	trait Weapon {}

	#[derive(Default)]
	struct SwordDef {
		id: String,
	}

	impl Def for SwordDef {
		crate::def_identity!(id);
	}

	impl Weapon for SwordDef {}

	impl Bindable for SwordDef {
		fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
			reg.class::<Self>("Game.SwordDef").base::<dyn Weapon>().def().finish()
		}
	}

	#[derive(Default)]
	struct ShieldDef {
		id: String,
	}

	impl Def for ShieldDef {
		crate::def_identity!(id);

		fn post_load(&mut self) -> anyhow::Result<()> {
			anyhow::bail!("shield {} has no straps", self.id)
		}

		fn config_errors(&self, report: &mut ConfigErrorReporter<'_>) -> anyhow::Result<()> {
			report.warn("heavy");
			Ok(())
		}
	}

	impl Bindable for ShieldDef {
		fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
			reg.class::<Self>("Game.ShieldDef").def().finish()
		}
	}

	fn database() -> DefDatabase {
		let mut builder = TypeRegistryBuilder::new();
		builder.schema("game");
		builder.register::<SwordDef>();
		builder.register::<ShieldDef>();
		DefDatabase::new(Arc::new(builder.build()))
	}

	#[test]
	fn register_rejects_empty_and_duplicate_ids() {
		let mut db = database();
		assert!(db.register(DefHandle::new(SwordDef { id: "Gladius".into() })));
		assert!(!db.register(DefHandle::new(SwordDef { id: "Gladius".into() })));
		assert!(!db.register(DefHandle::new(SwordDef::default())));
		assert_eq!(db.len(), 1);
	}

	#[test]
	fn defs_are_indexed_by_supertype() {
		let mut db = database();
		db.register(DefHandle::new(SwordDef { id: "Gladius".into() }));
		db.register(DefHandle::new(ShieldDef { id: "Buckler".into() }));

		assert_eq!(db.all_of::<dyn Weapon>().len(), 1);
		assert_eq!(db.all_of::<SwordDef>().len(), 1);
		assert!(db.get_as::<SwordDef>("Gladius").is_some());
		assert!(db.get_as::<ShieldDef>("Gladius").is_none());

		let removed = db.unregister("Gladius").expect("gladius was registered");
		assert_eq!(removed.id(), "Gladius");
		assert!(db.all_of::<dyn Weapon>().is_empty());
		assert_eq!(db.all().map(DefHandle::id).collect::<Vec<_>>(), ["Buckler"]);
	}

	#[test]
	fn callback_failures_are_isolated() {
		let defs = vec![
			DefHandle::new(ShieldDef { id: "Buckler".into() }),
			DefHandle::new(SwordDef { id: "Gladius".into() }),
		];
		let mut diagnostics = Diagnostics::new();
		DefDatabase::run_callbacks(&defs, &mut diagnostics);

		let lifecycle: Vec<String> = diagnostics
			.of_kind(DiagnosticKind::Lifecycle)
			.map(ToString::to_string)
			.collect();
		assert_eq!(lifecycle, ["[Buckler] post_load failed: shield Buckler has no straps"]);
		assert_eq!(diagnostics.of_kind(DiagnosticKind::Config).count(), 1);
	}
}
