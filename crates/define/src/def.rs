//! The def capability, shared def handles and typed references.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::types::TypeKey;

/// Upcast to [`Any`] for trait objects.
pub trait AsAny: Any {
	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// A uniquely identified definition produced by a load.
///
/// The callbacks run once all defs of a load are materialized, in three passes
/// over every def: `post_load`, then `late_post_load`, then `config_errors`. A
/// failing callback is reported against the def and does not affect the others.
pub trait Def: AsAny + Send + Sync {
	fn id(&self) -> &str;

	fn set_id(&mut self, id: &str);

	fn post_load(&mut self) -> anyhow::Result<()> {
		Ok(())
	}

	fn late_post_load(&mut self) -> anyhow::Result<()> {
		Ok(())
	}

	/// Reports configuration problems. Runs after both load passes.
	fn config_errors(&self, _report: &mut ConfigErrorReporter<'_>) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Implements [`Def::id`] and [`Def::set_id`] over a `String` field.
///
/// ```ignore
/// impl Def for GunDef {
///     def_identity!(id);
/// }
/// ```
#[macro_export]
macro_rules! def_identity {
	($field:ident) => {
		fn id(&self) -> &str {
			&self.$field
		}

		fn set_id(&mut self, id: &str) {
			self.$field = id.to_string();
		}
	};
}

/// Shared, lockable storage of one def.
pub type DefCell = Arc<RwLock<dyn Def>>;

/// Shared handle to a registered def.
///
/// Cloning is cheap. Handles compare by identity through [`DefHandle::ptr_eq`];
/// a reload repopulates the same cell, so handles held across a reload stay valid.
#[derive(Clone)]
pub struct DefHandle {
	id: Arc<str>,
	ty: TypeKey,
	cell: DefCell,
}

impl DefHandle {
	pub fn new<T: Def>(def: T) -> Self {
		Self {
			id: def.id().into(),
			ty: TypeKey::of::<T>(),
			cell: Arc::new(RwLock::new(def)),
		}
	}

	pub(crate) fn from_cell(cell: DefCell) -> Self {
		let (id, ty) = {
			let def = cell.read();
			(Arc::from(def.id()), TypeKey::of_any((*def).as_any()))
		};
		Self { id, ty, cell }
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Runtime type of the def.
	pub fn type_key(&self) -> TypeKey {
		self.ty
	}

	pub fn read(&self) -> RwLockReadGuard<'_, dyn Def> {
		self.cell.read()
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, dyn Def> {
		self.cell.write()
	}

	/// Borrows the def as its concrete type.
	pub fn read_as<T: Def>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
		RwLockReadGuard::try_map(self.cell.read(), |def| def.as_any().downcast_ref::<T>()).ok()
	}

	pub fn write_as<T: Def>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
		RwLockWriteGuard::try_map(self.cell.write(), |def| def.as_any_mut().downcast_mut::<T>()).ok()
	}

	pub fn ptr_eq(&self, other: &DefHandle) -> bool {
		Arc::ptr_eq(&self.cell, &other.cell)
	}

	pub(crate) fn cell(&self) -> &DefCell {
		&self.cell
	}
}

impl fmt::Debug for DefHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DefHandle")
			.field("id", &self.id)
			.field("type", &self.ty)
			.finish_non_exhaustive()
	}
}

/// Typed reference to a def, written in documents as the def's ID.
///
/// `T` is the expected def type or a marker supertype declared with
/// `ClassBuilder::base`, e.g. `DefRef<dyn Weapon>`.
pub struct DefRef<T: ?Sized> {
	handle: DefHandle,
	_marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized> DefRef<T> {
	pub(crate) fn new(handle: DefHandle) -> Self {
		Self {
			handle,
			_marker: PhantomData,
		}
	}

	pub fn id(&self) -> &str {
		self.handle.id()
	}

	pub fn handle(&self) -> &DefHandle {
		&self.handle
	}
}

impl<T: Def> DefRef<T> {
	/// Borrows the referenced def. `None` only if the def is currently locked for writing
	/// or was registered under a different concrete type.
	pub fn get(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
		let guard = self.handle.cell.try_read()?;
		RwLockReadGuard::try_map(guard, |def| def.as_any().downcast_ref::<T>()).ok()
	}
}

impl<T: ?Sized> Clone for DefRef<T> {
	fn clone(&self) -> Self {
		Self::new(self.handle.clone())
	}
}

impl<T: ?Sized> fmt::Debug for DefRef<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("DefRef").field(&self.handle.id()).finish()
	}
}

impl<T: ?Sized> PartialEq for DefRef<T> {
	fn eq(&self, other: &Self) -> bool {
		self.handle.ptr_eq(&other.handle)
	}
}

impl<T: ?Sized> Eq for DefRef<T> {}

impl<T: ?Sized> Hash for DefRef<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		std::ptr::hash(Arc::as_ptr(&self.handle.cell) as *const (), state);
	}
}

/// Resolves def IDs while a load is running.
pub trait DefLookup {
	fn find_def(&self, id: &str) -> Option<DefHandle>;
}

/// Collects configuration problems reported by one def.
///
/// Every message is recorded against the def's ID.
pub struct ConfigErrorReporter<'a> {
	def_id: &'a str,
	diagnostics: &'a mut Diagnostics,
}

impl<'a> ConfigErrorReporter<'a> {
	pub(crate) fn new(def_id: &'a str, diagnostics: &'a mut Diagnostics) -> Self {
		Self { def_id, diagnostics }
	}

	pub fn def_id(&self) -> &str {
		self.def_id
	}

	pub fn error(&mut self, message: impl Into<String>) {
		self.diagnostics.error(DiagnosticKind::Config, self.def_id, message);
	}

	pub fn error_with(&mut self, message: impl fmt::Display, error: &anyhow::Error) {
		self.diagnostics
			.error(DiagnosticKind::Config, self.def_id, format!("{message}: {error:#}"));
	}

	pub fn warn(&mut self, message: impl Into<String>) {
		self.diagnostics.warn(DiagnosticKind::Config, self.def_id, message);
	}

	/// Records an error unless `condition` holds, and returns `condition`.
	pub fn assert(&mut self, condition: bool, message: &str) -> bool {
		if !condition {
			self.error(format!("Assert failed: {message}"));
		}
		condition
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diagnostics::Severity;

	#[derive(Default)]
	struct PlantDef {
		id: String,
		growth: u32,
	}

	impl Def for PlantDef {
		def_identity!(id);
	}

	struct OtherDef {
		id: String,
	}

	impl Def for OtherDef {
		def_identity!(id);
	}

	#[test]
	fn handles_downcast_to_their_concrete_type() {
		let handle = DefHandle::new(PlantDef {
			id: "Fern".into(),
			growth: 3,
		});
		assert_eq!(handle.id(), "Fern");
		assert_eq!(handle.type_key(), TypeKey::of::<PlantDef>());
		assert_eq!(handle.read_as::<PlantDef>().map(|p| p.growth), Some(3));
		assert!(handle.read_as::<OtherDef>().is_none());

		if let Some(mut plant) = handle.write_as::<PlantDef>() {
			plant.growth = 7;
		}
		let reference = DefRef::<PlantDef>::new(handle.clone());
		assert_eq!(reference.get().map(|p| p.growth), Some(7));
		assert_eq!(reference, DefRef::new(handle.clone()));
	}

	#[test]
	fn handles_rebuilt_from_cells_keep_identity() {
		let handle = DefHandle::new(OtherDef { id: "Rock".into() });
		let rebuilt = DefHandle::from_cell(handle.cell().clone());
		assert!(rebuilt.ptr_eq(&handle));
		assert_eq!(rebuilt.id(), "Rock");
		assert_eq!(rebuilt.type_key(), TypeKey::of::<OtherDef>());
	}

	#[test]
	fn reporter_tags_messages_with_the_def() {
		let mut diagnostics = Diagnostics::new();
		let mut report = ConfigErrorReporter::new("Fern", &mut diagnostics);
		assert!(report.assert(true, "never shown"));
		assert!(!report.assert(false, "growth > 0"));
		report.warn("slow growth");

		let messages: Vec<String> = diagnostics.iter().map(ToString::to_string).collect();
		assert_eq!(messages, ["[Fern] Assert failed: growth > 0", "[Fern] slow growth"]);
		assert_eq!(diagnostics.iter().next().map(|d| d.severity), Some(Severity::Error));
	}
}
