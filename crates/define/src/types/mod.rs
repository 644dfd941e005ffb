//! Explicit type descriptors.
//!
//! Every type a document can produce is described once at startup by a
//! [`TypeInfo`]: its names, its [`Shape`] (how nodes map onto it), how to construct
//! it, and which capabilities (def, patch, construct hooks) it has. The
//! materializer works purely against these descriptors and `dyn Any` values.

mod bindable;
mod registry;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

pub use bindable::Bindable;
pub use registry::{AbstractBuilder, ClassBuilder, SchemaInfo, TypeRegistry, TypeRegistryBuilder};
use thiserror::Error;

use crate::binding::MemberDescriptor;
use crate::def::{DefCell, DefHandle};
use crate::materialize::ParseContext;
use crate::patch::Patch;

/// A type-erased value produced or consumed by the materializer.
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// Identity of a registered type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(TypeId);

impl TypeKey {
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self(TypeId::of::<T>())
	}

	/// Runtime type of an erased value.
	pub fn of_value(value: &(dyn Any + Send + Sync)) -> Self {
		Self(value.type_id())
	}

	pub fn of_any(value: &dyn Any) -> Self {
		Self(value.type_id())
	}
}

impl fmt::Debug for TypeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TypeKey({:?})", self.0)
	}
}

/// Constructs a fresh value. Failures carry a human-readable reason.
pub type Constructor = Arc<dyn Fn() -> Result<AnyValue, String> + Send + Sync>;
pub(crate) type PreConstructHook = fn(&mut dyn Any, Option<&ParseContext<'_>>);
pub(crate) type PostConstructHook = fn(&mut dyn Any, &ParseContext<'_>);
pub(crate) type DefCast = fn(AnyValue) -> Result<DefCell, AnyValue>;
pub(crate) type PatchCast = fn(AnyValue) -> Result<Box<dyn Patch>, AnyValue>;
pub(crate) type Upcast = Arc<dyn Fn(AnyValue) -> Result<AnyValue, AnyValue> + Send + Sync>;

/// Result of inserting into a type-erased map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapInsert {
	Inserted,
	/// The key was already present; its value was replaced.
	Replaced,
	/// Key or value had the wrong runtime type.
	Mismatch,
}

/// How document nodes map onto a type.
pub enum Shape {
	/// Plain value handled by a parser.
	Scalar,
	/// Named variants handled by the enum parser.
	Enum {
		names: Vec<&'static str>,
		parse: Arc<dyn Fn(&str) -> Option<AnyValue> + Send + Sync>,
	},
	/// `Option<inner>`; a null write stores `None`.
	Nullable {
		inner: TypeKey,
		wrap_some: fn(AnyValue) -> Result<AnyValue, AnyValue>,
		take_inner: fn(AnyValue) -> Option<AnyValue>,
		make_none: fn() -> AnyValue,
	},
	/// Growable sequence; children are elements.
	List {
		element: TypeKey,
		push: fn(&mut dyn Any, AnyValue) -> Result<(), AnyValue>,
		len: fn(&dyn Any) -> usize,
	},
	/// Keyed map; child names are keys, child content is the value.
	Map {
		key: TypeKey,
		value: TypeKey,
		insert: fn(&mut dyn Any, AnyValue, AnyValue) -> MapInsert,
	},
	/// Struct populated member by member.
	Class { members: Vec<MemberDescriptor> },
	/// Non-instantiable supertype; values come from implementors through an upcast.
	Abstract { implementors: Vec<Implementor> },
	/// Reference to a def by ID.
	DefRef {
		target: TypeKey,
		make: fn(DefHandle) -> AnyValue,
	},
}

impl fmt::Debug for Shape {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Shape::Scalar => f.write_str("Scalar"),
			Shape::Enum { names, .. } => f.debug_struct("Enum").field("names", names).finish(),
			Shape::Nullable { inner, .. } => f.debug_struct("Nullable").field("inner", inner).finish(),
			Shape::List { element, .. } => f.debug_struct("List").field("element", element).finish(),
			Shape::Map { key, value, .. } => f.debug_struct("Map").field("key", key).field("value", value).finish(),
			Shape::Class { members } => f.debug_struct("Class").field("members", members).finish(),
			Shape::Abstract { implementors } => f
				.debug_struct("Abstract")
				.field("implementors", &implementors.iter().map(|i| i.key).collect::<Vec<_>>())
				.finish(),
			Shape::DefRef { target, .. } => f.debug_struct("DefRef").field("target", target).finish(),
		}
	}
}

/// A concrete type that can stand in for an abstract one.
#[derive(Clone)]
pub struct Implementor {
	pub(crate) key: TypeKey,
	pub(crate) upcast: Upcast,
}

/// Errors raised when instantiating a type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstructError {
	/// The type is abstract; a concrete implementor must be named.
	#[error("cannot create an instance of abstract type '{0}'")]
	Abstract(String),
	/// The type was registered without a constructor.
	#[error("type '{0}' has no constructor")]
	NoConstructor(String),
	/// The constructor reported a failure.
	#[error("failed to create an instance of '{ty}': {reason}")]
	Failed { ty: String, reason: String },
}

/// Descriptor of one registered type.
pub struct TypeInfo {
	pub(crate) key: TypeKey,
	pub(crate) name: String,
	pub(crate) full_name: String,
	pub(crate) schema: usize,
	pub(crate) shape: Shape,
	pub(crate) bases: Vec<TypeKey>,
	pub(crate) construct: Option<Constructor>,
	pub(crate) pre_construct: Option<PreConstructHook>,
	pub(crate) post_construct: Option<PostConstructHook>,
	pub(crate) def_cast: Option<DefCast>,
	pub(crate) patch_cast: Option<PatchCast>,
}

impl TypeInfo {
	pub(crate) fn new(key: TypeKey, full_name: impl Into<String>, schema: usize, shape: Shape) -> Self {
		let full_name = full_name.into();
		Self {
			key,
			name: short_name(&full_name).to_string(),
			full_name,
			schema,
			shape,
			bases: Vec::new(),
			construct: None,
			pre_construct: None,
			post_construct: None,
			def_cast: None,
			patch_cast: None,
		}
	}

	/// Descriptor for a generic container; its display name is used as both names.
	pub(crate) fn container(key: TypeKey, name: String, shape: Shape) -> Self {
		let mut info = Self::new(key, name.clone(), 0, shape);
		info.name = name;
		info
	}

	pub(crate) fn with_default<T: Default + Send + Sync + 'static>(mut self) -> Self {
		self.construct = Some(Arc::new(|| Ok(Box::new(T::default()) as AnyValue)));
		self
	}

	pub fn key(&self) -> TypeKey {
		self.key
	}

	/// Short name (last path segment of the full name).
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn full_name(&self) -> &str {
		&self.full_name
	}

	pub fn schema_index(&self) -> usize {
		self.schema
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn bases(&self) -> &[TypeKey] {
		&self.bases
	}

	pub fn members(&self) -> Option<&[MemberDescriptor]> {
		match &self.shape {
			Shape::Class { members } => Some(members),
			_ => None,
		}
	}

	pub fn is_abstract(&self) -> bool {
		matches!(self.shape, Shape::Abstract { .. })
	}

	pub fn is_def(&self) -> bool {
		self.def_cast.is_some()
	}

	pub fn is_patch(&self) -> bool {
		self.patch_cast.is_some()
	}

	pub(crate) fn post_construct_hook(&self) -> Option<PostConstructHook> {
		self.post_construct
	}

	/// Creates a fresh instance and runs the pre-construct hook.
	pub fn instantiate(&self, ctx: Option<&ParseContext<'_>>) -> Result<AnyValue, ConstructError> {
		if self.is_abstract() {
			return Err(ConstructError::Abstract(self.full_name.clone()));
		}
		let construct = self
			.construct
			.as_ref()
			.ok_or_else(|| ConstructError::NoConstructor(self.full_name.clone()))?;
		let mut value = construct().map_err(|reason| ConstructError::Failed {
			ty: self.full_name.clone(),
			reason,
		})?;
		if let Some(hook) = self.pre_construct {
			hook(&mut *value, ctx);
		}
		Ok(value)
	}
}

impl fmt::Debug for TypeInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TypeInfo")
			.field("full_name", &self.full_name)
			.field("shape", &self.shape)
			.field("bases", &self.bases)
			.finish_non_exhaustive()
	}
}

pub(crate) fn short_name(full_name: &str) -> &str {
	full_name.rsplit(['.', ':']).next().unwrap_or(full_name)
}

/// Short form of a Rust type name, e.g. `dyn game::Weapon` becomes `Weapon`.
pub(crate) fn rust_short_name<T: ?Sized>() -> &'static str {
	let name = std::any::type_name::<T>();
	name.rsplit(['.', ':', ' ']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_names_drop_namespaces() {
		assert_eq!(short_name("Game.Items.GunDef"), "GunDef");
		assert_eq!(short_name("game::GunDef"), "GunDef");
		assert_eq!(short_name("GunDef"), "GunDef");
	}

	#[test]
	fn value_keys_see_through_boxes() {
		let value: AnyValue = Box::new(5i32);
		assert_eq!(TypeKey::of_value(value.as_ref()), TypeKey::of::<i32>());
	}

	#[test]
	fn abstract_types_refuse_instantiation() {
		let info = TypeInfo::new(TypeKey::of::<u8>(), "Game.Effect", 0, Shape::Abstract { implementors: Vec::new() });
		assert_eq!(info.instantiate(None).err(), Some(ConstructError::Abstract("Game.Effect".into())));
	}
}
