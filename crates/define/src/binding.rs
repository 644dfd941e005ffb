//! Member descriptors and the per-type binding lookup.
//!
//! Members are registered explicitly through the class builder. Each carries a
//! [`MemberAccess`] that moves values in and out of a type-erased owner, so the
//! materializer never needs to know the concrete owner type.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

use crate::config::{LoadConfig, MemberKinds, Visibility};
use crate::types::{AnyValue, TypeInfo, TypeKey};

/// Errors from writing a member through its accessor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
	/// The owner passed in is not the type the member belongs to.
	#[error("owner is not a {expected}")]
	OwnerMismatch { expected: &'static str },
	/// The value does not have the member's declared type.
	#[error("value is not a {expected}")]
	ValueMismatch { expected: &'static str },
}

/// Reads and writes one member of a type-erased owner.
pub trait MemberAccess: Send + Sync {
	/// Moves the current value out (or clones it, for properties).
	///
	/// Returns `None` when `owner` is not the expected type.
	fn take(&self, owner: &mut dyn Any) -> Option<AnyValue>;

	fn assign(&self, owner: &mut dyn Any, value: AnyValue) -> Result<(), BindError>;
}

/// A field reached through a `&mut` projection. Taking leaves `F::default()` behind.
pub struct FieldAccess<O, F> {
	project: fn(&mut O) -> &mut F,
}

impl<O, F> FieldAccess<O, F> {
	pub fn new(project: fn(&mut O) -> &mut F) -> Self {
		Self { project }
	}
}

impl<O, F> MemberAccess for FieldAccess<O, F>
where
	O: 'static,
	F: Default + Send + Sync + 'static,
{
	fn take(&self, owner: &mut dyn Any) -> Option<AnyValue> {
		let owner = owner.downcast_mut::<O>()?;
		Some(Box::new(std::mem::take((self.project)(owner))))
	}

	fn assign(&self, owner: &mut dyn Any, value: AnyValue) -> Result<(), BindError> {
		let owner = owner.downcast_mut::<O>().ok_or(BindError::OwnerMismatch {
			expected: type_name::<O>(),
		})?;
		let value = value.downcast::<F>().map_err(|_| BindError::ValueMismatch {
			expected: type_name::<F>(),
		})?;
		*(self.project)(owner) = *value;
		Ok(())
	}
}

/// A getter/setter pair.
pub struct PropertyAccess<O, F> {
	get: fn(&O) -> F,
	set: fn(&mut O, F),
}

impl<O, F> PropertyAccess<O, F> {
	pub fn new(get: fn(&O) -> F, set: fn(&mut O, F)) -> Self {
		Self { get, set }
	}
}

impl<O, F> MemberAccess for PropertyAccess<O, F>
where
	O: 'static,
	F: Send + Sync + 'static,
{
	fn take(&self, owner: &mut dyn Any) -> Option<AnyValue> {
		let owner = owner.downcast_ref::<O>()?;
		Some(Box::new((self.get)(owner)))
	}

	fn assign(&self, owner: &mut dyn Any, value: AnyValue) -> Result<(), BindError> {
		let owner = owner.downcast_mut::<O>().ok_or(BindError::OwnerMismatch {
			expected: type_name::<O>(),
		})?;
		let value = value.downcast::<F>().map_err(|_| BindError::ValueMismatch {
			expected: type_name::<F>(),
		})?;
		(self.set)(owner, *value);
		Ok(())
	}
}

/// Accesses a member of an embedded value `B` inside `O`.
pub struct ProjectedAccess<O, B> {
	project: fn(&mut O) -> &mut B,
	inner: Arc<dyn MemberAccess>,
}

impl<O, B> ProjectedAccess<O, B> {
	pub fn new(project: fn(&mut O) -> &mut B, inner: Arc<dyn MemberAccess>) -> Self {
		Self { project, inner }
	}
}

impl<O, B> MemberAccess for ProjectedAccess<O, B>
where
	O: 'static,
	B: 'static,
{
	fn take(&self, owner: &mut dyn Any) -> Option<AnyValue> {
		let owner = owner.downcast_mut::<O>()?;
		self.inner.take((self.project)(owner))
	}

	fn assign(&self, owner: &mut dyn Any, value: AnyValue) -> Result<(), BindError> {
		let owner = owner.downcast_mut::<O>().ok_or(BindError::OwnerMismatch {
			expected: type_name::<O>(),
		})?;
		self.inner.assign((self.project)(owner), value)
	}
}

/// Explicit marker overriding the binding policy for one member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Inclusion {
	#[default]
	Default,
	Include,
	Exclude,
}

/// One bindable member of a class.
#[derive(Clone)]
pub struct MemberDescriptor {
	pub(crate) name: String,
	pub(crate) aliases: Vec<String>,
	pub(crate) value_type: TypeKey,
	pub(crate) kind: MemberKinds,
	pub(crate) visibility: Visibility,
	pub(crate) inclusion: Inclusion,
	pub(crate) access: Arc<dyn MemberAccess>,
}

impl MemberDescriptor {
	pub(crate) fn new(name: &str, value_type: TypeKey, kind: MemberKinds, access: Arc<dyn MemberAccess>) -> Self {
		Self {
			name: name.to_string(),
			aliases: Vec::new(),
			value_type,
			kind,
			visibility: Visibility::PUBLIC,
			inclusion: Inclusion::Default,
			access,
		}
	}

	pub(crate) fn with_access(mut self, access: Arc<dyn MemberAccess>) -> Self {
		self.access = access;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn aliases(&self) -> &[String] {
		&self.aliases
	}

	pub fn value_type(&self) -> TypeKey {
		self.value_type
	}

	pub fn kind(&self) -> MemberKinds {
		self.kind
	}

	pub fn visibility(&self) -> Visibility {
		self.visibility
	}

	pub fn inclusion(&self) -> Inclusion {
		self.inclusion
	}

	pub fn take(&self, owner: &mut dyn Any) -> Option<AnyValue> {
		self.access.take(owner)
	}

	pub fn assign(&self, owner: &mut dyn Any, value: AnyValue) -> Result<(), BindError> {
		self.access.assign(owner, value)
	}

	fn names(&self) -> impl Iterator<Item = &str> {
		std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
	}
}

impl fmt::Debug for MemberDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemberDescriptor")
			.field("name", &self.name)
			.field("aliases", &self.aliases)
			.field("value_type", &self.value_type)
			.field("kind", &self.kind)
			.field("visibility", &self.visibility)
			.field("inclusion", &self.inclusion)
			.finish_non_exhaustive()
	}
}

/// Resolves document child names to members under one binding policy.
///
/// Lookups are cached per type and normalized name, misses included.
pub struct MemberBindings {
	visibility: Visibility,
	kinds: MemberKinds,
	case_sensitive: bool,
	cache: RwLock<HashMap<(TypeKey, Box<str>), Option<usize>>>,
}

impl MemberBindings {
	pub fn new(config: &LoadConfig) -> Self {
		Self {
			visibility: config.member_visibility,
			kinds: config.member_kinds,
			case_sensitive: config.case_sensitive_members,
			cache: RwLock::new(HashMap::default()),
		}
	}

	/// The ID is owned by the pipeline and never bound as a member.
	pub fn is_reserved(name: &str) -> bool {
		name.eq_ignore_ascii_case("id")
	}

	/// Whether the policy allows binding `member`.
	pub fn is_eligible(&self, member: &MemberDescriptor) -> bool {
		match member.inclusion {
			Inclusion::Include => true,
			Inclusion::Exclude => false,
			Inclusion::Default => self.kinds.intersects(member.kind) && self.visibility.intersects(member.visibility),
		}
	}

	/// Eligible members of `ty` in declaration order.
	pub fn members<'t>(&self, ty: &'t TypeInfo) -> impl Iterator<Item = &'t MemberDescriptor> {
		ty.members()
			.unwrap_or_default()
			.iter()
			.filter(|m| !Self::is_reserved(&m.name) && self.is_eligible(m))
	}

	/// First eligible member of `ty` whose name or an alias matches `name`.
	pub fn find<'t>(&self, ty: &'t TypeInfo, name: &str) -> Option<&'t MemberDescriptor> {
		let members = ty.members()?;
		let normalized: Box<str> = if self.case_sensitive {
			name.into()
		} else {
			name.to_ascii_lowercase().into()
		};
		let cache_key = (ty.key(), normalized);

		if let Some(hit) = self.cache.read().get(&cache_key) {
			return hit.map(|index| &members[index]);
		}

		let index = if Self::is_reserved(name) {
			None
		} else {
			members.iter().position(|member| {
				self.is_eligible(member)
					&& !Self::is_reserved(&member.name)
					&& member.names().any(|candidate| self.matches(candidate, name))
			})
		};
		self.cache.write().insert(cache_key, index);
		index.map(|index| &members[index])
	}

	fn matches(&self, candidate: &str, name: &str) -> bool {
		if self.case_sensitive {
			candidate == name
		} else {
			candidate.eq_ignore_ascii_case(name)
		}
	}
}

impl fmt::Debug for MemberBindings {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemberBindings")
			.field("visibility", &self.visibility)
			.field("kinds", &self.kinds)
			.field("case_sensitive", &self.case_sensitive)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{Bindable, TypeRegistry, TypeRegistryBuilder};

	#[derive(Default)]
	struct Turret {
		id: String,
		range: f32,
		ammo: i32,
		secret: u32,
		skipped: bool,
		forced: bool,
		label: String,
	}

	impl Turret {
		fn label(&self) -> String {
			self.label.clone()
		}

		fn set_label(&mut self, label: String) {
			self.label = label;
		}
	}

	impl Bindable for Turret {
		fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
			reg.class::<Self>("Game.Turret")
				.field("ID", |t| &mut t.id)
				.field("Range", |t| &mut t.range)
				.alias("Reach")
				.field("Ammo", |t| &mut t.ammo)
				.field("Secret", |t| &mut t.secret)
				.private()
				.field("Skipped", |t| &mut t.skipped)
				.exclude()
				.field("Forced", |t| &mut t.forced)
				.private()
				.include()
				.property("Label", Turret::label, Turret::set_label)
				.finish()
		}
	}

	fn registry() -> (TypeRegistry, TypeKey) {
		let mut builder = TypeRegistryBuilder::new();
		let key = builder.register::<Turret>();
		(builder.build(), key)
	}

	#[test]
	fn default_policy_binds_public_fields_only() {
		let (types, key) = registry();
		let info = types.get(key).expect("turret should be registered");
		let bindings = MemberBindings::new(&LoadConfig::default());

		assert_eq!(bindings.find(info, "Range").map(MemberDescriptor::name), Some("Range"));
		assert_eq!(bindings.find(info, "Reach").map(MemberDescriptor::name), Some("Range"));
		assert!(bindings.find(info, "range").is_none());
		assert!(bindings.find(info, "ID").is_none());
		assert!(bindings.find(info, "Secret").is_none());
		assert!(bindings.find(info, "Skipped").is_none());
		assert!(bindings.find(info, "Forced").is_some());
		assert!(bindings.find(info, "Label").is_none());

		let names: Vec<&str> = bindings.members(info).map(MemberDescriptor::name).collect();
		assert_eq!(names, ["Range", "Ammo", "Forced"]);
	}

	#[test]
	fn relaxed_policy_matches_case_insensitively() {
		let (types, key) = registry();
		let info = types.get(key).expect("turret should be registered");
		let config = LoadConfig {
			member_visibility: Visibility::all(),
			member_kinds: MemberKinds::all(),
			case_sensitive_members: false,
			..LoadConfig::default()
		};
		let bindings = MemberBindings::new(&config);

		assert_eq!(bindings.find(info, "reach").map(MemberDescriptor::name), Some("Range"));
		assert_eq!(bindings.find(info, "SECRET").map(MemberDescriptor::name), Some("Secret"));
		assert_eq!(bindings.find(info, "label").map(MemberDescriptor::name), Some("Label"));
		assert!(bindings.find(info, "Id").is_none());
		assert!(bindings.find(info, "skipped").is_none());
	}

	#[test]
	fn accessors_move_values_in_and_out() {
		let (types, key) = registry();
		let info = types.get(key).expect("turret should be registered");
		let bindings = MemberBindings::new(&LoadConfig::default());
		let range = bindings.find(info, "Range").expect("range should bind");

		let mut turret = Turret {
			range: 4.5,
			..Turret::default()
		};
		let taken = range.take(&mut turret).expect("owner type matches");
		assert_eq!(taken.downcast_ref::<f32>(), Some(&4.5));
		assert_eq!(turret.range, 0.0);

		range.assign(&mut turret, Box::new(9.0f32)).expect("f32 should assign");
		assert_eq!(turret.range, 9.0);
		assert!(matches!(
			range.assign(&mut turret, Box::new(1i32)),
			Err(BindError::ValueMismatch { .. })
		));
		assert!(matches!(
			range.assign(&mut 5u8, Box::new(1.0f32)),
			Err(BindError::OwnerMismatch { .. })
		));
	}
}
