use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use super::{AnyValue, Bindable, Implementor, Shape, TypeInfo, TypeKey};
use crate::binding::{FieldAccess, Inclusion, MemberDescriptor, ProjectedAccess, PropertyAccess};
use crate::config::{MemberKinds, Visibility};
use crate::def::{Def, DefCell};
use crate::materialize::{ParseContext, PostConstruct, PreConstruct};
use crate::patch::{ModifyPatch, Patch};

/// Name of the schema holding primitives, containers and built-in patch types.
pub const CORE_SCHEMA: &str = "core";

/// A named group of types, searched in registration order by the resolver.
#[derive(Debug, Clone)]
pub struct SchemaInfo {
	pub(crate) name: String,
	pub(crate) types: Vec<TypeKey>,
}

impl SchemaInfo {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn types(&self) -> &[TypeKey] {
		&self.types
	}
}

/// Immutable table of every type known to a load.
#[derive(Debug)]
pub struct TypeRegistry {
	types: HashMap<TypeKey, TypeInfo>,
	schemas: Vec<SchemaInfo>,
}

impl TypeRegistry {
	pub fn builder() -> TypeRegistryBuilder {
		TypeRegistryBuilder::new()
	}

	pub fn get(&self, key: TypeKey) -> Option<&TypeInfo> {
		self.types.get(&key)
	}

	pub fn info<T: ?Sized + 'static>(&self) -> Option<&TypeInfo> {
		self.get(TypeKey::of::<T>())
	}

	pub fn schemas(&self) -> &[SchemaInfo] {
		&self.schemas
	}

	pub fn schema(&self, name: &str) -> Option<&SchemaInfo> {
		self.schemas.iter().find(|s| s.name == name)
	}

	pub fn len(&self) -> usize {
		self.types.len()
	}

	pub fn is_empty(&self) -> bool {
		self.types.is_empty()
	}

	/// Display name for diagnostics; unregistered keys render as `<unregistered>`.
	pub fn name_of(&self, key: TypeKey) -> &str {
		self.get(key).map_or("<unregistered>", TypeInfo::name)
	}

	/// `child` equals `parent` or declares it, directly or transitively, as a base.
	pub fn is_subtype(&self, child: TypeKey, parent: TypeKey) -> bool {
		let mut visited = HashSet::default();
		let mut stack = vec![child];
		while let Some(key) = stack.pop() {
			if key == parent {
				return true;
			}
			if visited.insert(key)
				&& let Some(info) = self.get(key)
			{
				stack.extend(info.bases.iter().copied());
			}
		}
		false
	}

	/// Every declared supertype of `key`, transitively, excluding `key` itself.
	pub fn supertypes(&self, key: TypeKey) -> Vec<TypeKey> {
		let mut out = Vec::new();
		let mut stack: Vec<TypeKey> = self.get(key).map(|i| i.bases.clone()).unwrap_or_default();
		while let Some(base) = stack.pop() {
			if base == key || out.contains(&base) {
				continue;
			}
			out.push(base);
			if let Some(info) = self.get(base) {
				stack.extend(info.bases.iter().copied());
			}
		}
		out
	}

	/// Whether a value of type `from` can be stored where `to` is declared.
	pub fn is_assignable(&self, from: TypeKey, to: TypeKey) -> bool {
		if from == to {
			return true;
		}
		match self.get(to).map(TypeInfo::shape) {
			Some(Shape::Nullable { inner, .. }) => self.is_assignable(from, *inner),
			Some(Shape::Abstract { implementors }) => implementors.iter().any(|i| i.key == from),
			_ => false,
		}
	}

	/// Converts a value to the declared type `to`, wrapping or upcasting as needed.
	pub fn coerce(&self, value: AnyValue, to: TypeKey) -> Result<AnyValue, AnyValue> {
		let from = TypeKey::of_value(value.as_ref());
		if from == to {
			return Ok(value);
		}
		match self.get(to).map(TypeInfo::shape) {
			Some(Shape::Nullable { inner, wrap_some, .. }) => wrap_some(self.coerce(value, *inner)?),
			Some(Shape::Abstract { implementors }) => match implementors.iter().find(|i| i.key == from) {
				Some(implementor) => (implementor.upcast)(value),
				None => Err(value),
			},
			_ => Err(value),
		}
	}

	/// `Option<T>` resolves to `T`; every other type is returned unchanged.
	pub fn strip_nullable(&self, key: TypeKey) -> TypeKey {
		match self.get(key).map(TypeInfo::shape) {
			Some(Shape::Nullable { inner, .. }) => *inner,
			_ => key,
		}
	}

	/// The value written for an explicit null: `None` for nullable types, the
	/// default instance otherwise.
	pub fn null_value(&self, key: TypeKey) -> Option<AnyValue> {
		let info = self.get(key)?;
		match info.shape() {
			Shape::Nullable { make_none, .. } => Some(make_none()),
			_ => info.instantiate(None).ok(),
		}
	}
}

/// Collects type descriptors, then freezes them into a [`TypeRegistry`].
///
/// Registration is idempotent: describing an already known type is a no-op, which
/// also terminates recursion through self-referencing member types.
pub struct TypeRegistryBuilder {
	types: HashMap<TypeKey, TypeInfo>,
	schemas: Vec<SchemaInfo>,
	current: usize,
}

impl Default for TypeRegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl TypeRegistryBuilder {
	/// A builder with the core schema (primitives and `ModifyPatch`) registered.
	pub fn new() -> Self {
		let mut builder = Self {
			types: HashMap::default(),
			schemas: vec![SchemaInfo {
				name: CORE_SCHEMA.to_string(),
				types: Vec::new(),
			}],
			current: 0,
		};
		builder.register::<bool>();
		builder.register::<i32>();
		builder.register::<i64>();
		builder.register::<u8>();
		builder.register::<u32>();
		builder.register::<u64>();
		builder.register::<usize>();
		builder.register::<f32>();
		builder.register::<f64>();
		builder.register::<String>();
		builder.register::<defloom_document::DocumentNode>();
		builder.register::<TypeKey>();
		builder.register::<ModifyPatch>();
		builder
	}

	/// Selects (creating on first use) the schema subsequent registrations land in.
	pub fn schema(&mut self, name: &str) -> &mut Self {
		self.current = match self.schemas.iter().position(|s| s.name == name) {
			Some(index) => index,
			None => {
				self.schemas.push(SchemaInfo {
					name: name.to_string(),
					types: Vec::new(),
				});
				self.schemas.len() - 1
			}
		};
		self
	}

	pub fn register<T: Bindable>(&mut self) -> TypeKey {
		T::describe(self)
	}

	pub fn contains(&self, key: TypeKey) -> bool {
		self.types.contains_key(&key)
	}

	pub fn name_of(&self, key: TypeKey) -> &str {
		self.types.get(&key).map_or("<unregistered>", TypeInfo::name)
	}

	/// Adds a descriptor to its schema. An existing descriptor for the key is replaced in place.
	pub(crate) fn insert(&mut self, mut info: TypeInfo) -> TypeKey {
		let key = info.key;
		if let Some(existing) = self.types.get(&key) {
			info.schema = existing.schema;
		} else {
			self.schemas[info.schema].types.push(key);
		}
		self.types.insert(key, info);
		key
	}

	/// Registers a plain value type. A parser must be added for it to be loadable.
	pub fn scalar<T: Default + Send + Sync + 'static>(&mut self, full_name: &str) -> TypeKey {
		let key = TypeKey::of::<T>();
		if self.contains(key) {
			return key;
		}
		let info = TypeInfo::new(key, full_name, self.current, Shape::Scalar).with_default::<T>();
		self.insert(info)
	}

	/// Registers a scalar that has no meaningful default (explicit nulls are rejected).
	pub fn scalar_without_default<T: Send + Sync + 'static>(&mut self, full_name: &str) -> TypeKey {
		let key = TypeKey::of::<T>();
		if self.contains(key) {
			return key;
		}
		self.insert(TypeInfo::new(key, full_name, self.current, Shape::Scalar))
	}

	/// Registers an enum by its variant table. The first variant is the default.
	pub fn enumeration<T: Copy + Send + Sync + 'static>(&mut self, full_name: &str, variants: &'static [(&'static str, T)]) -> TypeKey {
		let key = TypeKey::of::<T>();
		if self.contains(key) {
			return key;
		}
		let shape = Shape::Enum {
			names: variants.iter().map(|(name, _)| *name).collect(),
			parse: Arc::new(move |text: &str| {
				variants
					.iter()
					.find(|(name, _)| *name == text)
					.map(|(_, value)| Box::new(*value) as AnyValue)
			}),
		};
		let mut info = TypeInfo::new(key, full_name, self.current, shape);
		if let Some((_, first)) = variants.first() {
			let first = *first;
			info.construct = Some(Arc::new(move || Ok(Box::new(first) as AnyValue)));
		}
		self.insert(info)
	}

	/// Starts describing a struct constructed through `Default`.
	pub fn class<T: Default + Send + Sync + 'static>(&mut self, full_name: &str) -> ClassBuilder<'_, T> {
		self.class_with(full_name, || Ok(T::default()))
	}

	/// Starts describing a struct with a fallible constructor.
	pub fn class_with<T, F>(&mut self, full_name: &str, construct: F) -> ClassBuilder<'_, T>
	where
		T: Send + Sync + 'static,
		F: Fn() -> Result<T, String> + Send + Sync + 'static,
	{
		let key = TypeKey::of::<T>();
		let skip = self.contains(key);
		if !skip {
			let mut info = TypeInfo::new(key, full_name, self.current, Shape::Class { members: Vec::new() });
			info.construct = Some(Arc::new(move || construct().map(|v| Box::new(v) as AnyValue)));
			self.insert(info);
		}
		ClassBuilder {
			reg: self,
			key,
			skip,
			members: Vec::new(),
			bases: Vec::new(),
			_marker: PhantomData,
		}
	}

	/// Starts describing an abstract type, typically `Box<dyn Trait>`.
	pub fn abstract_type<B: Send + Sync + 'static>(&mut self, full_name: &str) -> AbstractBuilder<'_, B> {
		let key = TypeKey::of::<B>();
		let skip = self.contains(key);
		if !skip {
			self.insert(TypeInfo::new(key, full_name, self.current, Shape::Abstract { implementors: Vec::new() }));
		}
		AbstractBuilder {
			reg: self,
			key,
			skip,
			implementors: Vec::new(),
			_marker: PhantomData,
		}
	}

	fn get_mut(&mut self, key: TypeKey) -> Option<&mut TypeInfo> {
		self.types.get_mut(&key)
	}

	pub fn build(self) -> TypeRegistry {
		TypeRegistry {
			types: self.types,
			schemas: self.schemas,
		}
	}
}

/// Describes the members and capabilities of a struct `T`.
///
/// Modifiers such as [`alias`](Self::alias) and [`exclude`](Self::exclude) apply to
/// the most recently added member.
pub struct ClassBuilder<'r, T> {
	reg: &'r mut TypeRegistryBuilder,
	key: TypeKey,
	skip: bool,
	members: Vec<MemberDescriptor>,
	bases: Vec<TypeKey>,
	_marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ClassBuilder<'_, T> {
	/// A public field, bound through a projection to `&mut F`.
	pub fn field<F: Bindable + Default>(mut self, name: &str, access: fn(&mut T) -> &mut F) -> Self {
		if !self.skip {
			let value_type = F::describe(self.reg);
			self.members.push(MemberDescriptor::new(
				name,
				value_type,
				MemberKinds::FIELD,
				Arc::new(FieldAccess::new(access)),
			));
		}
		self
	}

	/// A public property, bound through a getter/setter pair.
	pub fn property<F: Bindable>(mut self, name: &str, get: fn(&T) -> F, set: fn(&mut T, F)) -> Self {
		if !self.skip {
			let value_type = F::describe(self.reg);
			self.members.push(MemberDescriptor::new(
				name,
				value_type,
				MemberKinds::PROPERTY,
				Arc::new(PropertyAccess::new(get, set)),
			));
		}
		self
	}

	/// Imports every member of `B`, reached through `project`.
	pub fn embed<B: Bindable>(mut self, project: fn(&mut T) -> &mut B) -> Self {
		if !self.skip {
			let key = B::describe(self.reg);
			let inherited: Vec<MemberDescriptor> = self
				.reg
				.types
				.get(&key)
				.and_then(TypeInfo::members)
				.map(|members| members.to_vec())
				.unwrap_or_default();
			for member in inherited {
				let access = Arc::new(ProjectedAccess::new(project, member.access.clone()));
				self.members.push(member.with_access(access));
			}
			self.bases.push(key);
		}
		self
	}

	pub fn alias(mut self, alias: &str) -> Self {
		if let Some(member) = self.members.last_mut() {
			member.aliases.push(alias.to_string());
		}
		self
	}

	/// Marks the last member non-public; it binds only when the policy allows non-public members.
	pub fn private(mut self) -> Self {
		if let Some(member) = self.members.last_mut() {
			member.visibility = Visibility::NON_PUBLIC;
		}
		self
	}

	/// Always bind the last member, regardless of policy.
	pub fn include(mut self) -> Self {
		if let Some(member) = self.members.last_mut() {
			member.inclusion = Inclusion::Include;
		}
		self
	}

	/// Never bind the last member.
	pub fn exclude(mut self) -> Self {
		if let Some(member) = self.members.last_mut() {
			member.inclusion = Inclusion::Exclude;
		}
		self
	}

	/// Declares `B` as a supertype for def reference checks and registry indexing.
	pub fn base<B: ?Sized + 'static>(mut self) -> Self {
		self.bases.push(TypeKey::of::<B>());
		self
	}

	/// Marks `T` as a def: top-level nodes may name it in `Type`.
	pub fn def(self) -> Self
	where
		T: Def,
	{
		self.update(|info| info.def_cast = Some(into_def_cell::<T>))
	}

	/// Marks `T` as a patch type usable in patch documents.
	pub fn patch(self) -> Self
	where
		T: Patch,
	{
		self.update(|info| info.patch_cast = Some(into_patch::<T>))
	}

	pub fn pre_construct(self) -> Self
	where
		T: PreConstruct,
	{
		self.update(|info| info.pre_construct = Some(run_pre_construct::<T>))
	}

	pub fn post_construct(self) -> Self
	where
		T: PostConstruct,
	{
		self.update(|info| info.post_construct = Some(run_post_construct::<T>))
	}

	fn update(self, apply: impl FnOnce(&mut TypeInfo)) -> Self {
		if !self.skip
			&& let Some(info) = self.reg.get_mut(self.key)
		{
			apply(info);
		}
		self
	}

	pub fn finish(self) -> TypeKey {
		if !self.skip
			&& let Some(info) = self.reg.get_mut(self.key)
		{
			info.shape = Shape::Class { members: self.members };
			info.bases = self.bases;
		}
		self.key
	}
}

/// Describes the implementors of an abstract type `B`.
pub struct AbstractBuilder<'r, B> {
	reg: &'r mut TypeRegistryBuilder,
	key: TypeKey,
	skip: bool,
	implementors: Vec<Implementor>,
	_marker: PhantomData<fn() -> B>,
}

impl<B: Send + Sync + 'static> AbstractBuilder<'_, B> {
	pub fn implementor<C: Bindable>(mut self, upcast: fn(C) -> B) -> Self {
		if !self.skip {
			let key = C::describe(self.reg);
			self.implementors.push(Implementor {
				key,
				upcast: Arc::new(move |value: AnyValue| value.downcast::<C>().map(|c| Box::new(upcast(*c)) as AnyValue)),
			});
		}
		self
	}

	pub fn finish(self) -> TypeKey {
		if !self.skip
			&& let Some(info) = self.reg.get_mut(self.key)
		{
			info.shape = Shape::Abstract {
				implementors: self.implementors,
			};
		}
		self.key
	}
}

fn into_def_cell<T: Def>(value: AnyValue) -> Result<DefCell, AnyValue> {
	value.downcast::<T>().map(|def| Arc::new(RwLock::new(*def)) as DefCell)
}

fn into_patch<T: Patch + 'static>(value: AnyValue) -> Result<Box<dyn Patch>, AnyValue> {
	value.downcast::<T>().map(|patch| patch as Box<dyn Patch>)
}

fn run_pre_construct<T: PreConstruct + 'static>(value: &mut dyn Any, ctx: Option<&ParseContext<'_>>) {
	if let Some(value) = value.downcast_mut::<T>() {
		value.pre_construct(ctx);
	}
}

fn run_post_construct<T: PostConstruct + 'static>(value: &mut dyn Any, ctx: &ParseContext<'_>) {
	if let Some(value) = value.downcast_mut::<T>() {
		value.post_construct(ctx);
	}
}
