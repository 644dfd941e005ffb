use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use defloom_document::DocumentNode;
use indexmap::IndexMap;

use super::{AnyValue, MapInsert, Shape, TypeInfo, TypeKey, TypeRegistryBuilder, rust_short_name};
use crate::def::{DefHandle, DefRef};

/// A type that can describe itself to a [`TypeRegistryBuilder`].
///
/// Implementations register the type (and, transitively, every member type) and
/// return its key. Describing an already registered type must return early.
pub trait Bindable: Any + Send + Sync {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey;
}

macro_rules! bind_scalar {
	($($ty:ty => $name:literal),* $(,)?) => {
		$(
			impl Bindable for $ty {
				fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
					reg.scalar::<$ty>($name)
				}
			}
		)*
	};
}

bind_scalar! {
	bool => "bool",
	i32 => "i32",
	i64 => "i64",
	u8 => "u8",
	u32 => "u32",
	u64 => "u64",
	usize => "usize",
	f32 => "f32",
	f64 => "f64",
	String => "String",
	DocumentNode => "defloom.DocumentNode",
}

impl Bindable for TypeKey {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.scalar_without_default::<TypeKey>("defloom.TypeKey")
	}
}

impl<T: Bindable> Bindable for Option<T> {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		let key = TypeKey::of::<Self>();
		if reg.contains(key) {
			return key;
		}
		let inner = T::describe(reg);
		let name = format!("Option<{}>", reg.name_of(inner));
		let shape = Shape::Nullable {
			inner,
			wrap_some: wrap_some::<T>,
			take_inner: take_inner::<T>,
			make_none: make_none::<T>,
		};
		reg.insert(TypeInfo::container(key, name, shape).with_default::<Self>())
	}
}

impl<T: Bindable> Bindable for Vec<T> {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		let key = TypeKey::of::<Self>();
		if reg.contains(key) {
			return key;
		}
		let element = T::describe(reg);
		let name = format!("Vec<{}>", reg.name_of(element));
		let shape = Shape::List {
			element,
			push: push_vec::<T>,
			len: len_vec::<T>,
		};
		reg.insert(TypeInfo::container(key, name, shape).with_default::<Self>())
	}
}

/// Common surface of the supported map types.
trait MapLike<K, V>: Default + Send + Sync + 'static {
	const NAME: &'static str;

	/// Inserts, returning whether an existing entry was replaced.
	fn put(&mut self, key: K, value: V) -> bool;
}

impl<K, V, S> MapLike<K, V> for HashMap<K, V, S>
where
	K: Eq + Hash + Send + Sync + 'static,
	V: Send + Sync + 'static,
	S: BuildHasher + Default + Send + Sync + 'static,
{
	const NAME: &'static str = "HashMap";

	fn put(&mut self, key: K, value: V) -> bool {
		self.insert(key, value).is_some()
	}
}

impl<K, V> MapLike<K, V> for BTreeMap<K, V>
where
	K: Ord + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	const NAME: &'static str = "BTreeMap";

	fn put(&mut self, key: K, value: V) -> bool {
		self.insert(key, value).is_some()
	}
}

impl<K, V, S> MapLike<K, V> for IndexMap<K, V, S>
where
	K: Eq + Hash + Send + Sync + 'static,
	V: Send + Sync + 'static,
	S: BuildHasher + Default + Send + Sync + 'static,
{
	const NAME: &'static str = "IndexMap";

	fn put(&mut self, key: K, value: V) -> bool {
		self.insert(key, value).is_some()
	}
}

fn describe_map<M, K, V>(reg: &mut TypeRegistryBuilder) -> TypeKey
where
	M: MapLike<K, V>,
	K: Bindable,
	V: Bindable,
{
	let key = TypeKey::of::<M>();
	if reg.contains(key) {
		return key;
	}
	let key_type = K::describe(reg);
	let value_type = V::describe(reg);
	let name = format!("{}<{}, {}>", M::NAME, reg.name_of(key_type), reg.name_of(value_type));
	let shape = Shape::Map {
		key: key_type,
		value: value_type,
		insert: insert_map::<M, K, V>,
	};
	reg.insert(TypeInfo::container(key, name, shape).with_default::<M>())
}

impl<K, V, S> Bindable for HashMap<K, V, S>
where
	K: Bindable + Eq + Hash,
	V: Bindable,
	S: BuildHasher + Default + Send + Sync + 'static,
{
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		describe_map::<Self, K, V>(reg)
	}
}

impl<K: Bindable + Ord, V: Bindable> Bindable for BTreeMap<K, V> {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		describe_map::<Self, K, V>(reg)
	}
}

impl<K, V, S> Bindable for IndexMap<K, V, S>
where
	K: Bindable + Eq + Hash,
	V: Bindable,
	S: BuildHasher + Default + Send + Sync + 'static,
{
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		describe_map::<Self, K, V>(reg)
	}
}

impl<T: ?Sized + 'static> Bindable for DefRef<T> {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		let key = TypeKey::of::<Self>();
		if reg.contains(key) {
			return key;
		}
		let name = format!("DefRef<{}>", rust_short_name::<T>());
		let shape = Shape::DefRef {
			target: TypeKey::of::<T>(),
			make: make_def_ref::<T>,
		};
		reg.insert(TypeInfo::container(key, name, shape))
	}
}

fn wrap_some<T: Send + Sync + 'static>(value: AnyValue) -> Result<AnyValue, AnyValue> {
	let value = value.downcast::<T>()?;
	Ok(Box::new(Some(*value)) as AnyValue)
}

fn take_inner<T: Send + Sync + 'static>(value: AnyValue) -> Option<AnyValue> {
	let value = value.downcast::<Option<T>>().ok()?;
	value.map(|inner| Box::new(inner) as AnyValue)
}

fn make_none<T: Send + Sync + 'static>() -> AnyValue {
	Box::new(None::<T>)
}

fn push_vec<T: 'static>(list: &mut dyn Any, item: AnyValue) -> Result<(), AnyValue> {
	let Some(list) = list.downcast_mut::<Vec<T>>() else {
		return Err(item);
	};
	list.push(*item.downcast::<T>()?);
	Ok(())
}

fn len_vec<T: 'static>(list: &dyn Any) -> usize {
	list.downcast_ref::<Vec<T>>().map_or(0, Vec::len)
}

fn insert_map<M, K, V>(map: &mut dyn Any, key: AnyValue, value: AnyValue) -> MapInsert
where
	M: MapLike<K, V>,
	K: 'static,
	V: 'static,
{
	let Some(map) = map.downcast_mut::<M>() else {
		return MapInsert::Mismatch;
	};
	let (Ok(key), Ok(value)) = (key.downcast::<K>(), value.downcast::<V>()) else {
		return MapInsert::Mismatch;
	};
	if map.put(*key, *value) {
		MapInsert::Replaced
	} else {
		MapInsert::Inserted
	}
}

fn make_def_ref<T: ?Sized + 'static>(handle: DefHandle) -> AnyValue {
	Box::new(DefRef::<T>::new(handle))
}

/// Implements [`Bindable`] for a fieldless enum, naming variants as written.
///
/// ```ignore
/// bind_enum!(Rarity, "Game.Rarity", { Common, Rare, Legendary });
/// ```
///
/// The first listed variant is the value used for explicit nulls.
#[macro_export]
macro_rules! bind_enum {
	($ty:ty, $name:expr, { $($variant:ident),+ $(,)? }) => {
		impl $crate::Bindable for $ty {
			fn describe(reg: &mut $crate::TypeRegistryBuilder) -> $crate::TypeKey {
				reg.enumeration::<$ty>($name, &[$((stringify!($variant), <$ty>::$variant)),+])
			}
		}
	};
}

#[cfg(test)]
mod tests {
	use rustc_hash::FxHashMap;

	use super::*;

	#[test]
	fn containers_are_named_after_their_elements() {
		let mut reg = TypeRegistryBuilder::new();
		let list = reg.register::<Vec<Option<i32>>>();
		let map = reg.register::<FxHashMap<String, Vec<f32>>>();
		let types = reg.build();
		assert_eq!(types.name_of(list), "Vec<Option<i32>>");
		assert_eq!(types.name_of(map), "HashMap<String, Vec<f32>>");
	}

	#[test]
	fn list_helpers_reject_wrong_elements() {
		let mut list: Vec<i32> = Vec::new();
		assert!(push_vec::<i32>(&mut list, Box::new(3i32)).is_ok());
		assert!(push_vec::<i32>(&mut list, Box::new("three")).is_err());
		assert_eq!(len_vec::<i32>(&list), 1);
	}

	#[test]
	fn map_helper_reports_replacement() {
		let mut map: BTreeMap<String, i32> = BTreeMap::new();
		let insert = insert_map::<BTreeMap<String, i32>, String, i32>;
		assert_eq!(insert(&mut map, Box::new("a".to_string()), Box::new(1i32)), MapInsert::Inserted);
		assert_eq!(insert(&mut map, Box::new("a".to_string()), Box::new(2i32)), MapInsert::Replaced);
		assert_eq!(insert(&mut map, Box::new(1i32), Box::new(2i32)), MapInsert::Mismatch);
		assert_eq!(map.get("a"), Some(&2));
	}

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	enum Rarity {
		Common,
		Rare,
	}

	crate::bind_enum!(Rarity, "Game.Rarity", { Common, Rare });

	#[test]
	fn enums_parse_variant_names() {
		let mut reg = TypeRegistryBuilder::new();
		let key = reg.register::<Rarity>();
		let types = reg.build();
		let info = types.get(key).expect("rarity should be registered");
		let Shape::Enum { names, parse } = info.shape() else {
			panic!("rarity should be an enum");
		};
		assert_eq!(names, &["Common", "Rare"]);
		let rare = parse("Rare").and_then(|v| v.downcast::<Rarity>().ok());
		assert_eq!(rare.map(|r| *r), Some(Rarity::Rare));
		assert!(parse("rare").is_none());

		let default = info.instantiate(None).expect("enum has a default");
		assert_eq!(default.downcast_ref::<Rarity>(), Some(&Rarity::Common));
	}
}
