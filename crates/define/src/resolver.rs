//! Type name resolution.

use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;

use crate::types::{TypeInfo, TypeKey, TypeRegistry};

/// Maps type names written in documents to registered types.
///
/// A name is tried, in order, as a qualified `Full.Name, schema` reference, as a
/// full name in schema order, and as a short name in schema order. The first hit
/// wins. Results are cached per name, misses included.
#[derive(Debug, Default)]
pub struct TypeResolver {
	cache: RwLock<HashMap<Box<str>, Option<TypeKey>>>,
}

impl TypeResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn resolve(&self, types: &TypeRegistry, name: &str) -> Option<TypeKey> {
		let name = name.trim();
		if name.is_empty() {
			return None;
		}
		if let Some(cached) = self.cache.read().get(name) {
			return *cached;
		}
		let found = Self::qualified(types, name)
			.or_else(|| Self::scan(types, |info| info.full_name() == name))
			.or_else(|| Self::scan(types, |info| info.name() == name));
		self.cache.write().insert(name.into(), found);
		found
	}

	pub fn clear(&self) {
		self.cache.write().clear();
	}

	fn qualified(types: &TypeRegistry, name: &str) -> Option<TypeKey> {
		let (full_name, schema) = name.split_once(',')?;
		let (full_name, schema) = (full_name.trim(), schema.trim());
		types
			.schema(schema)?
			.types()
			.iter()
			.copied()
			.find(|key| types.get(*key).is_some_and(|info| info.full_name() == full_name))
	}

	fn scan(types: &TypeRegistry, matches: impl Fn(&TypeInfo) -> bool) -> Option<TypeKey> {
		types
			.schemas()
			.iter()
			.flat_map(|schema| schema.types().iter().copied())
			.find(|key| types.get(*key).is_some_and(&matches))
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::types::{Bindable, TypeRegistryBuilder};

	#[derive(Default)]
	struct GunDef;

	impl Bindable for GunDef {
		fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
			reg.class::<Self>("Game.Weapons.GunDef").finish()
		}
	}

	#[derive(Default)]
	struct ModGunDef;

	impl Bindable for ModGunDef {
		fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
			reg.class::<Self>("Mod.GunDef").finish()
		}
	}

	fn registry() -> TypeRegistry {
		let mut builder = TypeRegistryBuilder::new();
		builder.schema("game").register::<GunDef>();
		builder.schema("mod").register::<ModGunDef>();
		builder.build()
	}

	#[rstest]
	#[case::short_name_first_schema("GunDef", Some(TypeKey::of::<GunDef>()))]
	#[case::full_name("Mod.GunDef", Some(TypeKey::of::<ModGunDef>()))]
	#[case::qualified("Mod.GunDef, mod", Some(TypeKey::of::<ModGunDef>()))]
	#[case::qualified_wrong_schema("Mod.GunDef, game", None)]
	#[case::core_primitive("i32", Some(TypeKey::of::<i32>()))]
	#[case::unknown("Missing", None)]
	#[case::blank("  ", None)]
	fn resolves_names(#[case] name: &str, #[case] expected: Option<TypeKey>) {
		let types = registry();
		let resolver = TypeResolver::new();
		assert_eq!(resolver.resolve(&types, name), expected);
		assert_eq!(resolver.resolve(&types, name), expected, "cached answer should match");
	}

	#[test]
	fn misses_are_cached() {
		let types = registry();
		let resolver = TypeResolver::new();
		assert_eq!(resolver.resolve(&types, "Missing"), None);
		assert!(resolver.cache.read().contains_key("Missing"));
	}
}
