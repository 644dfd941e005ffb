#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use defloom_define::parsers::ParseError;
use defloom_define::{
	AnyValue, Bindable, ConfigErrorReporter, Def, DefDatabase, DefRef, LoadConfig, LoadReport, ParseContext,
	PostConstruct, PreConstruct, Slot, TypeInfo, TypeKey, TypeRegistry, TypeRegistryBuilder, ValueParser,
	def_identity,
};

#[derive(Default)]
pub struct AmmoDef {
	pub id: String,
	pub caliber: f32,
}

impl Def for AmmoDef {
	def_identity!(id);
}

impl Bindable for AmmoDef {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.AmmoDef")
			.field("Caliber", |a| &mut a.caliber)
			.def()
			.finish()
	}
}

#[derive(Default)]
pub struct Stats {
	pub weight: f32,
	pub bulk: i32,
	pub sealed: bool,
}

impl PostConstruct for Stats {
	fn post_construct(&mut self, _ctx: &ParseContext<'_>) {
		self.sealed = true;
	}
}

impl Bindable for Stats {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.Stats")
			.field("Weight", |s| &mut s.weight)
			.field("Bulk", |s| &mut s.bulk)
			.post_construct()
			.finish()
	}
}

pub trait Effect: Send + Sync {
	fn summary(&self) -> String;
}

#[derive(Default)]
pub struct Heal {
	pub amount: i32,
}

/// Fresh heals restore one point per list position, unless `Amount` says otherwise.
impl PreConstruct for Heal {
	fn pre_construct(&mut self, ctx: Option<&ParseContext<'_>>) {
		if let Some(Slot::ListIndex(index)) = ctx.map(|c| c.slot) {
			self.amount = index as i32 + 1;
		}
	}
}

impl Effect for Heal {
	fn summary(&self) -> String {
		format!("heal {}", self.amount)
	}
}

impl Bindable for Heal {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.Heal")
			.field("Amount", |h| &mut h.amount)
			.pre_construct()
			.finish()
	}
}

#[derive(Default)]
pub struct Burn {
	pub seconds: u32,
}

impl Effect for Burn {
	fn summary(&self) -> String {
		format!("burn {}s", self.seconds)
	}
}

impl Bindable for Burn {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.Burn").field("Seconds", |b| &mut b.seconds).finish()
	}
}

impl Bindable for Box<dyn Effect> {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.abstract_type::<Self>("Game.Effect")
			.implementor::<Heal>(|h| Box::new(h) as Box<dyn Effect>)
			.implementor::<Burn>(|b| Box::new(b) as Box<dyn Effect>)
			.finish()
	}
}

/// Marker supertype shared by every weapon def.
pub trait Weapon {}

#[derive(Default)]
pub struct GunDef {
	pub id: String,
	pub damage: i32,
	pub range: f32,
	pub label: Option<String>,
	pub tags: Vec<String>,
	pub costs: BTreeMap<String, u32>,
	pub ammo: Option<DefRef<AmmoDef>>,
	pub stats: Stats,
	pub effects: Vec<Box<dyn Effect>>,
	/// Derived in `post_load`.
	pub dps: f32,
	pub post_loads: u32,
}

impl Weapon for GunDef {}

impl Def for GunDef {
	def_identity!(id);

	fn post_load(&mut self) -> anyhow::Result<()> {
		self.post_loads += 1;
		self.dps = self.damage as f32 * 2.0;
		Ok(())
	}

	fn config_errors(&self, report: &mut ConfigErrorReporter<'_>) -> anyhow::Result<()> {
		report.assert(self.damage >= 0, "damage must not be negative");
		if self.range > 100.0 {
			report.warn("range is unusually long");
		}
		Ok(())
	}
}

impl Bindable for GunDef {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.GunDef")
			.field("Damage", |g| &mut g.damage)
			.field("Range", |g| &mut g.range)
			.field("Label", |g| &mut g.label)
			.field("Tags", |g| &mut g.tags)
			.field("Costs", |g| &mut g.costs)
			.field("Ammo", |g| &mut g.ammo)
			.field("Stats", |g| &mut g.stats)
			.field("Effects", |g| &mut g.effects)
			.base::<dyn Weapon>()
			.def()
			.finish()
	}
}

#[derive(Default)]
pub struct SwordDef {
	pub id: String,
	pub edge: u32,
}

impl Weapon for SwordDef {}

impl Def for SwordDef {
	def_identity!(id);

	fn late_post_load(&mut self) -> anyhow::Result<()> {
		anyhow::ensure!(self.edge > 0, "sword {} is blunt", self.id);
		Ok(())
	}
}

impl Bindable for SwordDef {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.SwordDef")
			.field("Edge", |s| &mut s.edge)
			.base::<dyn Weapon>()
			.def()
			.finish()
	}
}

/// Loot table key. Only parseable with a node at hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag(pub String);

impl Bindable for Tag {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.scalar::<Tag>("Game.Tag")
	}
}

pub struct TagParser;

impl ValueParser for TagParser {
	fn name(&self) -> &str {
		"tag"
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		ty.key() == TypeKey::of::<Tag>()
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		let node = ctx.node.ok_or_else(|| ParseError::new("tags need their node"))?;
		Ok(Box::new(Tag(node.name().to_string())))
	}
}

#[derive(Default)]
pub struct LootDef {
	pub id: String,
	pub weights: BTreeMap<Tag, u32>,
	pub chances: BTreeMap<String, f32>,
	pub bonuses: BTreeMap<String, Box<dyn Effect>>,
}

impl Def for LootDef {
	def_identity!(id);
}

impl Bindable for LootDef {
	fn describe(reg: &mut TypeRegistryBuilder) -> TypeKey {
		reg.class::<Self>("Game.LootDef")
			.field("Weights", |l| &mut l.weights)
			.field("Chances", |l| &mut l.chances)
			.field("Bonuses", |l| &mut l.bonuses)
			.def()
			.finish()
	}
}

pub fn types() -> Arc<TypeRegistry> {
	let mut builder = TypeRegistryBuilder::new();
	builder.schema("game");
	builder.register::<AmmoDef>();
	builder.register::<GunDef>();
	builder.register::<SwordDef>();
	builder.register::<LootDef>();
	Arc::new(builder.build())
}

/// Loads `sources` into a fresh database with the default configuration.
pub fn load(sources: &[&str]) -> (DefDatabase, LoadReport) {
	load_with(LoadConfig::default(), sources)
}

pub fn load_with(config: LoadConfig, sources: &[&str]) -> (DefDatabase, LoadReport) {
	let mut db = DefDatabase::new(types());
	let mut session = db.start_loading(config);
	for (i, source) in sources.iter().enumerate() {
		session
			.append_kdl(source, &format!("source{i}.kdl"))
			.expect("source should be valid KDL");
	}
	let report = session.finish();
	(db, report)
}

pub fn messages(report: &LoadReport) -> Vec<String> {
	report.diagnostics.iter().map(ToString::to_string).collect()
}
