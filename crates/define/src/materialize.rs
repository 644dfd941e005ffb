//! Turns document nodes into typed values.
//!
//! A node is parsed against a target [`TypeInfo`]. `Null="true"` forces a null
//! write; list and map shapes iterate children; types with a registered parser are
//! converted from text; everything else is a class populated member by member.
//! Failures are recorded as diagnostics and only abort the value being parsed.

use std::any::Any;

use defloom_document::DocumentNode;

use crate::binding::{MemberBindings, MemberDescriptor};
use crate::config::LoadConfig;
use crate::def::{DefCell, DefLookup};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::parsers::ParserRegistry;
use crate::resolver::TypeResolver;
use crate::types::{AnyValue, MapInsert, Shape, TypeInfo, TypeKey, TypeRegistry};

/// Everything a parse step may consult beyond the node itself.
pub struct ParseEnv<'a> {
	pub types: &'a TypeRegistry,
	pub resolver: &'a TypeResolver,
	pub defs: &'a dyn DefLookup,
	pub config: &'a LoadConfig,
}

/// Where the value being parsed will be stored.
#[derive(Clone, Copy)]
pub enum Slot<'a> {
	/// A def, a patch, or a value parsed without an owner.
	Root,
	/// The member described by [`ParseContext::member`].
	Member,
	/// The next element of a list, at this index.
	ListIndex(usize),
	/// The value stored under this map key.
	DictKey(&'a (dyn Any + Send + Sync)),
}

/// State of one parse step.
pub struct ParseContext<'a> {
	pub env: &'a ParseEnv<'a>,
	/// `None` when parsing context-free (map keys).
	pub node: Option<&'a DocumentNode>,
	pub text: &'a str,
	/// The type being produced.
	pub target: &'a TypeInfo,
	/// The type declared by the member or container; `target` may be a subtype.
	pub declared: &'a TypeInfo,
	/// The value currently stored in the slot, if any.
	pub current: Option<&'a (dyn Any + Send + Sync)>,
	pub owner: Option<&'a dyn Any>,
	pub member: Option<&'a MemberDescriptor>,
	pub slot: Slot<'a>,
}

impl ParseContext<'_> {
	pub fn types(&self) -> &TypeRegistry {
		self.env.types
	}

	/// Attribute of the node being parsed.
	pub fn attr(&self, key: &str) -> Option<&str> {
		self.node.and_then(|node| node.attr(key))
	}
}

/// Result of parsing one node.
pub enum ParseOutcome {
	/// Nothing to write; the slot keeps its previous value.
	NoValue,
	Value(AnyValue),
	/// Write the type's null value.
	ForceNull,
}

/// Runs on a fresh instance before its members are populated.
///
/// `ctx` is `None` for defs, which are created before their nodes are parsed.
pub trait PreConstruct {
	fn pre_construct(&mut self, ctx: Option<&ParseContext<'_>>);
}

/// Runs after an instance has been fully populated.
pub trait PostConstruct {
	fn post_construct(&mut self, ctx: &ParseContext<'_>);
}

#[derive(Clone, Copy)]
struct Frame<'f> {
	node: Option<&'f DocumentNode>,
	text: &'f str,
	target: &'f TypeInfo,
	declared: &'f TypeInfo,
	owner: Option<&'f dyn Any>,
	member: Option<&'f MemberDescriptor>,
	slot: Slot<'f>,
}

impl<'f> Frame<'f> {
	fn root(node: &'f DocumentNode, text: &'f str, target: &'f TypeInfo) -> Self {
		Self {
			node: Some(node),
			text,
			target,
			declared: target,
			owner: None,
			member: None,
			slot: Slot::Root,
		}
	}

	fn context(self, env: &'f ParseEnv<'f>, current: Option<&'f (dyn Any + Send + Sync)>) -> ParseContext<'f> {
		ParseContext {
			env,
			node: self.node,
			text: self.text,
			target: self.target,
			declared: self.declared,
			current,
			owner: self.owner,
			member: self.member,
			slot: self.slot,
		}
	}
}

pub(crate) struct Materializer<'a> {
	env: &'a ParseEnv<'a>,
	parsers: &'a ParserRegistry,
	members: &'a MemberBindings,
	diagnostics: &'a mut Diagnostics,
	trail: Vec<String>,
}

impl<'a> Materializer<'a> {
	pub(crate) fn new(
		env: &'a ParseEnv<'a>,
		parsers: &'a ParserRegistry,
		members: &'a MemberBindings,
		diagnostics: &'a mut Diagnostics,
	) -> Self {
		Self {
			env,
			parsers,
			members,
			diagnostics,
			trail: Vec::new(),
		}
	}

	fn types(&self) -> &'a TypeRegistry {
		self.env.types
	}

	fn path(&self) -> String {
		self.trail.join("/")
	}

	fn error(&mut self, kind: DiagnosticKind, message: String) {
		let path = self.path();
		self.diagnostics.error(kind, path, message);
	}

	fn warn(&mut self, kind: DiagnosticKind, message: String) {
		let path = self.path();
		self.diagnostics.warn(kind, path, message);
	}

	/// Populates an existing def from its node. The ID is assigned before and after
	/// population so members cannot overwrite it.
	pub(crate) fn populate_def(&mut self, cell: &DefCell, info: &TypeInfo, id: &str, node: &DocumentNode) {
		self.trail.clear();
		self.trail.push(id.to_string());

		let mut def = cell.write();
		def.set_id(id);
		self.populate((*def).as_any_mut(), info, node);
		def.set_id(id);

		if let Some(hook) = info.post_construct_hook() {
			let env = self.env;
			let ctx = Frame::root(node, node.text().unwrap_or_default(), info).context(env, None);
			hook((*def).as_any_mut(), &ctx);
		}
		self.trail.clear();
	}

	/// Builds a standalone class instance (used for patches) from `node`.
	pub(crate) fn materialize_class(&mut self, info: &TypeInfo, node: &DocumentNode, label: &str) -> Option<AnyValue> {
		self.trail.clear();
		self.trail.push(label.to_string());
		let mut current = None;
		let outcome = self.parse_class(Frame::root(node, node.text().unwrap_or_default(), info), &mut current);
		self.trail.clear();
		match outcome {
			ParseOutcome::Value(value) => Some(self.post_construct(Frame::root(node, "", info), value)),
			_ => None,
		}
	}

	/// Resets every member of a reused def to the value a fresh instance would hold.
	pub(crate) fn reset(&mut self, cell: &DefCell, info: &TypeInfo, id: &str) {
		let mut fresh = match info.instantiate(None) {
			Ok(fresh) => fresh,
			Err(err) => {
				self.diagnostics
					.error(DiagnosticKind::Construction, id, format!("cannot reset reused def: {err}"));
				return;
			}
		};
		let mut def = cell.write();
		for member in info.members().unwrap_or_default() {
			if MemberBindings::is_reserved(member.name()) {
				continue;
			}
			if let Some(value) = member.take(&mut *fresh)
				&& let Err(err) = member.assign((*def).as_any_mut(), value)
			{
				self.diagnostics
					.error(DiagnosticKind::Conversion, id, format!("cannot reset member '{}': {err}", member.name()));
			}
		}
		def.set_id(id);
	}

	fn parse_node(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> ParseOutcome {
		if let Some(node) = frame.node
			&& node.attr_flag("Null") == Some(true)
		{
			return ParseOutcome::ForceNull;
		}

		let outcome = match frame.target.shape() {
			Shape::Nullable { .. } => return self.parse_nullable(frame, current),
			Shape::List { .. } => self.parse_list(frame, current),
			Shape::Map { .. } => self.parse_map(frame, current),
			_ => match self.parsers.find(frame.target) {
				Some(parser) => {
					let env = self.env;
					let ctx = frame.context(env, current.as_deref());
					match parser.parse(&ctx) {
						Ok(value) => ParseOutcome::Value(value),
						Err(err) => {
							self.error(
								DiagnosticKind::Conversion,
								format!("cannot parse '{}' as {}: {err}", frame.text, frame.target.name()),
							);
							ParseOutcome::NoValue
						}
					}
				}
				None => self.parse_class(frame, current),
			},
		};

		match outcome {
			ParseOutcome::Value(value) => ParseOutcome::Value(self.post_construct(frame, value)),
			other => other,
		}
	}

	fn post_construct(&mut self, frame: Frame<'_>, mut value: AnyValue) -> AnyValue {
		let hook = self
			.types()
			.get(TypeKey::of_value(&*value))
			.and_then(TypeInfo::post_construct_hook);
		if let Some(hook) = hook {
			let env = self.env;
			let ctx = frame.context(env, None);
			hook(&mut *value, &ctx);
		}
		value
	}

	fn parse_nullable(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> ParseOutcome {
		let Shape::Nullable {
			inner,
			wrap_some,
			take_inner,
			make_none,
		} = frame.target.shape()
		else {
			return ParseOutcome::NoValue;
		};
		let Some(inner_info) = self.types().get(*inner) else {
			self.error(
				DiagnosticKind::Resolution,
				format!("inner type of {} is not registered", frame.target.name()),
			);
			return ParseOutcome::NoValue;
		};

		let matches = current
			.as_deref()
			.is_some_and(|value| TypeKey::of_value(value) == frame.target.key());
		let mut inner_current = if matches { current.take().and_then(take_inner) } else { None };

		let inner_frame = Frame {
			target: inner_info,
			declared: inner_info,
			..frame
		};
		match self.parse_node(inner_frame, &mut inner_current) {
			ParseOutcome::Value(value) => match wrap_some(value) {
				Ok(wrapped) => ParseOutcome::Value(wrapped),
				Err(_) => {
					self.error(
						DiagnosticKind::Conversion,
						format!("value does not fit {}", frame.target.name()),
					);
					ParseOutcome::NoValue
				}
			},
			ParseOutcome::ForceNull => ParseOutcome::ForceNull,
			ParseOutcome::NoValue => {
				if matches {
					*current = Some(match inner_current {
						Some(inner) => wrap_some(inner).unwrap_or_else(|_| make_none()),
						None => make_none(),
					});
				}
				ParseOutcome::NoValue
			}
		}
	}

	/// Reuses `current` when it already has the target type, else creates a fresh instance.
	fn take_or_create(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> Option<AnyValue> {
		if current
			.as_deref()
			.is_some_and(|value| TypeKey::of_value(value) == frame.target.key())
		{
			return current.take();
		}
		let env = self.env;
		let ctx = frame.context(env, current.as_deref());
		match frame.target.instantiate(Some(&ctx)) {
			Ok(value) => Some(value),
			Err(err) => {
				self.error(DiagnosticKind::Construction, err.to_string());
				None
			}
		}
	}

	/// Resolves a container's element type, honoring an override attribute.
	fn element_override(&mut self, node: Option<&DocumentNode>, attr: &str, declared: TypeKey) -> Option<TypeKey> {
		let Some(name) = node.and_then(|n| n.attr(attr)) else {
			return Some(declared);
		};
		let types = self.types();
		let Some(found) = self.env.resolver.resolve(types, name) else {
			self.error(
				DiagnosticKind::Resolution,
				format!(
					"cannot resolve {attr} '{name}', falling back to {}",
					types.name_of(declared)
				),
			);
			return Some(declared);
		};
		let found = types.strip_nullable(found);
		if !types.is_assignable(found, declared) {
			self.error(
				DiagnosticKind::Resolution,
				format!(
					"{attr} '{name}' is not assignable to {}",
					types.name_of(declared)
				),
			);
			return None;
		}
		Some(found)
	}

	fn parse_list(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> ParseOutcome {
		let Shape::List { element, push, len } = frame.target.shape() else {
			return ParseOutcome::NoValue;
		};
		let declared_element = *element;
		let Some(element) = self.element_override(frame.node, "ElementType", declared_element) else {
			return ParseOutcome::NoValue;
		};
		let types = self.types();
		let Some(element_info) = types.get(element) else {
			self.error(
				DiagnosticKind::Resolution,
				format!("element type of {} is not registered", frame.target.name()),
			);
			return ParseOutcome::NoValue;
		};
		let Some(mut list) = self.take_or_create(frame, current) else {
			return ParseOutcome::NoValue;
		};
		let Some(node) = frame.node else {
			return ParseOutcome::Value(list);
		};
		for child in node.children() {
			let index = len(&*list);
			self.trail.push(format!("{}[{index}]", child.name()));
			if let Some(target) = self.child_type(child, element_info) {
				let child_frame = Frame {
					node: Some(child),
					text: child.text().unwrap_or_default(),
					target,
					declared: element_info,
					owner: Some(erased(&list)),
					member: frame.member,
					slot: Slot::ListIndex(index),
				};
				let mut none = None;
				let item = match self.parse_node(child_frame, &mut none) {
					ParseOutcome::Value(value) => Some(value),
					ParseOutcome::ForceNull => {
						let null = types.null_value(declared_element);
						if null.is_none() {
							self.error(
								DiagnosticKind::Conversion,
								format!("item of type {} cannot be null", types.name_of(declared_element)),
							);
						}
						null
					}
					ParseOutcome::NoValue => None,
				};
				if let Some(item) = item {
					match types.coerce(item, declared_element) {
						Ok(item) => {
							if push(&mut *list, item).is_err() {
								self.error(
									DiagnosticKind::Conversion,
									format!("cannot add item to {}", frame.target.name()),
								);
							}
						}
						Err(_) => self.error(
							DiagnosticKind::Conversion,
							format!("item is not assignable to {}", types.name_of(declared_element)),
						),
					}
				}
			}
			self.trail.pop();
		}
		ParseOutcome::Value(list)
	}

	fn parse_map(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> ParseOutcome {
		let Shape::Map { key, value, insert } = frame.target.shape() else {
			return ParseOutcome::NoValue;
		};
		let (declared_key, declared_value) = (*key, *value);
		let Some(key) = self.element_override(frame.node, "KeyType", declared_key) else {
			return ParseOutcome::NoValue;
		};
		let Some(value) = self.element_override(frame.node, "ElementType", declared_value) else {
			return ParseOutcome::NoValue;
		};
		let types = self.types();
		let (Some(key_info), Some(value_info)) = (types.get(key), types.get(value)) else {
			self.error(
				DiagnosticKind::Resolution,
				format!("key or value type of {} is not registered", frame.target.name()),
			);
			return ParseOutcome::NoValue;
		};
		let Some(mut map) = self.take_or_create(frame, current) else {
			return ParseOutcome::NoValue;
		};
		let Some(node) = frame.node else {
			return ParseOutcome::Value(map);
		};
		let key_parser = self.parsers.find(key_info);

		for child in node.children() {
			self.trail.push(child.name().to_string());
			let parsed_key = match &key_parser {
				None => Err(format!("no parser handles key type {}", key_info.name())),
				Some(parser) if !parser.context_free() => Err(format!(
					"parser '{}' for key type {} cannot parse without a node",
					parser.name(),
					key_info.name()
				)),
				Some(parser) => {
					let env = self.env;
					let key_frame = Frame {
						node: None,
						text: child.name(),
						target: key_info,
						declared: key_info,
						owner: Some(erased(&map)),
						member: frame.member,
						slot: Slot::Root,
					};
					parser
						.parse(&key_frame.context(env, None))
						.map_err(|err| format!("cannot parse key '{}' as {}: {err}", child.name(), key_info.name()))
				}
			};
			let parsed_key = parsed_key.and_then(|k| {
				types
					.coerce(k, declared_key)
					.map_err(|_| format!("key is not assignable to {}", types.name_of(declared_key)))
			});
			let map_key = match parsed_key {
				Ok(map_key) => map_key,
				Err(message) => {
					self.error(DiagnosticKind::Conversion, format!("{message}; entry skipped"));
					self.trail.pop();
					continue;
				}
			};

			if let Some(target) = self.child_type(child, value_info) {
				let child_frame = Frame {
					node: Some(child),
					text: child.text().unwrap_or_default(),
					target,
					declared: value_info,
					owner: Some(erased(&map)),
					member: frame.member,
					slot: Slot::DictKey(&*map_key),
				};
				let mut none = None;
				let entry = match self.parse_node(child_frame, &mut none) {
					ParseOutcome::Value(v) => Some(v),
					ParseOutcome::ForceNull => {
						let null = types.null_value(declared_value);
						if null.is_none() {
							self.error(
								DiagnosticKind::Conversion,
								format!("value of type {} cannot be null", types.name_of(declared_value)),
							);
						}
						null
					}
					ParseOutcome::NoValue => None,
				};
				if let Some(entry) = entry {
					match types.coerce(entry, declared_value) {
						Ok(entry) => match insert(&mut *map, map_key, entry) {
							MapInsert::Inserted => {}
							MapInsert::Replaced => self.warn(
								DiagnosticKind::Conversion,
								format!("duplicate key '{}' replaced an earlier entry", child.name()),
							),
							MapInsert::Mismatch => self.error(
								DiagnosticKind::Conversion,
								format!("cannot insert into {}", frame.target.name()),
							),
						},
						Err(_) => self.error(
							DiagnosticKind::Conversion,
							format!("value is not assignable to {}", types.name_of(declared_value)),
						),
					}
				}
			}
			self.trail.pop();
		}
		ParseOutcome::Value(map)
	}

	fn parse_class(&mut self, frame: Frame<'_>, current: &mut Option<AnyValue>) -> ParseOutcome {
		match frame.target.shape() {
			Shape::Class { .. } => {}
			Shape::Abstract { .. } => {
				self.error(
					DiagnosticKind::Resolution,
					format!(
						"{} is abstract; name a concrete type with Type=\"...\"",
						frame.target.name()
					),
				);
				return ParseOutcome::NoValue;
			}
			_ => {
				self.error(
					DiagnosticKind::Conversion,
					format!("no parser handles {}", frame.target.name()),
				);
				return ParseOutcome::NoValue;
			}
		}
		let Some(mut instance) = self.take_or_create(frame, current) else {
			return ParseOutcome::NoValue;
		};
		if let Some(node) = frame.node {
			self.populate(&mut *instance, frame.target, node);
		}
		ParseOutcome::Value(instance)
	}

	/// Writes every child of `node` into the matching member of `owner`.
	fn populate(&mut self, owner: &mut dyn Any, info: &TypeInfo, node: &DocumentNode) {
		for child in node.children() {
			self.trail.push(child.name().to_string());
			match self.members.find(info, child.name()) {
				Some(member) => self.populate_member(owner, member, child),
				None => self.error(
					DiagnosticKind::Resolution,
					format!("{} has no bindable member named '{}'", info.name(), child.name()),
				),
			}
			self.trail.pop();
		}
	}

	fn populate_member(&mut self, owner: &mut dyn Any, member: &MemberDescriptor, child: &DocumentNode) {
		let types = self.types();
		let Some(declared) = types.get(member.value_type()) else {
			self.error(
				DiagnosticKind::Resolution,
				format!("type of member '{}' is not registered", member.name()),
			);
			return;
		};
		let Some(target) = self.child_type(child, declared) else {
			return;
		};

		let mut current = member.take(owner);
		let frame = Frame {
			node: Some(child),
			text: child.text().unwrap_or_default(),
			target,
			declared,
			owner: Some(&*owner),
			member: Some(member),
			slot: Slot::Member,
		};
		let write = match self.parse_node(frame, &mut current) {
			ParseOutcome::Value(value) => match types.coerce(value, declared.key()) {
				Ok(value) => Some(value),
				Err(_) => {
					self.error(
						DiagnosticKind::Conversion,
						format!(
							"value of type {} cannot be stored in member '{}' of type {}",
							target.name(),
							member.name(),
							declared.name()
						),
					);
					None
				}
			},
			ParseOutcome::ForceNull => {
				let null = types.null_value(declared.key());
				if null.is_none() {
					self.error(
						DiagnosticKind::Conversion,
						format!("member '{}' of type {} cannot be null", member.name(), declared.name()),
					);
				}
				null
			}
			ParseOutcome::NoValue => None,
		};

		if let Some(value) = write.or(current)
			&& let Err(err) = member.assign(owner, value)
		{
			self.error(
				DiagnosticKind::Conversion,
				format!("cannot assign member '{}': {err}", member.name()),
			);
		}
	}

	/// Effective type of a child: its `Type` override if it resolves, else `declared`.
	///
	/// An override that is not assignable to `declared` skips the child.
	fn child_type(&mut self, child: &DocumentNode, declared: &'a TypeInfo) -> Option<&'a TypeInfo> {
		let Some(name) = child.attr("Type") else {
			return Some(declared);
		};
		let types = self.types();
		let Some(found) = self.env.resolver.resolve(types, name) else {
			self.error(
				DiagnosticKind::Resolution,
				format!("cannot resolve type '{name}', falling back to {}", declared.name()),
			);
			return Some(declared);
		};
		let found = types.strip_nullable(found);
		if !types.is_assignable(found, declared.key()) {
			self.error(
				DiagnosticKind::Resolution,
				format!(
					"type '{name}' is not assignable to {}",
					declared.name()
				),
			);
			return None;
		}
		types.get(found)
	}
}

fn erased(value: &AnyValue) -> &dyn Any {
	&**value
}
