//! Pluggable text-to-value converters.
//!
//! The materializer asks the registry for a parser before falling back to
//! class population. The first parser (in registration order) whose
//! [`ValueParser::can_handle`] accepts a type handles it from then on.

mod builtin;

use std::fmt;
use std::sync::Arc;

pub use builtin::{DefRefParser, EnumParser, NodeParser, SimpleParser, TypeNameParser};
use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

use crate::materialize::ParseContext;
use crate::types::{AnyValue, TypeInfo, TypeKey};

/// A parser rejected its input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(String);

impl ParseError {
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into())
	}

	pub fn message(&self) -> &str {
		&self.0
	}
}

/// Converts node text (or the node itself) into a value of a handled type.
pub trait ValueParser: Send + Sync {
	fn name(&self) -> &str;

	/// Whether [`parse`](Self::parse) works from `ctx.text` and `ctx.target` alone.
	/// Only context-free parsers may convert map keys.
	fn context_free(&self) -> bool {
		false
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool;

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError>;

	/// Called once per load after every def has been materialized.
	fn early_post_load(&self) {}
}

/// Ordered parser list with a per-type lookup cache.
pub struct ParserRegistry {
	parsers: Vec<Arc<dyn ValueParser>>,
	cache: RwLock<HashMap<TypeKey, Option<usize>>>,
}

impl Default for ParserRegistry {
	fn default() -> Self {
		Self::with_builtins()
	}
}

impl ParserRegistry {
	/// A registry without any parser.
	pub fn empty() -> Self {
		Self {
			parsers: Vec::new(),
			cache: RwLock::new(HashMap::default()),
		}
	}

	/// Def references, enums, raw nodes, type names, then the primitive scalars.
	pub fn with_builtins() -> Self {
		let mut registry = Self::empty();
		registry.add(DefRefParser);
		registry.add(EnumParser);
		registry.add(NodeParser);
		registry.add(TypeNameParser);
		registry.add(SimpleParser::<String>::new("string", |text| Ok(text.to_string())));
		registry.add(SimpleParser::<bool>::new("bool", parse_bool));
		registry.add(SimpleParser::<i32>::new("i32", parse_number));
		registry.add(SimpleParser::<i64>::new("i64", parse_number));
		registry.add(SimpleParser::<u32>::new("u32", parse_number));
		registry.add(SimpleParser::<u64>::new("u64", parse_number));
		registry.add(SimpleParser::<f32>::new("f32", parse_number));
		registry.add(SimpleParser::<f64>::new("f64", parse_number));
		registry.add(SimpleParser::<u8>::new("u8", parse_number));
		registry.add(SimpleParser::<usize>::new("usize", parse_number));
		registry
	}

	pub fn add(&mut self, parser: impl ValueParser + 'static) {
		self.add_shared(Arc::new(parser));
	}

	/// Adds a shared parser. Adding the same instance twice is a no-op.
	pub fn add_shared(&mut self, parser: Arc<dyn ValueParser>) {
		if self.parsers.iter().any(|p| Arc::ptr_eq(p, &parser)) {
			return;
		}
		self.parsers.push(parser);
		self.cache.write().clear();
	}

	pub fn find(&self, ty: &TypeInfo) -> Option<Arc<dyn ValueParser>> {
		let cached = self.cache.read().get(&ty.key()).copied();
		let index = match cached {
			Some(index) => index,
			None => {
				let index = self.parsers.iter().position(|p| p.can_handle(ty));
				self.cache.write().insert(ty.key(), index);
				index
			}
		};
		index.map(|i| self.parsers[i].clone())
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ValueParser>> {
		self.parsers.iter()
	}

	pub fn len(&self) -> usize {
		self.parsers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.parsers.is_empty()
	}
}

impl fmt::Debug for ParserRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.parsers.iter().map(|p| p.name())).finish()
	}
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, String>
where
	T::Err: fmt::Display,
{
	text.trim().parse().map_err(|err: T::Err| err.to_string())
}

fn parse_bool(text: &str) -> Result<bool, String> {
	let text = text.trim();
	if text.eq_ignore_ascii_case("true") {
		Ok(true)
	} else if text.eq_ignore_ascii_case("false") {
		Ok(false)
	} else {
		Err(format!("expected true or false, found '{text}'"))
	}
}
