use std::marker::PhantomData;

use defloom_document::DocumentNode;

use super::{ParseError, ValueParser};
use crate::materialize::ParseContext;
use crate::types::{AnyValue, Shape, TypeInfo, TypeKey};

/// Resolves `DefRef<T>` from a def ID, checking the def's type against `T`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefRefParser;

impl ValueParser for DefRefParser {
	fn name(&self) -> &str {
		"def-ref"
	}

	fn context_free(&self) -> bool {
		true
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		matches!(ty.shape(), Shape::DefRef { .. })
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		let Shape::DefRef { target, make } = ctx.target.shape() else {
			return Err(ParseError::new(format!("{} is not a def reference", ctx.target.name())));
		};
		let id = ctx.text.trim();
		let handle = ctx.env.defs.find_def(id).ok_or_else(|| {
			ParseError::new(format!("failed to resolve def reference '{id}' as {}", ctx.target.name()))
		})?;
		let types = ctx.types();
		if !types.is_subtype(handle.type_key(), *target) {
			return Err(ParseError::new(format!(
				"def reference '{id}' is of type {}, which cannot be assigned to {}",
				types.name_of(handle.type_key()),
				ctx.target.name()
			)));
		}
		Ok(make(handle))
	}
}

/// Parses enum variants by exact name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumParser;

impl ValueParser for EnumParser {
	fn name(&self) -> &str {
		"enum"
	}

	fn context_free(&self) -> bool {
		true
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		matches!(ty.shape(), Shape::Enum { .. })
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		let Shape::Enum { names, parse } = ctx.target.shape() else {
			return Err(ParseError::new(format!("{} is not an enum", ctx.target.name())));
		};
		let text = ctx.text.trim();
		parse(text).ok_or_else(|| {
			ParseError::new(format!(
				"'{text}' is not a variant of {} (expected one of: {})",
				ctx.target.name(),
				names.join(", ")
			))
		})
	}
}

/// Hands the raw node through as a [`DocumentNode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeParser;

impl ValueParser for NodeParser {
	fn name(&self) -> &str {
		"node"
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		ty.key() == TypeKey::of::<DocumentNode>()
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		ctx.node
			.map(|node| Box::new(node.clone()) as AnyValue)
			.ok_or_else(|| ParseError::new("a document node is required"))
	}
}

/// Resolves a type name to its [`TypeKey`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeNameParser;

impl ValueParser for TypeNameParser {
	fn name(&self) -> &str {
		"type-name"
	}

	fn context_free(&self) -> bool {
		true
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		ty.key() == TypeKey::of::<TypeKey>()
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		let name = ctx.text.trim();
		ctx.env
			.resolver
			.resolve(ctx.types(), name)
			.map(|key| Box::new(key) as AnyValue)
			.ok_or_else(|| ParseError::new(format!("failed to find any type called '{name}'")))
	}
}

/// Context-free parser for `T` built from a plain text conversion.
pub struct SimpleParser<T> {
	name: &'static str,
	parse: fn(&str) -> Result<T, String>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> SimpleParser<T> {
	pub fn new(name: &'static str, parse: fn(&str) -> Result<T, String>) -> Self {
		Self {
			name,
			parse,
			_marker: PhantomData,
		}
	}
}

impl<T: Send + Sync + 'static> ValueParser for SimpleParser<T> {
	fn name(&self) -> &str {
		self.name
	}

	fn context_free(&self) -> bool {
		true
	}

	fn can_handle(&self, ty: &TypeInfo) -> bool {
		ty.key() == TypeKey::of::<T>()
	}

	fn parse(&self, ctx: &ParseContext<'_>) -> Result<AnyValue, ParseError> {
		(self.parse)(ctx.text)
			.map(|value| Box::new(value) as AnyValue)
			.map_err(ParseError::new)
	}
}
