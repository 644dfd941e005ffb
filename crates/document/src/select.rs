//! Node selectors: a small XPath subset used to address nodes in a tree.
//!
//! Supported: absolute (`/Defs/Gun`) and root-relative (`Gun/Damage`) paths, `//`
//! descendant steps, `*`, `.`, `..`, and the predicates `[n]`, `[@attr]`,
//! `[@attr='v']`, `[child]`, `[child='v']` and `[text()='v']`.
//!
//! Matches are returned as child-index paths from the root node, unique and in
//! document order.

use crate::{DocumentNode, SelectorError};

/// Child-index path from the root node. The empty path is the root itself.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
	Any,
	Current,
	Parent,
	Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
	Position(usize),
	HasAttr(String),
	AttrEquals(String, String),
	HasChild(String),
	ChildEquals(String, String),
	TextEquals(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
	descendants: bool,
	test: NameTest,
	predicates: Vec<Predicate>,
}

/// A compiled selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
	absolute: bool,
	steps: Vec<Step>,
}

/// Evaluation context: either the virtual document above the root, or a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Context {
	Document,
	Node(NodePath),
}

impl Selector {
	pub fn parse(source: &str) -> Result<Self, SelectorError> {
		Parser { source, pos: 0 }.parse()
	}

	/// Evaluates the selector against `root`.
	pub fn select(&self, root: &DocumentNode) -> Vec<NodePath> {
		let mut contexts = vec![if self.absolute { Context::Document } else { Context::Node(Vec::new()) }];

		for step in &self.steps {
			if step.descendants {
				contexts = contexts.iter().flat_map(|ctx| descendants_or_self(root, ctx)).collect();
			}

			let mut next = Vec::new();
			for ctx in &contexts {
				let mut candidates: Vec<Context> = match &step.test {
					NameTest::Current => vec![ctx.clone()],
					NameTest::Parent => parent_of(ctx).into_iter().collect(),
					NameTest::Any => children_of(root, ctx),
					NameTest::Named(name) => children_of(root, ctx)
						.into_iter()
						.filter(|c| node_of(root, c).is_some_and(|n| n.name() == name))
						.collect(),
				};

				for predicate in &step.predicates {
					candidates = candidates
						.into_iter()
						.enumerate()
						.filter(|(index, c)| node_of(root, c).is_some_and(|n| predicate.matches(index + 1, n)))
						.map(|(_, c)| c)
						.collect();
				}
				next.extend(candidates);
			}

			next.sort();
			next.dedup();
			contexts = next;
		}

		contexts
			.into_iter()
			.filter_map(|ctx| match ctx {
				Context::Document => None,
				Context::Node(path) => Some(path),
			})
			.collect()
	}
}

impl Predicate {
	fn matches(&self, position: usize, node: &DocumentNode) -> bool {
		match self {
			Predicate::Position(n) => position == *n,
			Predicate::HasAttr(key) => node.attr(key).is_some(),
			Predicate::AttrEquals(key, value) => node.attr(key) == Some(value.as_str()),
			Predicate::HasChild(name) => node.child(name).is_some(),
			Predicate::ChildEquals(name, value) => node
				.children()
				.iter()
				.any(|c| c.name() == name && c.text().unwrap_or_default() == value),
			Predicate::TextEquals(value) => node.text().unwrap_or_default() == value,
		}
	}
}

fn node_of<'a>(root: &'a DocumentNode, ctx: &Context) -> Option<&'a DocumentNode> {
	match ctx {
		Context::Document => None,
		Context::Node(path) => root.descendant_at(path),
	}
}

fn children_of(root: &DocumentNode, ctx: &Context) -> Vec<Context> {
	match ctx {
		Context::Document => vec![Context::Node(Vec::new())],
		Context::Node(path) => {
			let count = root.descendant_at(path).map_or(0, |n| n.children().len());
			(0..count)
				.map(|i| {
					let mut child = path.clone();
					child.push(i);
					Context::Node(child)
				})
				.collect()
		}
	}
}

fn parent_of(ctx: &Context) -> Option<Context> {
	match ctx {
		Context::Document => None,
		Context::Node(path) if path.is_empty() => Some(Context::Document),
		Context::Node(path) => Some(Context::Node(path[..path.len() - 1].to_vec())),
	}
}

fn descendants_or_self(root: &DocumentNode, ctx: &Context) -> Vec<Context> {
	let mut out = vec![ctx.clone()];
	let mut index = 0;
	while index < out.len() {
		let children = children_of(root, &out[index]);
		out.extend(children);
		index += 1;
	}
	out.sort();
	out
}

struct Parser<'s> {
	source: &'s str,
	pos: usize,
}

impl Parser<'_> {
	fn parse(mut self) -> Result<Selector, SelectorError> {
		self.skip_ws();
		if self.at_end() {
			return Err(SelectorError::Empty);
		}

		let absolute = self.peek() == Some('/');
		let mut steps = Vec::new();
		let mut first = true;

		loop {
			let mut descendants = false;
			if self.eat('/') {
				descendants = self.eat('/');
			} else if !first {
				break;
			}
			first = false;
			steps.push(self.step(descendants)?);
			self.skip_ws();
			if self.at_end() {
				break;
			}
		}

		if let Some(found) = self.peek() {
			return Err(self.unexpected(found));
		}
		Ok(Selector { absolute, steps })
	}

	fn step(&mut self, descendants: bool) -> Result<Step, SelectorError> {
		self.skip_ws();
		let name = self.name()?;
		let test = match name.as_str() {
			"*" => NameTest::Any,
			"." => NameTest::Current,
			".." => NameTest::Parent,
			_ => NameTest::Named(name),
		};

		let mut predicates = Vec::new();
		loop {
			self.skip_ws();
			if !self.eat('[') {
				break;
			}
			predicates.push(self.predicate()?);
		}

		Ok(Step {
			descendants,
			test,
			predicates,
		})
	}

	fn predicate(&mut self) -> Result<Predicate, SelectorError> {
		self.skip_ws();
		let predicate = match self.peek() {
			None => return Err(SelectorError::UnexpectedEnd(self.source.to_string())),
			Some(c) if c.is_ascii_digit() => {
				let start = self.pos;
				while self.peek().is_some_and(|c| c.is_ascii_digit()) {
					self.pos += 1;
				}
				let n = self.source[start..self.pos]
					.parse::<usize>()
					.map_err(|_| SelectorError::ZeroPosition(self.source.to_string()))?;
				if n == 0 {
					return Err(SelectorError::ZeroPosition(self.source.to_string()));
				}
				Predicate::Position(n)
			}
			Some('@') => {
				self.pos += 1;
				let key = self.name()?;
				match self.equals_literal()? {
					Some(value) => Predicate::AttrEquals(key, value),
					None => Predicate::HasAttr(key),
				}
			}
			Some(_) => {
				let name = self.name()?;
				if name == "text" && self.eat('(') {
					self.expect(')')?;
					match self.equals_literal()? {
						Some(value) => Predicate::TextEquals(value),
						None => return Err(self.unexpected_here()),
					}
				} else {
					match self.equals_literal()? {
						Some(value) => Predicate::ChildEquals(name, value),
						None => Predicate::HasChild(name),
					}
				}
			}
		};
		self.skip_ws();
		self.expect(']')?;
		Ok(predicate)
	}

	fn equals_literal(&mut self) -> Result<Option<String>, SelectorError> {
		self.skip_ws();
		if !self.eat('=') {
			return Ok(None);
		}
		self.skip_ws();
		let quote = match self.peek() {
			Some(q @ ('\'' | '"')) => q,
			Some(_) => return Err(self.unexpected_here()),
			None => return Err(SelectorError::UnexpectedEnd(self.source.to_string())),
		};
		self.pos += 1;
		let start = self.pos;
		let Some(len) = self.source[start..].find(quote) else {
			return Err(SelectorError::UnexpectedEnd(self.source.to_string()));
		};
		self.pos = start + len + 1;
		Ok(Some(self.source[start..start + len].to_string()))
	}

	fn name(&mut self) -> Result<String, SelectorError> {
		let start = self.pos;
		while let Some(c) = self.peek() {
			if c.is_whitespace() || matches!(c, '/' | '[' | ']' | '=' | '@' | '(' | ')' | '\'' | '"') {
				break;
			}
			self.pos += c.len_utf8();
		}
		if start == self.pos {
			return Err(match self.peek() {
				Some(c) => self.unexpected(c),
				None => SelectorError::UnexpectedEnd(self.source.to_string()),
			});
		}
		Ok(self.source[start..self.pos].to_string())
	}

	fn peek(&self) -> Option<char> {
		self.source[self.pos..].chars().next()
	}

	fn at_end(&self) -> bool {
		self.pos >= self.source.len()
	}

	fn eat(&mut self, c: char) -> bool {
		if self.peek() == Some(c) {
			self.pos += c.len_utf8();
			true
		} else {
			false
		}
	}

	fn expect(&mut self, c: char) -> Result<(), SelectorError> {
		if self.eat(c) { Ok(()) } else { Err(self.unexpected_here()) }
	}

	fn skip_ws(&mut self) {
		while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
			self.pos += c.len_utf8();
		}
	}

	fn unexpected_here(&self) -> SelectorError {
		match self.peek() {
			Some(c) => self.unexpected(c),
			None => SelectorError::UnexpectedEnd(self.source.to_string()),
		}
	}

	fn unexpected(&self, found: char) -> SelectorError {
		SelectorError::Unexpected {
			selector: self.source.to_string(),
			offset: self.pos,
			found,
		}
	}
}
