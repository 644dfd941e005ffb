use thiserror::Error;

/// Errors produced while reading source documents.
#[derive(Debug, Error)]
pub enum DocumentError {
	/// The source text is not valid KDL.
	#[error("invalid KDL: {0}")]
	Kdl(#[from] kdl::KdlError),
	/// A node carries more than one positional argument.
	#[error("node '{node}' has {count} values; at most one is supported")]
	TooManyValues { node: String, count: usize },
}

/// Errors produced while compiling a node selector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
	#[error("empty selector")]
	Empty,
	#[error("unexpected end of selector '{0}'")]
	UnexpectedEnd(String),
	#[error("unexpected '{found}' at offset {offset} in selector '{selector}'")]
	Unexpected { selector: String, offset: usize, found: char },
	#[error("position predicates are 1-based, got 0 in selector '{0}'")]
	ZeroPosition(String),
}
