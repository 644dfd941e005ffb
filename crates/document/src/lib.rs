//! Attributed document trees for definition sources.
//!
//! A [`DocumentNode`] is the unit every later stage works on: the merge engine
//! folds them, patches address them with a [`Selector`], and the materializer
//! reads them into typed values. Sources are written in KDL.

mod error;
mod kdl;
mod node;
mod select;

pub use error::{DocumentError, SelectorError};
pub use node::{Document, DocumentNode};
pub use select::{NodePath, Selector};

pub use self::kdl::parse_document;
