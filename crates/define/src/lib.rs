#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Declarative definition loading.
//!
//! Definitions ("defs") are authored as KDL documents and turned into typed Rust
//! values in a fixed pipeline:
//!
//! 1. Sources are appended to one master document.
//! 2. `Parent` chains are folded into their defs ([`MasterDocument`]).
//! 3. Patch documents mutate the master tree ([`Patch`], [`ModifyPatch`]).
//! 4. Every concrete top-level node is materialized into the [`Def`] named by its
//!    `Type` attribute, using the [`TypeRegistry`] built at startup.
//! 5. Defs are registered in the [`DefDatabase`] and their callbacks run.
//!
//! ```kdl
//! Defs {
//!     Weapon Type="GunDef" { Damage 5 }
//!     Weapon2 Parent="Weapon" Type="GunDef" { Damage 10 }
//! }
//! ```
//!
//! Data problems never abort a load; they are collected as [`Diagnostic`]s in the
//! [`LoadReport`]. Only misuse of the session stages is an error ([`LoadError`]).

mod binding;
mod config;
mod database;
mod def;
mod diagnostics;
mod materialize;
mod merge;
pub mod parsers;
mod patch;
mod resolver;
mod session;
pub mod types;

pub use binding::{
	BindError, FieldAccess, Inclusion, MemberAccess, MemberBindings, MemberDescriptor, ProjectedAccess, PropertyAccess,
};
pub use config::{ConfigError, DuplicateIds, LoadConfig, MemberKinds, Visibility};
pub use database::DefDatabase;
pub use def::{AsAny, ConfigErrorReporter, Def, DefCell, DefHandle, DefLookup, DefRef};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use materialize::{ParseContext, ParseEnv, ParseOutcome, PostConstruct, PreConstruct, Slot};
pub use merge::MasterDocument;
pub use parsers::{ParseError, ParserRegistry, ValueParser};
pub use patch::{ModifyPatch, Operation, Patch, PatchOutcome};
pub use resolver::TypeResolver;
pub use session::{LoadError, LoadReport, LoadSession};
pub use types::{AnyValue, Bindable, ConstructError, Shape, TypeInfo, TypeKey, TypeRegistry, TypeRegistryBuilder};
