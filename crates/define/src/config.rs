//! Load configuration: member binding policy, list inference and duplicate handling.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use kdl::{KdlDocument, KdlNode};
use thiserror::Error;

bitflags! {
	/// Member visibilities eligible for binding by default.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct Visibility: u8 {
		const PUBLIC = 1;
		const NON_PUBLIC = 1 << 1;
	}
}

bitflags! {
	/// Member kinds eligible for binding by default.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct MemberKinds: u8 {
		const FIELD = 1;
		const PROPERTY = 1 << 1;
	}
}

/// What happens when two typed, non-abstract top-level nodes share an ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateIds {
	/// Keep the first node in master order, report the rest.
	#[default]
	FirstWins,
	/// Keep the last node in master order, report the earlier ones.
	LastWins,
	/// Report and drop every node carrying the ID.
	RejectAll,
}

/// Errors produced while reading a load configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The configuration is not valid KDL.
	#[error("KDL parse error: {0}")]
	Kdl(#[from] kdl::KdlError),
	/// The configuration file could not be read.
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },
	/// A top-level key is not a known setting.
	#[error("unknown setting: {0}")]
	UnknownSetting(String),
	/// A setting has a value of the wrong shape.
	#[error("invalid value for '{key}': expected {expected}")]
	InvalidValue { key: String, expected: &'static str },
}

/// Settings that shape one load session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
	pub member_visibility: Visibility,
	pub member_kinds: MemberKinds,
	/// Whether document child names must match member names exactly.
	pub case_sensitive_members: bool,
	/// Child name that marks list items; a node whose children all use it is merged by appending.
	pub list_item_name: String,
	pub duplicate_ids: DuplicateIds,
	/// Whether `post_load`, `late_post_load` and `config_errors` run again after a reload.
	pub rerun_callbacks_on_reload: bool,
}

impl Default for LoadConfig {
	fn default() -> Self {
		Self {
			member_visibility: Visibility::PUBLIC,
			member_kinds: MemberKinds::FIELD,
			case_sensitive_members: true,
			list_item_name: "li".to_string(),
			duplicate_ids: DuplicateIds::default(),
			rerun_callbacks_on_reload: true,
		}
	}
}

impl LoadConfig {
	/// Reads settings from KDL, starting from the defaults.
	///
	/// ```kdl
	/// member-visibility "public" "non-public"
	/// member-kinds "field" "property"
	/// case-sensitive-members #false
	/// list-item-name "item"
	/// duplicate-ids "last-wins"
	/// rerun-callbacks-on-reload #true
	/// ```
	pub fn from_kdl(input: &str) -> Result<Self, ConfigError> {
		let doc: KdlDocument = input.parse()?;
		let mut config = Self::default();

		for node in doc.nodes() {
			let key = node.name().value();
			match key {
				"member-visibility" => {
					config.member_visibility = Visibility::empty();
					for word in string_args(node, "\"public\" or \"non-public\"")? {
						config.member_visibility |= match word {
							"public" => Visibility::PUBLIC,
							"non-public" => Visibility::NON_PUBLIC,
							_ => return Err(invalid(key, "\"public\" or \"non-public\"")),
						};
					}
				}
				"member-kinds" => {
					config.member_kinds = MemberKinds::empty();
					for word in string_args(node, "\"field\" or \"property\"")? {
						config.member_kinds |= match word {
							"field" => MemberKinds::FIELD,
							"property" => MemberKinds::PROPERTY,
							_ => return Err(invalid(key, "\"field\" or \"property\"")),
						};
					}
				}
				"case-sensitive-members" => config.case_sensitive_members = bool_arg(node)?,
				"list-item-name" => {
					config.list_item_name = node
						.get(0)
						.and_then(|v| v.as_string())
						.filter(|s| !s.is_empty())
						.ok_or_else(|| invalid(key, "a non-empty string"))?
						.to_string();
				}
				"duplicate-ids" => {
					let expected = "\"first-wins\", \"last-wins\" or \"reject-all\"";
					config.duplicate_ids = match node.get(0).and_then(|v| v.as_string()) {
						Some("first-wins") => DuplicateIds::FirstWins,
						Some("last-wins") => DuplicateIds::LastWins,
						Some("reject-all") => DuplicateIds::RejectAll,
						_ => return Err(invalid(key, expected)),
					};
				}
				"rerun-callbacks-on-reload" => config.rerun_callbacks_on_reload = bool_arg(node)?,
				other => return Err(ConfigError::UnknownSetting(other.to_string())),
			}
		}

		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_kdl(&content)
	}
}

fn invalid(key: &str, expected: &'static str) -> ConfigError {
	ConfigError::InvalidValue {
		key: key.to_string(),
		expected,
	}
}

fn string_args<'a>(node: &'a KdlNode, expected: &'static str) -> Result<Vec<&'a str>, ConfigError> {
	node.entries()
		.iter()
		.filter(|e| e.name().is_none())
		.map(|e| e.value().as_string().ok_or_else(|| invalid(node.name().value(), expected)))
		.collect()
}

fn bool_arg(node: &KdlNode) -> Result<bool, ConfigError> {
	node.get(0)
		.and_then(|v| v.as_bool())
		.ok_or_else(|| invalid(node.name().value(), "#true or #false"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_bind_public_fields_case_sensitively() {
		let config = LoadConfig::default();
		assert_eq!(config.member_visibility, Visibility::PUBLIC);
		assert_eq!(config.member_kinds, MemberKinds::FIELD);
		assert!(config.case_sensitive_members);
		assert_eq!(config.list_item_name, "li");
		assert_eq!(config.duplicate_ids, DuplicateIds::FirstWins);
	}

	#[test]
	fn reads_every_setting() {
		let config = LoadConfig::from_kdl(
			r#"
			member-visibility "public" "non-public"
			member-kinds "property"
			case-sensitive-members #false
			list-item-name "item"
			duplicate-ids "reject-all"
			rerun-callbacks-on-reload #false
			"#,
		)
		.expect("config should parse");

		assert_eq!(config.member_visibility, Visibility::PUBLIC | Visibility::NON_PUBLIC);
		assert_eq!(config.member_kinds, MemberKinds::PROPERTY);
		assert!(!config.case_sensitive_members);
		assert_eq!(config.list_item_name, "item");
		assert_eq!(config.duplicate_ids, DuplicateIds::RejectAll);
		assert!(!config.rerun_callbacks_on_reload);
	}

	#[test]
	fn rejects_unknown_settings() {
		let err = LoadConfig::from_kdl("list-item \"x\"").expect_err("unknown key should fail");
		assert!(matches!(err, ConfigError::UnknownSetting(key) if key == "list-item"));
	}

	#[test]
	fn rejects_bad_values() {
		assert!(matches!(
			LoadConfig::from_kdl("duplicate-ids \"sometimes\""),
			Err(ConfigError::InvalidValue { .. })
		));
		assert!(matches!(
			LoadConfig::from_kdl("case-sensitive-members \"yes\""),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn reads_from_file() {
		let dir = tempfile::tempdir().expect("temp dir should be creatable");
		let path = dir.path().join("defloom.kdl");
		std::fs::write(&path, "list-item-name \"entry\"").expect("config should be writable");
		let config = LoadConfig::from_file(&path).expect("config file should load");
		assert_eq!(config.list_item_name, "entry");
	}
}
