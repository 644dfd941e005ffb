mod common;

use common::{GunDef, load};
use defloom_define::DiagnosticKind;
use pretty_assertions::assert_eq;

#[test]
fn weapon2_inherits_from_weapon_across_documents() {
	let (db, report) = load(&[
		r#"Defs { Weapon Type="GunDef" { Damage 5 } }"#,
		r#"Defs { Weapon2 Parent="Weapon" Type="GunDef" { Damage 10 } }"#,
	]);
	assert!(report.diagnostics.is_empty(), "{:?}", common::messages(&report));
	assert_eq!(report.created, 2);
	assert_eq!(db.len(), 2);

	let damage = |id: &str| db.get(id).and_then(|h| h.read_as::<GunDef>().map(|g| g.damage));
	assert_eq!(damage("Weapon"), Some(5));
	assert_eq!(damage("Weapon2"), Some(10));
}

#[test]
fn three_level_chain_layers_leaf_over_root() {
	let (db, report) = load(&[r#"
		Defs {
			C Abstract=#true {
				Range 30
				Damage 1
				Label "root"
				Stats { Weight 4; Bulk 2 }
			}
			B Parent="C" Abstract=#true {
				Damage 2
				Stats { Weight 5 }
			}
			A Parent="B" Type="GunDef" {
				Damage 3
				Stats Inherit=#false { Bulk 9 }
			}
		}
	"#]);
	assert!(!report.has_errors(), "{:?}", common::messages(&report));
	assert_eq!(db.len(), 1, "abstract nodes are not materialized");

	let a = db.get("A").and_then(|h| h.read_as::<GunDef>()).expect("A is a gun");
	assert_eq!(a.range, 30.0);
	assert_eq!(a.damage, 3);
	assert_eq!(a.label.as_deref(), Some("root"));
	assert_eq!(a.stats.bulk, 9);
	assert_eq!(a.stats.weight, 0.0, "Inherit=false drops the inherited weight");
	assert!(a.stats.sealed);
}

#[test]
fn parent_cycles_register_nothing() {
	let (db, report) = load(&[r#"
		Defs {
			X Parent="Y" Type="GunDef" { Damage 1 }
			Y Parent="X" Type="GunDef" { Damage 2 }
			Z Type="GunDef" { Damage 3 }
		}
	"#]);
	assert!(db.get("X").is_none());
	assert!(db.get("Y").is_none());
	assert!(db.get("Z").is_some());

	let cyclic: Vec<String> = report
		.diagnostics
		.of_kind(DiagnosticKind::Resolution)
		.map(|d| d.path.clone())
		.collect();
	assert_eq!(cyclic, ["X", "Y"]);
}

#[test]
fn list_items_append_through_inheritance() {
	let (db, report) = load(&[r#"
		Defs {
			Base Abstract=#true {
				Tags { li "light"; li "cheap" }
				Costs { Steel 5; Wood 2 }
			}
			Pistol Parent="Base" Type="GunDef" {
				Tags { li "sidearm" }
				Costs { Steel 8 }
			}
		}
	"#]);
	assert!(report.diagnostics.is_empty(), "{:?}", common::messages(&report));

	let pistol = db.get("Pistol").and_then(|h| h.read_as::<GunDef>()).expect("pistol is a gun");
	assert_eq!(pistol.tags, ["light", "cheap", "sidearm"]);
	assert_eq!(pistol.costs.get("Steel"), Some(&8));
	assert_eq!(pistol.costs.get("Wood"), Some(&2));
}

#[test]
fn null_overrides_an_inherited_value() {
	let (db, _) = load(&[r#"
		Defs {
			Base Abstract=#true { Label "standard issue" }
			Plain Parent="Base" Type="GunDef"
			Blank Parent="Base" Type="GunDef" { Label Null=#true }
		}
	"#]);
	let label = |id: &str| {
		db.get(id)
			.and_then(|h| h.read_as::<GunDef>().map(|g| g.label.clone()))
			.expect("def exists")
	};
	assert_eq!(label("Plain").as_deref(), Some("standard issue"));
	assert_eq!(label("Blank"), None);
}

#[test]
fn missing_parents_skip_only_the_child() {
	let (db, report) = load(&[r#"
		Defs {
			Orphan Parent="Nobody" Type="GunDef"
			Sibling Type="GunDef" { Damage 4 }
		}
	"#]);
	assert!(db.get("Orphan").is_none());
	assert!(db.get("Sibling").is_some());
	assert_eq!(report.diagnostics.error_count(), 1);
	assert!(common::messages(&report)[0].contains("Nobody"));
}
