use defloom_document::{DocumentNode, Selector, parse_document};
use pretty_assertions::assert_eq;

fn master() -> DocumentNode {
	parse_document(
		r#"
		Defs {
			Pistol Type="GunDef" { Damage 5; Ammo "light" }
			Rifle Type="GunDef" { Damage 9 }
			Shovel Type="ToolDef" { Uses { li "dig"; li "bonk" } }
		}
		"#,
	)
	.expect("master should parse")
	.into_root()
	.expect("master should have a root")
}

#[test]
fn selected_paths_address_live_nodes() {
	let mut root = master();
	let paths = Selector::parse("*[@Type='GunDef']/Damage").expect("selector should parse").select(&root);
	assert_eq!(paths, vec![vec![0, 0], vec![1, 0]]);

	for path in &paths {
		let node = root.descendant_at_mut(path).expect("selected path should resolve");
		node.set_text(Some("1".into()));
	}

	let damages: Vec<_> = root
		.children()
		.iter()
		.filter_map(|def| def.child("Damage").and_then(|d| d.text()))
		.collect();
	assert_eq!(damages, vec!["1", "1"]);
}

#[test]
fn removal_in_reverse_order_keeps_paths_valid() {
	let mut root = master();
	let paths = Selector::parse("//li").expect("selector should parse").select(&root);
	for path in paths.iter().rev() {
		root.remove_at(path).expect("selected node should be removable");
	}
	let uses = root.child("Shovel").and_then(|s| s.child("Uses")).expect("uses should remain");
	assert!(uses.children().is_empty());
}
