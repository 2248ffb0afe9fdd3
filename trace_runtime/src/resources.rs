const STANDARD_RESOURCES: [&str; 6] = [
    "coal",
    "iron-ore",
    "copper-ore",
    "stone",
    "uranium-ore",
    "crude-oil",
];
const ROCKS: [&str; 3] = ["rock-big", "rock-huge", "sand-rock-big"];
const TREE_PREFIXES: [&str; 2] = ["tree-", "dead-tree-"];

/// Whether `name` is a harvestable map resource (ore, rock or tree) rather
/// than a placed entity that gets picked up.
pub fn is_standard_resource(name: &str) -> bool {
    STANDARD_RESOURCES.contains(&name)
        || ROCKS.contains(&name)
        || TREE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || name.contains("tree")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_resources() {
        for name in [
            "coal",
            "iron-ore",
            "crude-oil",
            "rock-huge",
            "tree-01",
            "dead-tree-desert",
            "dry-tree",
        ] {
            assert!(is_standard_resource(name), "{name} should be harvestable");
        }
        for name in [
            "crash-site-spaceship-wreck",
            "wooden-chest",
            "iron-plate",
            "",
            "rock",
        ] {
            assert!(!is_standard_resource(name), "{name} should not be harvestable");
        }
    }
}
