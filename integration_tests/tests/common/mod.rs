#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use trace_runtime::RecordSource;

/// A fresh directory under the system temp dir, unique per test name.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("replay_integration")
        .join(format!("{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("scratch dir is writable");
    dir
}

/// A short session: metadata, one long walk, a craft, a harvest, a furnace
/// placed and fed, and a crash-site pickup.
pub fn session_sources() -> Vec<RecordSource> {
    vec![
        RecordSource::new("core-meta.jsonl", "{\"t\":0,\"seed\":123}\n"),
        RecordSource::new(
            "actions.jsonl",
            concat!(
                "{\"action\":\"move_to_direction\",\"tick\":300,\"player\":{",
                "\"start_movement\":{\"tick\":0,\"x\":0,\"y\":0},",
                "\"end_movement\":{\"tick\":300,\"x\":20,\"y\":0}}}\n",
                "{\"action\":\"craft_item\",\"t\":200,",
                "\"timing\":{\"start_tick\":150,\"end_tick\":200},",
                "\"crafting\":{\"recipe\":\"stone-furnace\",\"total_crafted\":1}}\n",
                "{\"action\":\"place_entity\",\"t\":320,\"item\":{\"name\":\"stone-furnace\"},",
                "\"entity\":{\"x\":21.0,\"y\":0.0,\"direction\":{\"value\":0}}}\n",
                "{\"action\":\"insert_item\",\"t\":340,",
                "\"entity\":{\"name\":\"stone-furnace\",\"x\":21.0,\"y\":0.0},",
                "\"items\":[{\"item\":\"coal\",\"count\":5},{\"item\":\"iron-ore\",\"count\":10}]}\n",
            ),
        ),
        RecordSource::new(
            "harvest_resource_collated.jsonl",
            concat!(
                "{\"t\":500,\"entity\":\"iron-ore\",\"x\":22,\"y\":1,\"duration_ticks\":120}\n",
                "{\"tick\":510,\"entity\":\"crash-site-spaceship-wreck\",\"x\":-3,\"y\":4}\n",
                "{\"entity\":\"coal\",\"x\":1,\"y\":1}\n",
            ),
        ),
    ]
}
