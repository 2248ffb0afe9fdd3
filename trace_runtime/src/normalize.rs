//! Record normalization: schema-versioned log records into canonical actions.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use trace_schema::{actions, ActionArgs, CanonicalAction};

use crate::decompose::{decompose, segment_action};
use crate::records::{
    CraftRecord, HarvestRecord, LogRecord, MoveRecord, PickupRecord, PlaceRecord, RecordShape,
    ResearchRecord, RotateRecord, SetRecipeRecord, TransferKind, TransferRecord, Unrecognized,
    HARVEST_COLLATED_SOURCE,
};
use crate::resources::is_standard_resource;

pub const DEFAULT_EXCLUDE_MARKER: &str = "crash-site";

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// Split movements into speed-bounded segments. Off for the analysis
    /// variant of a trace.
    pub decompose_moves: bool,
    /// Records whose resolved time exceeds this are dropped.
    pub max_tick: Option<i64>,
    /// Records whose serialized form contains any of these (case-insensitive)
    /// are dropped.
    pub exclude_markers: Vec<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            decompose_moves: true,
            max_tick: None,
            exclude_markers: vec![DEFAULT_EXCLUDE_MARKER.to_string()],
        }
    }
}

impl NormalizeOptions {
    pub fn undecomposed() -> Self {
        Self {
            decompose_moves: false,
            ..Self::default()
        }
    }

    pub fn with_max_tick(mut self, max_tick: Option<i64>) -> Self {
        self.max_tick = max_tick;
        self
    }

    pub fn with_exclude_markers(mut self, markers: Vec<String>) -> Self {
        self.exclude_markers = markers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record {origin}:{line} has no usable time field ('t' or 'tick')")]
    MissingTimeField { origin: String, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Metadata,
    Unrecognized(Unrecognized),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Actions(Vec<CanonicalAction>),
    Skipped(SkipReason),
}

impl Normalized {
    pub fn into_actions(self) -> Vec<CanonicalAction> {
        match self {
            Normalized::Actions(actions) => actions,
            Normalized::Skipped(_) => Vec::new(),
        }
    }
}

/// Normalizes one record. Metadata streams are dropped before time
/// resolution; a record without a usable time is an error for this record
/// only.
pub fn normalize(
    record: &LogRecord,
    options: &NormalizeOptions,
) -> Result<Normalized, NormalizeError> {
    let shape = RecordShape::classify(record);
    if matches!(shape, RecordShape::Metadata) {
        return Ok(Normalized::Skipped(SkipReason::Metadata));
    }

    let tick = record
        .resolve_tick()
        .ok_or_else(|| NormalizeError::MissingTimeField {
            origin: record.origin.clone(),
            line: record.line,
        })?;

    let actions = match shape {
        RecordShape::Metadata => return Ok(Normalized::Skipped(SkipReason::Metadata)),
        RecordShape::Unrecognized(reason) => {
            return Ok(Normalized::Skipped(SkipReason::Unrecognized(reason)))
        }
        RecordShape::Craft(craft) => vec![craft_action(&craft)],
        RecordShape::Move(movement) => move_actions(&movement, options.decompose_moves),
        RecordShape::Pickup(pickup) => vec![pickup_action(tick, &pickup)],
        RecordShape::Place(place) => vec![place_action(tick, &place)],
        RecordShape::Transfer(kind, transfer) => vec![transfer_action(tick, kind, transfer)],
        RecordShape::Rotate(rotate) => vec![rotate_action(tick, &rotate)],
        RecordShape::SetRecipe(set_recipe) => vec![set_recipe_action(tick, &set_recipe)],
        RecordShape::Research(research) => vec![research_action(tick, &research)],
        RecordShape::Harvest(harvest) => match harvest_action(tick, &harvest) {
            Ok(action) => vec![action],
            Err(reason) => return Ok(Normalized::Skipped(SkipReason::Unrecognized(reason))),
        },
    };
    Ok(Normalized::Actions(actions))
}

fn craft_action(craft: &CraftRecord) -> CanonicalAction {
    let args = ActionArgs::new()
        .with("start_tick", craft.timing.start_tick)
        .with("end_tick", craft.timing.end_tick)
        .with("recipe", craft.crafting.recipe.as_str())
        .with("count", craft.crafting.total_crafted);
    CanonicalAction::new(craft.timing.start_tick, actions::CRAFT_ITEM, args)
}

fn move_actions(movement: &MoveRecord, decompose_moves: bool) -> Vec<CanonicalAction> {
    let start = movement.player.start_movement;
    let end = movement.player.end_movement;
    if decompose_moves {
        return decompose(start.tick, end.tick, start.x, start.y, end.x, end.y)
            .iter()
            .map(segment_action)
            .collect();
    }
    let args = ActionArgs::new()
        .with("start_tick", start.tick)
        .with("end_tick", end.tick)
        .with("start_x", start.x)
        .with("start_y", start.y)
        .with("end_x", end.x)
        .with("end_y", end.y);
    vec![CanonicalAction::new(start.tick, actions::MOVE_TO, args)]
}

fn pickup_action(tick: i64, pickup: &PickupRecord) -> CanonicalAction {
    let entity = &pickup.selected_entity;
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("entity", entity.name.as_str())
        .with("x", entity.x)
        .with("y", entity.y);
    CanonicalAction::new(tick, actions::PICKUP_ENTITY, args)
}

fn place_action(tick: i64, place: &PlaceRecord) -> CanonicalAction {
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("item", place.item.name.as_str())
        .with("x", place.entity.x)
        .with("y", place.entity.y)
        .with("direction", place.entity.direction.value);
    CanonicalAction::new(tick, actions::PLACE_ENTITY, args)
}

fn transfer_action(tick: i64, kind: TransferKind, transfer: TransferRecord) -> CanonicalAction {
    let name = match kind {
        TransferKind::Extract => actions::EXTRACT_ITEM,
        TransferKind::Insert => actions::INSERT_ITEM,
    };
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("entity", transfer.entity.name)
        .with("entity_x", transfer.entity.x)
        .with("entity_y", transfer.entity.y)
        .with("items", transfer.items);
    CanonicalAction::new(tick, name, args)
}

fn rotate_action(tick: i64, rotate: &RotateRecord) -> CanonicalAction {
    let entity = &rotate.entity;
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("entity", entity.name.as_str())
        .with("x", entity.x)
        .with("y", entity.y)
        .with("old_direction", entity.direction.previous.value)
        .with("new_direction", entity.direction.new.value);
    CanonicalAction::new(tick, actions::ROTATE_ENTITY, args)
}

fn set_recipe_action(tick: i64, set_recipe: &SetRecipeRecord) -> CanonicalAction {
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("entity", set_recipe.entity.name.as_str())
        .with("new_recipe", set_recipe.entity.new_recipe.as_str())
        .with("x", set_recipe.player.x)
        .with("y", set_recipe.player.y);
    CanonicalAction::new(tick, actions::SET_ENTITY_RECIPE, args)
}

fn research_action(tick: i64, research: &ResearchRecord) -> CanonicalAction {
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("research", research.research.as_str());
    CanonicalAction::new(tick, actions::SET_RESEARCH, args)
}

/// Standard resources become a timed harvest ending at the record time;
/// anything else was picked up at the record time. A duration that pushes
/// the start tick out of range makes the record malformed.
fn harvest_action(tick: i64, harvest: &HarvestRecord) -> Result<CanonicalAction, Unrecognized> {
    if is_standard_resource(&harvest.entity) {
        let start_tick = tick.checked_sub(harvest.duration_ticks).ok_or_else(|| {
            Unrecognized::Malformed {
                action: HARVEST_COLLATED_SOURCE.to_string(),
                reason: format!(
                    "duration_ticks {} overflows record time {tick}",
                    harvest.duration_ticks
                ),
            }
        })?;
        let args = ActionArgs::new()
            .with("start_tick", start_tick)
            .with("end_tick", tick)
            .with("entity", harvest.entity.as_str())
            .with("x", harvest.x)
            .with("y", harvest.y);
        return Ok(CanonicalAction::new(start_tick, actions::HARVEST_RESOURCE, args));
    }
    let args = ActionArgs::new()
        .with("tick", tick)
        .with("entity", harvest.entity.as_str())
        .with("x", harvest.x)
        .with("y", harvest.y);
    Ok(CanonicalAction::new(tick, actions::PICKUP_ENTITY, args))
}

/// Counts for one normalization batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub records: usize,
    pub emitted: usize,
    pub metadata_dropped: usize,
    pub unrecognized: usize,
    pub missing_time: usize,
    pub filtered: usize,
    pub invalid_lines: usize,
    pub time_range: Option<(i64, i64)>,
}

impl NormalizeReport {
    /// Records that produced no actions for a schema reason.
    pub fn skipped(&self) -> usize {
        self.metadata_dropped + self.unrecognized + self.missing_time
    }

    pub fn note_tick(&mut self, tick: i64) {
        self.time_range = Some(match self.time_range {
            Some((low, high)) => (low.min(tick), high.max(tick)),
            None => (tick, tick),
        });
    }

    pub fn merge(&mut self, other: &NormalizeReport) {
        self.records += other.records;
        self.emitted += other.emitted;
        self.metadata_dropped += other.metadata_dropped;
        self.unrecognized += other.unrecognized;
        self.missing_time += other.missing_time;
        self.filtered += other.filtered;
        self.invalid_lines += other.invalid_lines;
        if let Some((low, high)) = other.time_range {
            self.note_tick(low);
            self.note_tick(high);
        }
    }
}

/// Stateful wrapper around [`normalize`] that applies ingestion filters and
/// keeps a [`NormalizeReport`]. Never fails on a single record.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizeOptions,
    report: NormalizeReport,
}

impl Normalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self {
            options,
            report: NormalizeReport::default(),
        }
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    pub fn report(&self) -> &NormalizeReport {
        &self.report
    }

    pub fn into_report(self) -> NormalizeReport {
        self.report
    }

    pub fn note_invalid_line(&mut self) {
        self.report.invalid_lines += 1;
    }

    pub fn push(&mut self, record: &LogRecord) -> Vec<CanonicalAction> {
        self.report.records += 1;

        if let Some(marker) = self
            .options
            .exclude_markers
            .iter()
            .find(|marker| record.contains_marker(marker))
        {
            self.report.filtered += 1;
            debug!(
                target: "replay::normalize",
                origin = %record.origin,
                line = record.line,
                marker = %marker,
                "record.filtered=marker"
            );
            return Vec::new();
        }

        let tick = record.resolve_tick();
        if let (Some(max_tick), Some(tick)) = (self.options.max_tick, tick) {
            if tick > max_tick {
                self.report.filtered += 1;
                return Vec::new();
            }
        }
        if let Some(tick) = tick {
            self.report.note_tick(tick);
        }

        match normalize(record, &self.options) {
            Ok(Normalized::Actions(actions)) => {
                self.report.emitted += actions.len();
                actions
            }
            Ok(Normalized::Skipped(SkipReason::Metadata)) => {
                self.report.metadata_dropped += 1;
                Vec::new()
            }
            Ok(Normalized::Skipped(SkipReason::Unrecognized(reason))) => {
                self.report.unrecognized += 1;
                debug!(
                    target: "replay::normalize",
                    origin = %record.origin,
                    line = record.line,
                    reason = %reason,
                    "record.skipped=unrecognized"
                );
                Vec::new()
            }
            Err(err) => {
                self.report.missing_time += 1;
                warn!(
                    target: "replay::normalize",
                    origin = %record.origin,
                    line = record.line,
                    error = %err,
                    "record.skipped=missing_time"
                );
                Vec::new()
            }
        }
    }
}

/// Normalizes a batch in order.
pub fn normalize_all<'a, I>(
    records: I,
    options: NormalizeOptions,
) -> (Vec<CanonicalAction>, NormalizeReport)
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut normalizer = Normalizer::new(options);
    let mut actions = Vec::new();
    for record in records {
        actions.extend(normalizer.push(record));
    }
    (actions, normalizer.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use trace_schema::{ArgValue, ItemStack};

    fn record(origin: &str, value: Value) -> LogRecord {
        match value {
            Value::Object(map) => LogRecord::new(origin, 1, map),
            _ => panic!("test record must be an object"),
        }
    }

    fn single(record: &LogRecord) -> CanonicalAction {
        let mut actions = normalize(record, &NormalizeOptions::default())
            .expect("normalizes")
            .into_actions();
        assert_eq!(actions.len(), 1, "{actions:?}");
        actions.remove(0)
    }

    #[test]
    fn standard_harvest_spans_its_duration() {
        let rec = record(
            "harvest_resource_collated.jsonl",
            json!({"t": 500, "entity": "iron-ore", "x": 3.5, "y": -2.5, "duration_ticks": 120}),
        );
        let action = single(&rec);
        assert_eq!(action.name, "harvest_resource");
        assert_eq!(action.sort_tick, 380);
        assert_eq!(action.args.int("start_tick"), Some(380));
        assert_eq!(action.args.int("end_tick"), Some(500));
        assert!(!action.args.contains_key("duration_ticks"));
    }

    #[test]
    fn overflowing_harvest_duration_is_skipped_as_malformed() {
        let rec = record(
            "harvest_resource_collated.jsonl",
            json!({"t": 1, "entity": "iron-ore", "x": 0, "y": 0, "duration_ticks": i64::MIN}),
        );
        match normalize(&rec, &NormalizeOptions::default()) {
            Ok(Normalized::Skipped(SkipReason::Unrecognized(Unrecognized::Malformed {
                action,
                ..
            }))) => assert_eq!(action, "harvest_resource_collated"),
            other => panic!("unexpected result {other:?}"),
        }

        let mut normalizer = Normalizer::new(NormalizeOptions::default());
        assert!(normalizer.push(&rec).is_empty());
        assert_eq!(normalizer.report().unrecognized, 1);
    }

    #[test]
    fn move_near_the_tick_limit_does_not_overflow() {
        let rec = record(
            "actions",
            json!({"action": "move_to_direction", "t": i64::MAX,
                   "player": {"start_movement": {"tick": i64::MAX - 10, "x": 0, "y": 0},
                              "end_movement": {"tick": i64::MAX, "x": 40, "y": 0}}}),
        );
        let actions = normalize(&rec, &NormalizeOptions::default())
            .expect("normalizes")
            .into_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].args.int("end_tick"), Some(i64::MAX));
    }

    #[test]
    fn non_standard_harvest_is_a_pickup_at_the_record_time() {
        let rec = record(
            "harvest_resource_collated.jsonl",
            json!({"t": 500, "entity": "crash-site-spaceship-wreck", "x": 1, "y": 2,
                   "duration_ticks": 120}),
        );
        let action = single(&rec);
        assert_eq!(action.name, "pickup_entity");
        assert_eq!(action.sort_tick, 500);
        assert_eq!(action.args.int("tick"), Some(500));
        assert_eq!(action.args.str("entity"), Some("crash-site-spaceship-wreck"));
    }

    #[test]
    fn craft_sorts_on_its_start_tick() {
        let rec = record(
            "actions",
            json!({"action": "craft_item", "t": 400,
                   "timing": {"start_tick": 340, "end_tick": 400},
                   "crafting": {"recipe": "iron-gear-wheel", "total_crafted": 4}}),
        );
        let action = single(&rec);
        assert_eq!(action.sort_tick, 340);
        let keys: Vec<_> = action.args.keys().collect();
        assert_eq!(keys, vec!["start_tick", "end_tick", "recipe", "count"]);
        assert_eq!(action.args.int("count"), Some(4));
    }

    #[test]
    fn moves_decompose_unless_disabled() {
        let rec = record(
            "actions",
            json!({"action": "move_to_direction", "tick": 300,
                   "player": {"start_movement": {"tick": 0, "x": 0, "y": 0},
                              "end_movement": {"tick": 300, "x": 20, "y": 0}}}),
        );
        let decomposed = normalize(&rec, &NormalizeOptions::default())
            .unwrap()
            .into_actions();
        assert_eq!(decomposed.len(), 5);
        let sort_ticks: Vec<_> = decomposed.iter().map(|a| a.sort_tick).collect();
        assert_eq!(sort_ticks, vec![0, 30, 60, 90, 120]);

        let whole = normalize(&rec, &NormalizeOptions::undecomposed())
            .unwrap()
            .into_actions();
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].args.int("end_tick"), Some(300));
        assert_eq!(whole[0].args.float("end_x"), Some(20.0));
    }

    #[test]
    fn transfer_keeps_every_item() {
        let rec = record(
            "actions",
            json!({"action": "insert_item", "t": 9,
                   "entity": {"name": "stone-furnace", "x": 1.5, "y": 2.5},
                   "items": [{"item": "coal", "count": 5}, {"item": "iron-ore", "count": 10}]}),
        );
        let action = single(&rec);
        assert_eq!(action.name, "insert_item");
        assert_eq!(
            action.args.get("items"),
            Some(&ArgValue::Items(vec![
                ItemStack::new("coal", 5),
                ItemStack::new("iron-ore", 10)
            ]))
        );
    }

    #[test]
    fn transfer_accepts_loose_item_stacks() {
        let rec = record(
            "actions",
            json!({"action": "extract_item", "t": 4,
                   "entity": {"name": "iron-chest", "x": 0, "y": 0},
                   "items": [{"item": "coal", "count": 5.0},
                             {"name": "iron-plate", "count": "12"},
                             {"item": "stone", "count": -3},
                             {"name": "wood"}]}),
        );
        let action = single(&rec);
        assert_eq!(
            action.args.get("items"),
            Some(&ArgValue::Items(vec![
                ItemStack::new("coal", 5),
                ItemStack::new("iron-plate", 12),
                ItemStack::new("stone", 0),
                ItemStack::new("wood", 1),
            ]))
        );
    }

    #[test]
    fn rotate_place_recipe_and_research_shapes() {
        let rotate = single(&record(
            "actions",
            json!({"action": "rotate_entity", "t": 7,
                   "entity": {"name": "inserter", "x": 1, "y": 1,
                              "direction": {"previous": {"value": 0}, "new": {"value": 2}}}}),
        ));
        assert_eq!(rotate.args.int("old_direction"), Some(0));
        assert_eq!(rotate.args.int("new_direction"), Some(2));

        let place = single(&record(
            "actions",
            json!({"action": "place_entity", "t": 8, "item": {"name": "stone-furnace"},
                   "entity": {"x": 4, "y": 5, "direction": {"value": 4}}}),
        ));
        assert_eq!(place.args.str("item"), Some("stone-furnace"));
        assert_eq!(place.args.int("direction"), Some(4));

        let recipe = single(&record(
            "actions",
            json!({"action": "set_entity_recipe", "t": 9,
                   "entity": {"name": "assembling-machine-1", "new_recipe": "iron-gear-wheel"},
                   "player": {"x": 10, "y": 11}}),
        ));
        assert_eq!(recipe.args.str("new_recipe"), Some("iron-gear-wheel"));
        assert_eq!(recipe.args.float("x"), Some(10.0));

        let research = single(&record(
            "actions",
            json!({"action": "research_started", "tick": "12", "research": "automation"}),
        ));
        assert_eq!(research.name, "set_research");
        assert_eq!(research.sort_tick, 12);
    }

    #[test]
    fn missing_time_is_an_error_for_that_record_only() {
        let rec = record("actions", json!({"action": "pickup_entity"}));
        assert_eq!(
            normalize(&rec, &NormalizeOptions::default()),
            Err(NormalizeError::MissingTimeField {
                origin: "actions".into(),
                line: 1
            })
        );

        let good = record(
            "actions",
            json!({"action": "pickup_entity", "t": 3, "selected_entity": {"name": "chest"}}),
        );
        let (actions, report) = normalize_all([&rec, &good], NormalizeOptions::default());
        assert_eq!(actions.len(), 1);
        assert_eq!(report.missing_time, 1);
        assert_eq!(report.emitted, 1);
        assert_eq!(report.records, 2);
    }

    #[test]
    fn metadata_and_unknown_records_are_counted() {
        let meta = record("core-meta.jsonl", json!({"t": 1, "version": "2.0"}));
        let unknown = record("actions", json!({"action": "teleport", "t": 1}));
        let stray = record("weather", json!({"t": 1}));
        let (actions, report) =
            normalize_all([&meta, &unknown, &stray], NormalizeOptions::default());
        assert!(actions.is_empty());
        assert_eq!(report.metadata_dropped, 1);
        assert_eq!(report.unrecognized, 2);
        assert_eq!(report.skipped(), 3);
    }

    #[test]
    fn filters_drop_markers_and_late_records() {
        let wreck = record(
            "harvest_resource_collated",
            json!({"t": 5, "entity": "crash-site-chest-1"}),
        );
        let late = record(
            "actions",
            json!({"action": "research_started", "t": 900, "research": "logistics"}),
        );
        let early = record(
            "actions",
            json!({"action": "research_started", "t": 100, "research": "automation"}),
        );
        let options = NormalizeOptions::default().with_max_tick(Some(500));
        let (actions, report) = normalize_all([&wreck, &late, &early], options);
        assert_eq!(actions.len(), 1);
        assert_eq!(report.filtered, 2);
        assert_eq!(report.time_range, Some((100, 100)));
    }
}
