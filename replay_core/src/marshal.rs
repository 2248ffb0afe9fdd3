//! Reshapes canonical action arguments into external call arguments.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use trace_runtime::actions::{
    CRAFT_ITEM, EXTRACT_ITEM, HARVEST_RESOURCE, INSERT_ITEM, MOVE_TO, PICKUP_ENTITY, PLACE_ENTITY,
    TIMING_KEYS,
};
use trace_runtime::{parse_items_literal, ActionArgs, ArgValue, CanonicalAction, ItemStack};

use crate::config::ReplayConfig;
use crate::surface::{CallValue, Direction, ExecutionSurface, MarshalledCall, Position, Prototype};

pub const DEFAULT_SEARCH_RADIUS: f64 = 0.5;

/// How extract/insert records carrying several item stacks are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemsMode {
    /// Only the first stack is transferred.
    #[default]
    First,
    /// One call per stack, in record order.
    All,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("{action} is missing argument '{key}'")]
    MissingArgument { action: String, key: String },
    #[error("{action} argument '{key}' has the wrong type")]
    WrongType { action: String, key: String },
    #[error("{action} has invalid direction {value}")]
    InvalidDirection { action: String, value: i64 },
    #[error("{action} has an unreadable items literal: {reason}")]
    InvalidItems { action: String, reason: String },
}

/// Calls produced for one action. Empty when the action has nothing to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marshalled {
    pub calls: Vec<MarshalledCall>,
    /// Names the catalog could not resolve; they were passed through raw.
    pub unresolved: Vec<String>,
}

impl Marshalled {
    fn single(call: MarshalledCall, unresolved: Vec<String>) -> Self {
        Self {
            calls: vec![call],
            unresolved,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

pub struct Marshaller {
    surface: Arc<dyn ExecutionSurface>,
    items_mode: ItemsMode,
    search_radius: f64,
}

impl Marshaller {
    pub fn new(surface: Arc<dyn ExecutionSurface>) -> Self {
        Self {
            surface,
            items_mode: ItemsMode::First,
            search_radius: DEFAULT_SEARCH_RADIUS,
        }
    }

    pub fn from_config(surface: Arc<dyn ExecutionSurface>, config: &ReplayConfig) -> Self {
        Self::new(surface)
            .with_items_mode(config.items_mode())
            .with_search_radius(config.target_search_radius())
    }

    pub fn with_items_mode(mut self, items_mode: ItemsMode) -> Self {
        self.items_mode = items_mode;
        self
    }

    pub fn with_search_radius(mut self, radius: f64) -> Self {
        self.search_radius = radius;
        self
    }

    pub fn items_mode(&self) -> ItemsMode {
        self.items_mode
    }

    pub fn marshal(&self, action: &CanonicalAction) -> Result<Marshalled, MarshalError> {
        self.marshal_args(&action.name, &action.args)
    }

    pub fn marshal_args(&self, name: &str, args: &ActionArgs) -> Result<Marshalled, MarshalError> {
        let args = Args {
            action: name,
            inner: args,
        };
        let mut resolver = Resolver {
            surface: self.surface.as_ref(),
            action: name,
            unresolved: Vec::new(),
        };

        match name {
            MOVE_TO => {
                let call = MarshalledCall::new(name)
                    .with("position", args.position("end_x", "end_y")?);
                Ok(Marshalled::single(call, resolver.unresolved))
            }
            HARVEST_RESOURCE => {
                let call = MarshalledCall::new(name).with("position", args.position("x", "y")?);
                Ok(Marshalled::single(call, resolver.unresolved))
            }
            PLACE_ENTITY => {
                let mut call = MarshalledCall::new(name)
                    .with("entity", resolver.resolve(args.str("item")?))
                    .with("position", args.position("x", "y")?);
                if let Some(direction) = args.optional_direction()? {
                    call = call.with("direction", CallValue::Direction(direction));
                }
                Ok(Marshalled::single(call, resolver.unresolved))
            }
            PICKUP_ENTITY => {
                let call = MarshalledCall::new(name)
                    .with("entity", resolver.resolve(args.str("entity")?))
                    .with("position", args.position("x", "y")?);
                Ok(Marshalled::single(call, resolver.unresolved))
            }
            CRAFT_ITEM => {
                let renamed = args.inner.iter().filter(|(key, _)| !is_timing(key)).map(
                    |(key, value)| {
                        let key = match key {
                            "recipe" => "entity",
                            "count" => "quantity",
                            other => other,
                        };
                        (key.to_string(), passthrough(value))
                    },
                );
                let call = MarshalledCall {
                    name: name.to_string(),
                    args: renamed.collect(),
                };
                Ok(Marshalled::single(call, resolver.unresolved))
            }
            INSERT_ITEM => {
                let target = self.insert_target(&args)?;
                let calls = self
                    .selected_items(&args)?
                    .iter()
                    .map(|stack| {
                        MarshalledCall::new(name)
                            .with("entity", resolver.resolve(&stack.item))
                            .with("target", target.clone())
                            .with("quantity", CallValue::Int(i64::from(stack.count)))
                    })
                    .collect();
                Ok(Marshalled {
                    calls,
                    unresolved: resolver.unresolved,
                })
            }
            EXTRACT_ITEM => {
                let source = args.position("entity_x", "entity_y")?;
                let calls = self
                    .selected_items(&args)?
                    .iter()
                    .map(|stack| {
                        MarshalledCall::new(name)
                            .with("entity", resolver.resolve(&stack.item))
                            .with("source", source.clone())
                            .with("quantity", CallValue::Int(i64::from(stack.count)))
                    })
                    .collect();
                Ok(Marshalled {
                    calls,
                    unresolved: resolver.unresolved,
                })
            }
            _ => {
                let call = MarshalledCall {
                    name: name.to_string(),
                    args: args
                        .inner
                        .iter()
                        .filter(|(key, _)| !is_timing(key))
                        .map(|(key, value)| (key.to_string(), passthrough(value)))
                        .collect(),
                };
                Ok(Marshalled::single(call, resolver.unresolved))
            }
        }
    }

    /// The entity of the recorded kind at the recorded position, else the
    /// position itself.
    fn insert_target(&self, args: &Args<'_>) -> Result<CallValue, MarshalError> {
        let position = args.point("entity_x", "entity_y")?;
        let kind = args.inner.str("entity");
        let Some(prototype) = kind.and_then(|name| self.surface.prototype(name)) else {
            warn!(
                target: "replay::marshal",
                action = args.action,
                kind = kind.unwrap_or(""),
                "target.fallback=unknown_kind"
            );
            return Ok(CallValue::Position(position));
        };
        match self
            .surface
            .find_entity(&prototype, position, self.search_radius)
        {
            Some(entity) => Ok(CallValue::Entity(entity)),
            None => {
                warn!(
                    target: "replay::marshal",
                    action = args.action,
                    kind = prototype.name(),
                    x = position.x,
                    y = position.y,
                    "target.fallback=not_found"
                );
                Ok(CallValue::Position(position))
            }
        }
    }

    fn selected_items(&self, args: &Args<'_>) -> Result<Vec<ItemStack>, MarshalError> {
        let mut items = args.items()?;
        if items.is_empty() {
            warn!(target: "replay::marshal", action = args.action, "items.skipped=empty");
        }
        if self.items_mode == ItemsMode::First {
            items.truncate(1);
        }
        Ok(items)
    }
}

fn is_timing(key: &str) -> bool {
    TIMING_KEYS.contains(&key)
}

fn passthrough(value: &ArgValue) -> CallValue {
    match value {
        ArgValue::Int(value) => CallValue::Int(*value),
        ArgValue::Float(value) => CallValue::Float(*value),
        ArgValue::Str(value) => CallValue::Str(value.clone()),
        ArgValue::Items(items) => CallValue::Items(items.clone()),
    }
}

struct Resolver<'a> {
    surface: &'a dyn ExecutionSurface,
    action: &'a str,
    unresolved: Vec<String>,
}

impl Resolver<'_> {
    fn resolve(&mut self, name: &str) -> CallValue {
        match self.surface.prototype(name) {
            Some(prototype) => CallValue::Prototype(prototype),
            None => {
                warn!(
                    target: "replay::marshal",
                    action = self.action,
                    name,
                    "prototype.fallback=raw_name"
                );
                if !self.unresolved.iter().any(|seen| seen == name) {
                    self.unresolved.push(name.to_string());
                }
                CallValue::RawName(name.to_string())
            }
        }
    }
}

/// Typed accessors that name the action in their errors.
struct Args<'a> {
    action: &'a str,
    inner: &'a ActionArgs,
}

impl Args<'_> {
    fn missing(&self, key: &str) -> MarshalError {
        MarshalError::MissingArgument {
            action: self.action.to_string(),
            key: key.to_string(),
        }
    }

    fn wrong_type(&self, key: &str) -> MarshalError {
        MarshalError::WrongType {
            action: self.action.to_string(),
            key: key.to_string(),
        }
    }

    fn float(&self, key: &str) -> Result<f64, MarshalError> {
        let value = self.inner.get(key).ok_or_else(|| self.missing(key))?;
        value.as_float().ok_or_else(|| self.wrong_type(key))
    }

    fn str(&self, key: &str) -> Result<&str, MarshalError> {
        let value = self.inner.get(key).ok_or_else(|| self.missing(key))?;
        value.as_str().ok_or_else(|| self.wrong_type(key))
    }

    fn point(&self, x: &str, y: &str) -> Result<Position, MarshalError> {
        Ok(Position::new(self.float(x)?, self.float(y)?))
    }

    fn position(&self, x: &str, y: &str) -> Result<CallValue, MarshalError> {
        self.point(x, y).map(CallValue::Position)
    }

    fn optional_direction(&self) -> Result<Option<Direction>, MarshalError> {
        let Some(value) = self.inner.get("direction") else {
            return Ok(None);
        };
        let index = match value {
            ArgValue::Int(index) => *index,
            ArgValue::Float(index) if index.fract() == 0.0 => *index as i64,
            _ => return Err(self.wrong_type("direction")),
        };
        Direction::from_index(index)
            .map(Some)
            .ok_or_else(|| MarshalError::InvalidDirection {
                action: self.action.to_string(),
                value: index,
            })
    }

    /// Item stacks, whether stored as a list or as a legacy literal string.
    fn items(&self) -> Result<Vec<ItemStack>, MarshalError> {
        match self.inner.get("items") {
            None => Ok(Vec::new()),
            Some(ArgValue::Items(items)) => Ok(items.clone()),
            Some(ArgValue::Str(text)) => {
                parse_items_literal(text).map_err(|reason| MarshalError::InvalidItems {
                    action: self.action.to_string(),
                    reason,
                })
            }
            Some(_) => Err(self.wrong_type("items")),
        }
    }
}
