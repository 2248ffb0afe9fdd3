//! The live session, seen from the replay side.
//!
//! A surface exposes named callables taking keyword arguments, a catalog that
//! turns item and entity names into prototypes, and a spatial query. It is
//! shared across dispatch threads without extra locking, so implementations
//! must be `Send + Sync`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use trace_runtime::ItemStack;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Eight-way facing, numbered clockwise from north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub fn from_index(index: i64) -> Option<Self> {
        Some(match index {
            0 => Direction::North,
            1 => Direction::NorthEast,
            2 => Direction::East,
            3 => Direction::SouthEast,
            4 => Direction::South,
            5 => Direction::SouthWest,
            6 => Direction::West,
            7 => Direction::NorthWest,
            _ => return None,
        })
    }

    pub fn index(self) -> i64 {
        self as i64
    }
}

/// A catalog entry for an item or entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Prototype(pub String);

impl Prototype {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A live entity returned by a spatial query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHandle {
    pub id: u64,
    pub prototype: Prototype,
    pub position: Position,
}

/// One keyword argument of an external call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CallValue {
    Int(i64),
    Float(f64),
    Str(String),
    Position(Position),
    Direction(Direction),
    Prototype(Prototype),
    /// A name the catalog could not resolve, passed through as-is.
    RawName(String),
    Entity(EntityHandle),
    Items(Vec<ItemStack>),
}

impl CallValue {
    pub fn as_position(&self) -> Option<Position> {
        match self {
            CallValue::Position(position) => Some(*position),
            CallValue::Entity(entity) => Some(entity.position),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CallValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Name of a prototype, raw name, entity or plain string argument.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            CallValue::Prototype(prototype) => Some(prototype.name()),
            CallValue::Entity(entity) => Some(entity.prototype.name()),
            CallValue::RawName(name) | CallValue::Str(name) => Some(name),
            _ => None,
        }
    }
}

/// A callable name plus keyword arguments in the order they will be passed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarshalledCall {
    pub name: String,
    pub args: Vec<(String, CallValue)>,
}

impl MarshalledCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: CallValue) -> Self {
        self.args.push((key.into(), value));
        self
    }

    pub fn arg(&self, key: &str) -> Option<&CallValue> {
        self.args
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

impl fmt::Display for MarshalledCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (index, (key, value)) in self.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match value {
                CallValue::Int(v) => write!(f, "{key}={v}")?,
                CallValue::Float(v) => write!(f, "{key}={v:?}")?,
                CallValue::Str(v) | CallValue::RawName(v) => write!(f, "{key}='{v}'")?,
                CallValue::Position(p) => write!(f, "{key}=Position{p}")?,
                CallValue::Direction(d) => write!(f, "{key}={d:?}")?,
                CallValue::Prototype(p) => write!(f, "{key}=Prototype({})", p.name())?,
                CallValue::Entity(e) => {
                    write!(f, "{key}=Entity({}#{} at {})", e.prototype.name(), e.id, e.position)?
                }
                CallValue::Items(items) => write!(f, "{key}=<{} items>", items.len())?,
            }
        }
        f.write_str(")")
    }
}

/// Failure reported by the surface for one call; the message is kept
/// verbatim so benign signatures can be matched against it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SurfaceError {
    pub message: String,
}

impl SurfaceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait ExecutionSurface: Send + Sync {
    fn has_action(&self, name: &str) -> bool;

    /// Runs the call. The returned value is opaque to the replay.
    fn invoke(&self, call: &MarshalledCall) -> Result<serde_json::Value, SurfaceError>;

    fn prototype(&self, name: &str) -> Option<Prototype>;

    /// First entity of `prototype` within `radius` of `position`.
    fn find_entity(
        &self,
        prototype: &Prototype,
        position: Position,
        radius: f64,
    ) -> Option<EntityHandle>;

    /// Observable state (entities, inventory) for diagnostics, if supported.
    fn observe_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Tears the session down. Called once when the replay ends.
    fn release(&self) {}
}
