//! The canonical action trace: merged, tick-ordered and persisted as JSONL.

use std::io::{self, BufRead, Write};

use thiserror::Error;
use trace_schema::{decode_actions, encode_actions, hash_actions, CanonicalAction, TraceEntry};

use crate::call_text::{parse_call, render_call, CallParseError};

#[derive(Debug, Error)]
pub enum TraceIoError {
    #[error("trace I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid trace entry on line {line}: {cause}")]
    Json {
        line: usize,
        #[source]
        cause: serde_json::Error,
    },
    #[error("invalid call on line {line}: {cause}")]
    Call {
        line: usize,
        #[source]
        cause: CallParseError,
    },
    #[error("trace cache is unreadable: {0}")]
    Cache(#[from] bincode::Error),
}

/// Actions sorted by `sort_tick`, ties kept in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionTrace {
    actions: Vec<CanonicalAction>,
}

impl ActionTrace {
    pub fn from_actions(mut actions: Vec<CanonicalAction>) -> Self {
        // sort_by_key is stable.
        actions.sort_by_key(|action| action.sort_tick);
        Self { actions }
    }

    /// Concatenates sources in the order given, then sorts.
    pub fn merge<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Vec<CanonicalAction>>,
    {
        Self::from_actions(sources.into_iter().flatten().collect())
    }

    pub fn actions(&self) -> &[CanonicalAction] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<CanonicalAction> {
        self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalAction> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn tick_span(&self) -> Option<(i64, i64)> {
        Some((self.actions.first()?.sort_tick, self.actions.last()?.sort_tick))
    }

    pub fn fingerprint(&self) -> u64 {
        hash_actions(&self.actions)
    }

    pub fn entries(&self) -> impl Iterator<Item = TraceEntry> + '_ {
        self.actions.iter().map(|action| TraceEntry {
            tick: action.sort_tick,
            call: render_call(&action.name, &action.args),
        })
    }

    /// Rebuilds a trace from entries; `line` in errors is the 1-based entry
    /// position.
    pub fn from_entries<I>(entries: I) -> Result<Self, TraceIoError>
    where
        I: IntoIterator<Item = TraceEntry>,
    {
        let mut actions = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let (name, args) = parse_call(&entry.call).map_err(|cause| TraceIoError::Call {
                line: index + 1,
                cause,
            })?;
            actions.push(CanonicalAction::new(entry.tick, name, args));
        }
        Ok(Self::from_actions(actions))
    }

    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> Result<(), TraceIoError> {
        for entry in self.entries() {
            serde_json::to_writer(&mut writer, &entry).map_err(io::Error::from)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a JSONL trace. Blank lines are ignored; any other bad line fails
    /// the read with its 1-based line number.
    pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Self, TraceIoError> {
        let mut actions = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let number = index + 1;
            let entry: TraceEntry = serde_json::from_str(&line)
                .map_err(|cause| TraceIoError::Json { line: number, cause })?;
            let (name, args) = parse_call(&entry.call)
                .map_err(|cause| TraceIoError::Call { line: number, cause })?;
            actions.push(CanonicalAction::new(entry.tick, name, args));
        }
        Ok(Self::from_actions(actions))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TraceIoError> {
        Ok(encode_actions(&self.actions)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TraceIoError> {
        Ok(Self::from_actions(decode_actions(data)?))
    }
}

impl FromIterator<CanonicalAction> for ActionTrace {
    fn from_iter<T: IntoIterator<Item = CanonicalAction>>(iter: T) -> Self {
        Self::from_actions(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionTrace {
    type Item = &'a CanonicalAction;
    type IntoIter = std::slice::Iter<'a, CanonicalAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
