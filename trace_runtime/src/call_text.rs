//! Function-call text used by the persisted trace: `name(key=value, ...)`.
//!
//! Values render as bare numbers, single-quoted strings, or list/dict
//! literals for item lists. Parsing splits on top-level commas only, so
//! quoted commas and nested literals survive.

use std::fmt::Write;

use thiserror::Error;
use trace_schema::{ActionArgs, ArgValue, ItemStack};

#[derive(Debug, Error, PartialEq)]
pub enum CallParseError {
    #[error("empty call")]
    Empty,
    #[error("missing argument list in '{0}'")]
    MissingParens(String),
    #[error("invalid action name '{0}'")]
    InvalidName(String),
    #[error("unbalanced delimiters in '{0}'")]
    Unbalanced(String),
    #[error("argument '{0}' has no '='")]
    MissingEquals(String),
    #[error("duplicate argument '{0}'")]
    DuplicateArgument(String),
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Renders a call with arguments in insertion order.
pub fn render_call(name: &str, args: &ActionArgs) -> String {
    let mut out = String::with_capacity(16 + args.len() * 16);
    out.push_str(name);
    out.push('(');
    for (index, (key, value)) in args.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push('=');
        render_value(&mut out, value);
    }
    out.push(')');
    out
}

pub fn render_value(out: &mut String, value: &ArgValue) {
    match value {
        ArgValue::Int(value) => {
            let _ = write!(out, "{value}");
        }
        ArgValue::Float(value) => {
            let _ = write!(out, "{value:?}");
        }
        ArgValue::Str(value) => render_str(out, value),
        ArgValue::Items(items) => render_items(out, items),
    }
}

fn render_str(out: &mut String, value: &str) {
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('\'');
}

/// `[{'item': 'coal', 'count': 5}, ...]`
pub fn render_items(out: &mut String, items: &[ItemStack]) {
    out.push('[');
    for (index, stack) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str("{'item': ");
        render_str(out, &stack.item);
        let _ = write!(out, ", 'count': {}}}", stack.count);
    }
    out.push(']');
}

/// Parses `name(key=value, ...)` back into a name and ordered arguments.
pub fn parse_call(text: &str) -> Result<(String, ActionArgs), CallParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CallParseError::Empty);
    }
    let open = trimmed
        .find('(')
        .ok_or_else(|| CallParseError::MissingParens(trimmed.to_string()))?;
    if !trimmed.ends_with(')') {
        return Err(CallParseError::MissingParens(trimmed.to_string()));
    }

    let name = trimmed[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CallParseError::InvalidName(name.to_string()));
    }

    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let mut args = ActionArgs::new();
    for part in split_top_level(inner, ',')? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, raw_value) = split_once_top_level(part, '=')?
            .ok_or_else(|| CallParseError::MissingEquals(part.to_string()))?;
        let key = key.trim();
        if args.contains_key(key) {
            return Err(CallParseError::DuplicateArgument(key.to_string()));
        }
        let raw_value = raw_value.trim();
        let value = match parse_value(raw_value) {
            Ok(value) => value,
            Err(reason) => {
                unescaped_quoted(raw_value).ok_or_else(|| CallParseError::InvalidValue {
                    key: key.to_string(),
                    value: raw_value.to_string(),
                    reason,
                })?
            }
        };
        args.insert(key, value);
    }
    Ok((name.to_string(), args))
}

/// Older traces wrap item-list text in single quotes without escaping the
/// quotes inside it. Such values are taken verbatim between the outer quotes.
fn unescaped_quoted(raw: &str) -> Option<ArgValue> {
    let quote = raw.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if raw.len() < 2 || !raw.ends_with(quote) {
        return None;
    }
    Some(ArgValue::Str(raw[1..raw.len() - 1].to_string()))
}

/// Parses a Python-style item list literal such as the legacy
/// `"[{'item': 'coal', 'count': 5}]"` strings. An empty string is an empty
/// list.
pub fn parse_items_literal(text: &str) -> Result<Vec<ItemStack>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    match parse_value(text)? {
        ArgValue::Items(items) => Ok(items),
        other => Err(format!("expected an item list, found {other:?}")),
    }
}

fn split_top_level(text: &str, separator: char) -> Result<Vec<&str>, CallParseError> {
    let mut parts = Vec::new();
    let mut scanner = DelimiterScanner::default();
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        if scanner.at_top_level() && ch == separator {
            parts.push(&text[start..index]);
            start = index + ch.len_utf8();
            continue;
        }
        scanner
            .feed(ch)
            .map_err(|_| CallParseError::Unbalanced(text.to_string()))?;
    }
    if !scanner.is_balanced() {
        return Err(CallParseError::Unbalanced(text.to_string()));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn split_once_top_level(
    text: &str,
    separator: char,
) -> Result<Option<(&str, &str)>, CallParseError> {
    let mut scanner = DelimiterScanner::default();
    for (index, ch) in text.char_indices() {
        if scanner.at_top_level() && ch == separator {
            return Ok(Some((&text[..index], &text[index + ch.len_utf8()..])));
        }
        scanner
            .feed(ch)
            .map_err(|_| CallParseError::Unbalanced(text.to_string()))?;
    }
    Ok(None)
}

/// Tracks bracket depth and quoting for the top-level splitters.
#[derive(Default)]
struct DelimiterScanner {
    stack: Vec<char>,
    quote: Option<char>,
    escaped: bool,
}

impl DelimiterScanner {
    fn at_top_level(&self) -> bool {
        self.stack.is_empty() && self.quote.is_none()
    }

    fn is_balanced(&self) -> bool {
        self.at_top_level()
    }

    fn feed(&mut self, ch: char) -> Result<(), ()> {
        if let Some(quote) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == quote {
                self.quote = None;
            }
            return Ok(());
        }
        match ch {
            '\'' | '"' => self.quote = Some(ch),
            '(' | '[' | '{' => self.stack.push(ch),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if self.stack.pop() != Some(expected) {
                    return Err(());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Dict(Vec<(String, Literal)>),
}

fn parse_value(text: &str) -> Result<ArgValue, String> {
    let mut cursor = LiteralCursor::new(text);
    let literal = cursor.literal()?;
    cursor.skip_whitespace();
    if !cursor.is_done() {
        return Err(format!("trailing input at byte {}", cursor.pos));
    }
    literal_to_arg(literal)
}

fn literal_to_arg(literal: Literal) -> Result<ArgValue, String> {
    match literal {
        Literal::Int(value) => Ok(ArgValue::Int(value)),
        Literal::Float(value) => Ok(ArgValue::Float(value)),
        Literal::Str(value) => Ok(ArgValue::Str(value)),
        Literal::List(entries) => entries
            .into_iter()
            .map(literal_to_item)
            .collect::<Result<Vec<_>, _>>()
            .map(ArgValue::Items),
        Literal::Dict(_) => Err("a bare dict is not a valid argument".to_string()),
    }
}

fn literal_to_item(literal: Literal) -> Result<ItemStack, String> {
    let Literal::Dict(fields) = literal else {
        return Err("item list entries must be dicts".to_string());
    };
    let mut item = None;
    let mut count = 1u32;
    for (key, value) in fields {
        match (key.as_str(), value) {
            ("item" | "name", Literal::Str(name)) => item = Some(name),
            ("count", Literal::Int(value)) => {
                count = u32::try_from(value).map_err(|_| format!("invalid item count {value}"))?;
            }
            ("count", other) => return Err(format!("invalid item count {other:?}")),
            _ => {}
        }
    }
    item.map(|item| ItemStack { item, count })
        .ok_or_else(|| "item entry without an 'item' name".to_string())
}

struct LiteralCursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> LiteralCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(format!("expected '{expected}', found '{ch}'")),
            None => Err(format!("expected '{expected}', found end of input")),
        }
    }

    fn literal(&mut self) -> Result<Literal, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') | Some('"') => self.string().map(Literal::Str),
            Some('[') => self.list(),
            Some('{') => self.dict(),
            Some(_) => self.number(),
            None => Err("missing value".to_string()),
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = self.bump().ok_or("missing string")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => return Err("unterminated string".to_string()),
                },
                Some(ch) if ch == quote => return Ok(out),
                Some(ch) => out.push(ch),
            }
        }
    }

    fn list(&mut self) -> Result<Literal, String> {
        self.expect('[')?;
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(Literal::List(entries));
            }
            entries.push(self.literal()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(Literal::List(entries)),
                other => return Err(format!("expected ',' or ']', found {other:?}")),
            }
        }
    }

    fn dict(&mut self) -> Result<Literal, String> {
        self.expect('{')?;
        let mut fields = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Literal::Dict(fields));
            }
            let key = match self.literal()? {
                Literal::Str(key) => key,
                other => return Err(format!("dict keys must be strings, found {other:?}")),
            };
            self.expect(':')?;
            let value = self.literal()?;
            fields.push((key, value));
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Literal::Dict(fields)),
                other => return Err(format!("expected ',' or '}}', found {other:?}")),
            }
        }
    }

    fn number(&mut self) -> Result<Literal, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, ',' | ']' | '}' | ':') && !c.is_whitespace())
        {
            self.bump();
        }
        let token = &self.text[start..self.pos];
        if let Ok(value) = token.parse::<i64>() {
            return Ok(Literal::Int(value));
        }
        token
            .parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| format!("'{token}' is not a number or quoted string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> ActionArgs {
        ActionArgs::new()
            .with("tick", 500i64)
            .with("entity", "wooden-chest")
            .with("entity_x", -3.5)
            .with("entity_y", 12.0)
            .with(
                "items",
                vec![ItemStack::new("coal", 5), ItemStack::new("iron-plate", 1)],
            )
    }

    #[test]
    fn renders_values_in_insertion_order() {
        insta::assert_snapshot!(
            render_call("extract_item", &sample_args()),
            @"extract_item(tick=500, entity='wooden-chest', entity_x=-3.5, entity_y=12.0, items=[{'item': 'coal', 'count': 5}, {'item': 'iron-plate', 'count': 1}])"
        );
    }

    #[test]
    fn renders_escaped_strings() {
        let args = ActionArgs::new().with("research", "it's \\ done");
        insta::assert_snapshot!(
            render_call("set_research", &args),
            @r"set_research(research='it\'s \\ done')"
        );
    }

    #[test]
    fn parse_recovers_rendered_calls() {
        let args = sample_args();
        let text = render_call("extract_item", &args);
        let (name, parsed) = parse_call(&text).expect("parses");
        assert_eq!(name, "extract_item");
        assert_eq!(parsed, args);
    }

    #[test]
    fn quoted_commas_and_equals_stay_inside_values() {
        let (_, args) = parse_call("set_research(tick=1, research='a, b=c')").unwrap();
        assert_eq!(args.str("research"), Some("a, b=c"));
    }

    #[test]
    fn legacy_items_string_parses_as_string_then_literal() {
        let (_, args) =
            parse_call("insert_item(tick=3, items='[{\\'item\\': \\'coal\\', \\'count\\': 2}]')")
                .unwrap();
        let raw = args.str("items").expect("items stays a string");
        assert_eq!(
            parse_items_literal(raw).unwrap(),
            vec![ItemStack::new("coal", 2)]
        );
        assert_eq!(parse_items_literal("").unwrap(), Vec::new());
    }

    #[test]
    fn unescaped_legacy_items_are_taken_verbatim() {
        let (_, args) = parse_call(
            "insert_item(tick=3, entity='chest', items='[{'item': 'coal', 'count': 2}]')",
        )
        .unwrap();
        assert_eq!(args.str("entity"), Some("chest"));
        let raw = args.str("items").expect("items stays a string");
        assert_eq!(raw, "[{'item': 'coal', 'count': 2}]");
        assert_eq!(
            parse_items_literal(raw).unwrap(),
            vec![ItemStack::new("coal", 2)]
        );
    }

    #[test]
    fn floats_and_ints_are_distinguished() {
        let (_, args) = parse_call("move_to(start_tick=0, end_x=20.0, end_y=-1e-7)").unwrap();
        assert_eq!(args.get("start_tick"), Some(&ArgValue::Int(0)));
        assert_eq!(args.get("end_x"), Some(&ArgValue::Float(20.0)));
        assert_eq!(args.get("end_y"), Some(&ArgValue::Float(-1e-7)));
    }

    #[test]
    fn rejects_malformed_calls() {
        assert_eq!(parse_call("  "), Err(CallParseError::Empty));
        assert!(matches!(
            parse_call("craft_item"),
            Err(CallParseError::MissingParens(_))
        ));
        assert!(matches!(
            parse_call("craft item(count=1)"),
            Err(CallParseError::InvalidName(_))
        ));
        assert!(matches!(
            parse_call("insert_item(items=[{'item': 'coal'})"),
            Err(CallParseError::Unbalanced(_))
        ));
        assert!(matches!(
            parse_call("craft_item(count)"),
            Err(CallParseError::MissingEquals(_))
        ));
        assert!(matches!(
            parse_call("craft_item(count=1, count=2)"),
            Err(CallParseError::DuplicateArgument(_))
        ));
        assert!(matches!(
            parse_call("craft_item(recipe=gear)"),
            Err(CallParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn empty_argument_list() {
        let (name, args) = parse_call("noop()").unwrap();
        assert_eq!(name, "noop");
        assert!(args.is_empty());
    }
}
