//! Task-script lines (`task[N] = {"walk", {x, y}, ...}`) and the domain
//! attributes derived from their parameters.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const SPATIAL_ACTIVITIES: [&str; 6] = ["walk", "move", "build", "mine", "put", "take"];
const ITEM_ACTIVITIES: [&str; 4] = ["craft", "build", "put", "take"];
const DIRECTION_MARKER: &str = "defines.direction";
const INVENTORY_MARKER: &str = "defines.inventory";

fn task_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^task\[(\d+)\]").unwrap())
}

fn task_body() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(.+)\}$").unwrap())
}

fn numeric_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-\d.]+").unwrap())
}

/// Attributes attached to a task. Each is omitted when its parse fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub index: u32,
    pub activity: String,
    pub params: Vec<String>,
    pub attributes: TaskAttributes,
}

/// Parses every task line of a script, ignoring anything else.
pub fn parse_task_script(text: &str) -> Vec<TaskRecord> {
    text.lines().filter_map(parse_task_line).collect()
}

pub fn parse_task_line(line: &str) -> Option<TaskRecord> {
    let line = line.trim();
    if !line.starts_with("task[") || !line.ends_with('}') {
        return None;
    }
    let index = task_header().captures(line)?.get(1)?.as_str().parse().ok()?;
    let body = task_body().captures(line)?.get(1)?.as_str();

    let params = split_params(body);
    let activity = params.first()?.trim_matches('"').to_string();
    let attributes = enrich(&activity, &params);
    Some(TaskRecord {
        index,
        activity,
        params,
        attributes,
    })
}

/// Splits on commas at brace depth zero outside double quotes.
pub fn split_params(content: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut previous = None;

    for ch in content.chars() {
        match ch {
            '"' if previous != Some('\\') => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '{' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            '}' if !in_quotes => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 && !in_quotes => {
                params.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
        previous = Some(ch);
    }
    if !current.trim().is_empty() {
        params.push(current.trim().to_string());
    }
    params
}

pub fn enrich(activity: &str, params: &[String]) -> TaskAttributes {
    let mut attributes = TaskAttributes::default();

    if SPATIAL_ACTIVITIES.contains(&activity) {
        attributes.position = params.get(1).and_then(|param| extract_coordinates(param));
    }

    if ITEM_ACTIVITIES.contains(&activity) {
        attributes.item_type = params.get(2).map(|param| param.trim_matches('"').to_string());
        attributes.quantity = params
            .get(3)
            .filter(|param| !param.is_empty() && param.chars().all(|c| c.is_ascii_digit()))
            .and_then(|param| param.parse().ok());
    }

    if activity == "build" {
        attributes.direction = last_marked_segment(params, DIRECTION_MARKER);
    }

    if activity == "speed" {
        attributes.speed = params.get(1).and_then(|param| param.trim().parse().ok());
    }

    attributes.inventory = last_marked_segment(params, INVENTORY_MARKER);
    attributes
}

fn last_marked_segment(params: &[String], marker: &str) -> Option<String> {
    params
        .iter()
        .filter(|param| param.contains(marker))
        .last()
        .and_then(|param| param.rsplit('.').next())
        .map(str::to_string)
}

/// First two numeric tokens of `text`, accepting negatives and decimals.
pub fn extract_coordinates(text: &str) -> Option<(f64, f64)> {
    let mut tokens = numeric_token().find_iter(text).map(|m| m.as_str());
    let x = tokens.next()?.parse().ok()?;
    let y = tokens.next()?.parse().ok()?;
    Some((x, y))
}
