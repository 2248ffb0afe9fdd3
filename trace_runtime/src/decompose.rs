//! Splits long movements into speed-bounded segments.

use trace_schema::{actions, ActionArgs, CanonicalAction, MoveSegment};

/// Tiles a character covers in [`TICKS_PER_SEGMENT`] ticks at 8.9 tiles/s.
pub const SEGMENT_DISTANCE: f64 = 4.45;
pub const TICKS_PER_SEGMENT: i64 = 30;
/// A waypoint this close to the destination ends the walk.
pub const ARRIVAL_TOLERANCE: f64 = 0.1;

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

// Truncates toward zero so a rounded step never exceeds the unrounded one.
fn truncate_hundredths(value: f64) -> f64 {
    let scaled = value * 100.0;
    (scaled + scaled.signum() * 1e-6).trunc() / 100.0
}

/// Decomposes `start -> end` into segments of at most [`SEGMENT_DISTANCE`]
/// tiles and [`TICKS_PER_SEGMENT`] ticks.
///
/// Endpoints are rounded to one decimal and waypoints to hundredths. A move
/// that fits in one segment keeps its full tick range. Otherwise segments
/// chain exactly and the last one lands on the destination with an end tick
/// of `min(current + 30, end_tick)`; the walk also ends early once the next
/// waypoint is within [`ARRIVAL_TOLERANCE`] or the tick budget is spent.
pub fn decompose(
    start_tick: i64,
    end_tick: i64,
    start_x: f64,
    start_y: f64,
    end_x: f64,
    end_y: f64,
) -> Vec<MoveSegment> {
    let (sx, sy) = (round_to(start_x, 1), round_to(start_y, 1));
    let (ex, ey) = (round_to(end_x, 1), round_to(end_y, 1));
    let distance = (ex - sx).hypot(ey - sy);

    if !distance.is_finite() || distance <= SEGMENT_DISTANCE {
        return vec![MoveSegment {
            start_tick,
            end_tick,
            start_x: sx,
            start_y: sy,
            end_x: ex,
            end_y: ey,
        }];
    }

    let count = (distance / SEGMENT_DISTANCE).ceil() as usize;
    let step_x = truncate_hundredths((ex - sx) / distance * SEGMENT_DISTANCE);
    let step_y = truncate_hundredths((ey - sy) / distance * SEGMENT_DISTANCE);

    let mut segments = Vec::new();
    let (mut cx, mut cy, mut ct) = (sx, sy, start_tick);
    for index in 1..=count {
        let next_tick = ct.saturating_add(TICKS_PER_SEGMENT);
        let nx = round_to(sx + step_x * index as f64, 2);
        let ny = round_to(sy + step_y * index as f64, 2);
        let remaining = (ex - nx).hypot(ey - ny);

        let last = index == count
            || next_tick >= end_tick
            || remaining < ARRIVAL_TOLERANCE;
        if last {
            segments.push(MoveSegment {
                start_tick: ct,
                end_tick: next_tick.min(end_tick).max(ct),
                start_x: cx,
                start_y: cy,
                end_x: ex,
                end_y: ey,
            });
            break;
        }

        segments.push(MoveSegment {
            start_tick: ct,
            end_tick: next_tick,
            start_x: cx,
            start_y: cy,
            end_x: nx,
            end_y: ny,
        });
        cx = nx;
        cy = ny;
        ct = next_tick;
    }
    segments
}

/// `move_to` action for one segment; sorts on the segment's own start tick.
pub fn segment_action(segment: &MoveSegment) -> CanonicalAction {
    let args = ActionArgs::new()
        .with("start_tick", segment.start_tick)
        .with("end_tick", segment.end_tick)
        .with("start_x", segment.start_x)
        .with("start_y", segment.start_y)
        .with("end_x", segment.end_x)
        .with("end_y", segment.end_y);
    CanonicalAction::new(segment.start_tick, actions::MOVE_TO, args)
}
