use serde::Serialize;
use std::collections::BTreeMap;
use trace_schema::RawFrame;

/// Action id, u32 LE tick, u16 LE originator.
pub const HEADER_LEN: usize = 7;
/// Most payloads fit in this many bytes; longer ones desynchronize the walk.
pub const ASSUMED_PAYLOAD_LEN: usize = 12;
pub const FRAME_STRIDE: usize = HEADER_LEN + ASSUMED_PAYLOAD_LEN;

/// Heuristic fixed-stride walker over an inflated replay stream.
///
/// There is no checksum and no resynchronization: a frame whose payload is
/// not exactly [`ASSUMED_PAYLOAD_LEN`] bytes shifts every later header.
#[derive(Debug, Clone)]
pub struct FrameWalker<'a> {
    stream: &'a [u8],
    offset: usize,
}

impl<'a> FrameWalker<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self { stream, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for FrameWalker<'_> {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        if self.offset + HEADER_LEN > self.stream.len() {
            return None;
        }
        let header = &self.stream[self.offset..self.offset + HEADER_LEN];
        let frame = RawFrame {
            action_id: header[0],
            tick: u32::from_le_bytes([header[1], header[2], header[3], header[4]]),
            originator: u16::from_le_bytes([header[5], header[6]]),
        };

        self.offset += FRAME_STRIDE;
        while self.offset < self.stream.len() && self.stream[self.offset] == 0 {
            self.offset += 1;
        }
        Some(frame)
    }
}

pub fn walk_frames(stream: &[u8]) -> FrameWalker<'_> {
    FrameWalker::new(stream)
}

/// Coarse counts over a frame sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames: usize,
    pub first_tick: Option<u32>,
    pub last_tick: Option<u32>,
    pub per_action: BTreeMap<u8, usize>,
    pub per_originator: BTreeMap<u16, usize>,
}

impl FrameStats {
    pub fn record(&mut self, frame: &RawFrame) {
        self.frames += 1;
        self.first_tick = Some(self.first_tick.map_or(frame.tick, |t| t.min(frame.tick)));
        self.last_tick = Some(self.last_tick.map_or(frame.tick, |t| t.max(frame.tick)));
        *self.per_action.entry(frame.action_id).or_default() += 1;
        *self.per_originator.entry(frame.originator).or_default() += 1;
    }

    pub fn tick_span(&self) -> Option<u32> {
        Some(self.last_tick? - self.first_tick?)
    }
}

impl<'a> FromIterator<&'a RawFrame> for FrameStats {
    fn from_iter<T: IntoIterator<Item = &'a RawFrame>>(iter: T) -> Self {
        let mut stats = FrameStats::default();
        for frame in iter {
            stats.record(frame);
        }
        stats
    }
}

impl FromIterator<RawFrame> for FrameStats {
    fn from_iter<T: IntoIterator<Item = RawFrame>>(iter: T) -> Self {
        let mut stats = FrameStats::default();
        for frame in iter {
            stats.record(&frame);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(action_id: u8, tick: u32, originator: u16) -> Vec<u8> {
        let mut out = vec![action_id];
        out.extend_from_slice(&tick.to_le_bytes());
        out.extend_from_slice(&originator.to_le_bytes());
        out.extend_from_slice(&[0xAB; ASSUMED_PAYLOAD_LEN]);
        out
    }

    #[test]
    fn walks_fixed_stride_frames() {
        let mut stream = frame_bytes(3, 100, 1);
        stream.extend(frame_bytes(7, 160, 2));
        let frames: Vec<_> = walk_frames(&stream).collect();
        assert_eq!(
            frames,
            vec![
                RawFrame { action_id: 3, tick: 100, originator: 1 },
                RawFrame { action_id: 7, tick: 160, originator: 2 },
            ]
        );
    }

    #[test]
    fn skips_zero_padding_between_frames() {
        let mut stream = frame_bytes(3, 100, 1);
        stream.extend_from_slice(&[0, 0, 0]);
        stream.extend(frame_bytes(4, 200, 1));
        let ticks: Vec<_> = walk_frames(&stream).map(|f| f.tick).collect();
        assert_eq!(ticks, vec![100, 200]);
    }

    #[test]
    fn stops_when_header_does_not_fit() {
        let mut stream = frame_bytes(3, 100, 1);
        stream.extend_from_slice(&[9, 1, 2, 3, 4, 5]);
        assert_eq!(walk_frames(&stream).count(), 1);
        assert_eq!(walk_frames(&[1, 2, 3]).count(), 0);
    }

    #[test]
    fn header_only_tail_still_yields_a_frame() {
        let stream = [5, 10, 0, 0, 0, 2, 0];
        let frames: Vec<_> = walk_frames(&stream).collect();
        assert_eq!(frames, vec![RawFrame { action_id: 5, tick: 10, originator: 2 }]);
    }

    #[test]
    fn stats_count_actions_and_span() {
        let frames = [
            RawFrame { action_id: 1, tick: 50, originator: 0 },
            RawFrame { action_id: 1, tick: 20, originator: 0 },
            RawFrame { action_id: 2, tick: 90, originator: 1 },
        ];
        let stats: FrameStats = frames.iter().collect();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.tick_span(), Some(70));
        assert_eq!(stats.per_action.get(&1), Some(&2));
        assert_eq!(stats.per_originator.get(&1), Some(&1));
    }
}
