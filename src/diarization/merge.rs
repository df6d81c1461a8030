//! Per-segment speaker assignment by maximal time overlap.

use crate::diarization::DiarizationSegment;
use crate::transcription::options::Segment;

/// Overlap in seconds between two intervals, zero when disjoint.
fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

/// Pick a speaker for every segment.
///
/// Each segment independently takes the span with the largest positive overlap. Ties keep the
/// span that comes first in `spans`. A segment no span overlaps gets `None`.
pub fn assign_speakers(segments: &[Segment], spans: &[DiarizationSegment]) -> Vec<Option<u32>> {
    segments
        .iter()
        .map(|segment| {
            let (start, end) = (segment.start_seconds(), segment.end_seconds());
            let mut best: Option<(f64, u32)> = None;

            for span in spans {
                let o = overlap(start, end, span.start, span.end);
                if o <= 0.0 {
                    continue;
                }
                // strict: the earlier span keeps a tie
                if best.map_or(true, |(best_overlap, _)| o > best_overlap) {
                    best = Some((o, span.speaker_id));
                }
            }

            best.map(|(_, speaker)| speaker)
        })
        .collect()
}
