//! Locating the segment that holds a byte offset

use crate::error::{NntpError, Result};
use tracing::trace;

/// Decoded byte range of one segment, `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// Segment index
    pub index: usize,
    /// First byte
    pub start: u64,
    /// One past the last byte
    pub end: u64,
}

impl SegmentRange {
    /// Whether `offset` falls inside this segment
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Find the segment containing `target`
///
/// Segments are assumed to be roughly equal in size, so the first guess is
/// the linear interpolation of `target` over the bytes still unaccounted
/// for. Every probe narrows the window to the segments on the correct side;
/// after repeated misses the guess falls back to the midpoint so skewed
/// layouts still converge in logarithmic time.
///
/// `range_of(i)` returns the `(start, end)` byte range of segment `i`; it is
/// typically a yEnc header lookup and may cost a network round trip.
///
/// # Errors
///
/// - [`NntpError::CorruptMetadata`] - ranges are inconsistent with each
///   other or with `file_size` (gaps, overlaps, empty segments)
/// - anything `range_of` returns, unchanged
pub async fn find_segment<F, Fut>(
    target: u64,
    segment_count: usize,
    file_size: u64,
    mut range_of: F,
) -> Result<SegmentRange>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<(u64, u64)>>,
{
    if segment_count == 0 || target >= file_size {
        return Err(NntpError::CorruptMetadata(format!(
            "offset {} outside file of {} bytes in {} segments",
            target, file_size, segment_count
        )));
    }

    // Invariant: segments lo..=hi cover exactly lo_off..hi_off
    let (mut lo, mut hi) = (0usize, segment_count - 1);
    let (mut lo_off, mut hi_off) = (0u64, file_size);
    let mut misses = 0u32;

    loop {
        let guess = if misses >= 2 && misses % 2 == 0 {
            lo + (hi - lo) / 2
        } else {
            let span = (hi - lo + 1) as u128;
            let into = (target - lo_off) as u128;
            let width = (hi_off - lo_off) as u128;
            (lo + (into * span / width) as usize).clamp(lo, hi)
        };

        let (start, end) = range_of(guess).await?;
        trace!("probe segment {} -> {}..{} for offset {}", guess, start, end, target);

        if start >= end || start < lo_off || end > hi_off {
            return Err(corrupt(guess, start, end, lo_off, hi_off));
        }
        // Edge segments of the window must touch its edges
        if (guess == lo && start != lo_off) || (guess == hi && end != hi_off) {
            return Err(corrupt(guess, start, end, lo_off, hi_off));
        }

        let range = SegmentRange {
            index: guess,
            start,
            end,
        };
        if range.contains(target) {
            return Ok(range);
        }

        if target < start {
            hi = guess - 1;
            hi_off = start;
        } else {
            lo = guess + 1;
            lo_off = end;
        }
        misses += 1;
    }
}

fn corrupt(index: usize, start: u64, end: u64, lo_off: u64, hi_off: u64) -> NntpError {
    NntpError::CorruptMetadata(format!(
        "segment {} spans {}..{}, outside the expected window {}..{}",
        index, start, end, lo_off, hi_off
    ))
}
