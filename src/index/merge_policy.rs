//! Merge policies for segment management.
//!
//! Commits keep appending small segments; a merge policy decides when to fold
//! them into bigger ones so queries touch a bounded number of posting lists.

use std::fmt::Debug;

use crate::segment::SegmentDescriptor;

/// A set of segments scheduled to merge into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCandidate {
    /// Segment ids to merge, ascending.
    pub segment_ids: Vec<u64>,
}

/// Trait for deciding which segments to merge after a commit.
pub trait MergePolicy: Send + Sync + Debug {
    /// Select the next merge, if any.
    ///
    /// Called repeatedly after each commit until it returns `None`, so a
    /// policy only ever needs to propose one candidate at a time.
    fn select_merge(&self, segments: &[SegmentDescriptor]) -> Option<MergeCandidate>;
}

/// Geometric merge policy.
///
/// Segments are grouped into size bands growing by `level_ratio`; when a band
/// accumulates `segments_per_level` members, they merge into the next band.
/// Sizes are measured in postings, with everything below `floor_size`
/// sharing band zero.
#[derive(Debug, Clone)]
pub struct GeometricMergePolicy {
    /// Size ratio between consecutive bands.
    pub level_ratio: u64,
    /// Number of same-band segments that triggers a merge.
    pub segments_per_level: usize,
    /// Posting count below which segments share the smallest band.
    pub floor_size: u64,
}

impl Default for GeometricMergePolicy {
    fn default() -> Self {
        GeometricMergePolicy {
            level_ratio: 4,
            segments_per_level: 4,
            floor_size: 1024,
        }
    }
}

impl GeometricMergePolicy {
    fn level_of(&self, posting_count: u32) -> u32 {
        let mut level = 0;
        let mut band = self.floor_size.max(1);
        let size = posting_count as u64;
        while size > band {
            band = band.saturating_mul(self.level_ratio);
            level += 1;
        }
        level
    }
}

impl MergePolicy for GeometricMergePolicy {
    fn select_merge(&self, segments: &[SegmentDescriptor]) -> Option<MergeCandidate> {
        // Lowest band first: merging small segments is cheapest and may
        // cascade upwards on the next call.
        let mut levels: Vec<(u32, Vec<u64>)> = Vec::new();
        for descriptor in segments {
            let level = self.level_of(descriptor.posting_count);
            match levels.iter_mut().find(|(l, _)| *l == level) {
                Some((_, ids)) => ids.push(descriptor.segment_id),
                None => levels.push((level, vec![descriptor.segment_id])),
            }
        }
        levels.sort_by_key(|(level, _)| *level);

        for (_, mut segment_ids) in levels {
            if segment_ids.len() >= self.segments_per_level {
                segment_ids.sort_unstable();
                return Some(MergeCandidate { segment_ids });
            }
        }
        None
    }
}

/// A policy that never merges, for tests and read-mostly workloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merge(&self, _segments: &[SegmentDescriptor]) -> Option<MergeCandidate> {
        None
    }
}
