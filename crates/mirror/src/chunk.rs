//! Chunked fetch planning
//!
//! Large mailboxes are never listed or fetched in one request. The
//! planner cuts outstanding work into a finite, ordered sequence of
//! chunks: explicit UID batches for fetching, calendar-month date ranges
//! for listing. A failing chunk is subdivided rather than repeated
//! wholesale; subdivision bottoms out at single UIDs or single days.

use chrono::{Duration, NaiveDate};

/// A bounded unit of listing or fetch work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Ascending UID list to fetch in one request.
    Uids(Vec<u32>),
    /// Half-open calendar range [since, before) to search, matching the
    /// IMAP `SINCE`/`BEFORE` semantics.
    DateRange { since: NaiveDate, before: NaiveDate },
}

impl Chunk {
    /// Split into two halves for retry after a chunk-level failure.
    ///
    /// Returns `None` when the chunk cannot be narrowed further (a
    /// single UID, or a single day).
    pub fn subdivide(&self) -> Option<(Chunk, Chunk)> {
        match self {
            Chunk::Uids(uids) => {
                if uids.len() < 2 {
                    return None;
                }
                let mid = uids.len() / 2;
                Some((
                    Chunk::Uids(uids[..mid].to_vec()),
                    Chunk::Uids(uids[mid..].to_vec()),
                ))
            }
            Chunk::DateRange { since, before } => {
                let days = (*before - *since).num_days();
                if days < 2 {
                    return None;
                }
                let mid = *since + Duration::days(days / 2);
                Some((
                    Chunk::DateRange {
                        since: *since,
                        before: mid,
                    },
                    Chunk::DateRange {
                        since: mid,
                        before: *before,
                    },
                ))
            }
        }
    }
}

/// Cut a sorted work set into UID chunks of at most `chunk_size`
/// members. The union of the chunks is exactly the input, in order.
pub fn uid_chunks(uids: &[u32], chunk_size: usize) -> Vec<Chunk> {
    uids.chunks(chunk_size.max(1))
        .map(|batch| Chunk::Uids(batch.to_vec()))
        .collect()
}

/// Partition [Jan 1 of `start_year`, `end`] into calendar-month ranges,
/// each month covered exactly once, ascending. Months wholly after
/// `end` are not produced; the final range still runs to the first of
/// the following month so `end` itself is covered.
pub fn month_chunks(start_year: i32, end: NaiveDate) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut year = start_year;
    let mut month = 1u32;

    while let Some(since) = NaiveDate::from_ymd_opt(year, month, 1) {
        if since > end {
            break;
        }
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let Some(before) = NaiveDate::from_ymd_opt(next_year, next_month, 1) else {
            break;
        };
        chunks.push(Chunk::DateRange { since, before });
        year = next_year;
        month = next_month;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_uid_chunks_cover_range_exactly() {
        let uids: Vec<u32> = (1..=1000).collect();
        let chunks = uid_chunks(&uids, 250);
        assert_eq!(chunks.len(), 4);

        let mut covered = BTreeSet::new();
        for chunk in &chunks {
            let Chunk::Uids(batch) = chunk else {
                panic!("expected UID chunk");
            };
            for &uid in batch {
                // No overlap between chunks.
                assert!(covered.insert(uid), "UID {uid} appeared twice");
            }
        }
        assert_eq!(covered, (1..=1000).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_uid_chunks_empty_input() {
        assert!(uid_chunks(&[], 250).is_empty());
    }

    #[test]
    fn test_uid_chunks_zero_size_clamped() {
        let chunks = uid_chunks(&[1, 2, 3], 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_month_chunks_cover_year_once() {
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let chunks = month_chunks(2024, end);
        assert_eq!(chunks.len(), 12);

        // Contiguous: each range starts where the previous ended.
        let mut expected = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for chunk in &chunks {
            let Chunk::DateRange { since, before } = chunk else {
                panic!("expected date chunk");
            };
            assert_eq!(*since, expected);
            assert!(before > since);
            expected = *before;
        }
        assert_eq!(expected, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_month_chunks_stop_after_end() {
        let end = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let chunks = month_chunks(2024, end);
        // Jan, Feb, Mar; the March range covers the 15th.
        assert_eq!(chunks.len(), 3);
        let Chunk::DateRange { before, .. } = &chunks[2] else {
            panic!("expected date chunk");
        };
        assert_eq!(*before, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    }

    #[test]
    fn test_subdivide_uid_chunk_preserves_members() {
        let chunk = Chunk::Uids(vec![1, 2, 3, 4, 5]);
        let (a, b) = chunk.subdivide().unwrap();
        let (Chunk::Uids(a), Chunk::Uids(b)) = (a, b) else {
            panic!("expected UID chunks");
        };
        assert_eq!(a, vec![1, 2]);
        assert_eq!(b, vec![3, 4, 5]);
    }

    #[test]
    fn test_subdivide_single_uid_refuses() {
        assert!(Chunk::Uids(vec![42]).subdivide().is_none());
    }

    #[test]
    fn test_subdivide_month_to_fortnights() {
        let chunk = Chunk::DateRange {
            since: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            before: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        let (a, b) = chunk.subdivide().unwrap();
        let Chunk::DateRange { since, before } = a else {
            panic!("expected date chunk");
        };
        assert_eq!(since, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(before, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        let Chunk::DateRange { since, before } = b else {
            panic!("expected date chunk");
        };
        assert_eq!(since, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(before, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn test_subdivide_single_day_refuses() {
        let chunk = Chunk::DateRange {
            since: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            before: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        assert!(chunk.subdivide().is_none());
    }
}
