//! Chunk planner: split a page sequence into fixed-size contiguous chunks.

use crate::pipeline::source::Page;
use std::ops::Range;

/// Position of a chunk in the document, before any content is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// 0-based ordinal among all chunks of the run.
    pub index: usize,
    /// 1-based, inclusive.
    pub first_page: usize,
    /// 1-based, inclusive.
    pub last_page: usize,
}

impl ChunkSpan {
    /// Never zero: every planned chunk holds at least one page.
    pub fn page_count(&self) -> usize {
        self.last_page + 1 - self.first_page
    }

    /// 0-based, end-exclusive page range for the content source.
    pub fn page_range(&self) -> Range<usize> {
        self.first_page - 1..self.last_page
    }
}

/// Partition `total_pages` pages into chunks of `chunk_size`.
///
/// Chunk `i` covers 1-based pages `i*chunk_size + 1 ..= min((i+1)*chunk_size, total_pages)`;
/// only the last chunk may be short. A `chunk_size` of 0 is treated as 1.
pub fn plan_chunks(total_pages: usize, chunk_size: usize) -> Vec<ChunkSpan> {
    let size = chunk_size.max(1);
    (0..total_pages.div_ceil(size))
        .map(|index| ChunkSpan {
            index,
            first_page: index * size + 1,
            last_page: ((index + 1) * size).min(total_pages),
        })
        .collect()
}

/// A unit of remote conversion: contiguous pages, immutable once built.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub first_page: usize,
    pub last_page: usize,
    pub pages: Vec<Page>,
}

impl Chunk {
    pub fn span(&self) -> ChunkSpan {
        ChunkSpan {
            index: self.index,
            first_page: self.first_page,
            last_page: self.last_page,
        }
    }
}

/// Move `pages` (in document order) into chunks following [`plan_chunks`].
pub fn build_chunks(pages: Vec<Page>, chunk_size: usize) -> Vec<Chunk> {
    let spans = plan_chunks(pages.len(), chunk_size);
    let mut remaining = pages.into_iter();

    spans
        .into_iter()
        .map(|span| {
            let pages: Vec<Page> = remaining.by_ref().take(span.page_count()).collect();
            Chunk {
                index: span.index,
                first_page: pages.first().map_or(span.first_page, |p| p.index),
                last_page: pages.last().map_or(span.last_page, |p| p.index),
                pages,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_five_pages_in_chunks_of_twenty_five() {
        let spans = plan_chunks(55, 25);
        let ranges: Vec<(usize, usize, usize)> =
            spans.iter().map(|s| (s.index, s.first_page, s.last_page)).collect();
        assert_eq!(ranges, vec![(0, 1, 25), (1, 26, 50), (2, 51, 55)]);
        assert_eq!(spans[2].page_range(), 50..55);
    }

    #[test]
    fn chunks_cover_every_page_exactly_once() {
        for total in 1..=80 {
            for size in 1..=30 {
                let spans = plan_chunks(total, size);
                assert_eq!(spans.len(), total.div_ceil(size), "total={total} size={size}");

                let mut expected_next = 1;
                for (i, span) in spans.iter().enumerate() {
                    assert_eq!(span.index, i);
                    assert_eq!(span.first_page, expected_next, "gap or overlap at chunk {i}");
                    assert!(span.page_count() >= 1 && span.page_count() <= size);
                    expected_next = span.last_page + 1;
                }
                assert_eq!(expected_next, total + 1, "union must end at the last page");
            }
        }
    }

    #[test]
    fn no_pages_no_chunks() {
        assert!(plan_chunks(0, 25).is_empty());
    }

    #[test]
    fn zero_chunk_size_is_one_page_per_chunk() {
        assert_eq!(plan_chunks(3, 0).len(), 3);
    }

    #[test]
    fn build_chunks_moves_pages_in_order() {
        let pages: Vec<Page> = (1..=7).map(|i| Page::text(i, format!("p{i}"))).collect();
        let chunks = build_chunks(pages, 3);

        assert_eq!(chunks.len(), 3);
        let shape: Vec<(usize, usize, usize)> = chunks
            .iter()
            .map(|c| (c.first_page, c.last_page, c.pages.len()))
            .collect();
        assert_eq!(shape, vec![(1, 3, 3), (4, 6, 3), (7, 7, 1)]);
        assert_eq!(chunks[1].span().page_range(), 3..6);
    }
}
