//! Page addressing for the paged store

use strata_core::BlockId;

/// A page of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub block_id: BlockId,
    pub page_index: u64,
}

impl PageId {
    pub fn new(block_id: BlockId, page_index: u64) -> Self {
        Self {
            block_id,
            page_index,
        }
    }
}

/// The part of one page covered by a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub page_index: u64,
    /// Offset inside the page
    pub offset: u64,
    pub len: u64,
}

/// Number of pages a block of `length` bytes occupies
pub fn page_count(length: u64, page_size: u64) -> u64 {
    length.div_ceil(page_size)
}

/// Bytes held by page `page_index` of a block of `length` bytes
pub fn page_length(length: u64, page_size: u64, page_index: u64) -> u64 {
    let start = page_index.saturating_mul(page_size);
    length.saturating_sub(start).min(page_size)
}

/// Split `[offset, offset + len)` into per-page slices, in order
pub fn page_ranges(offset: u64, len: u64, page_size: u64) -> Vec<PageRange> {
    let mut ranges = Vec::new();
    let end = offset.saturating_add(len);
    let mut cursor = offset;
    while cursor < end {
        let page_index = cursor / page_size;
        let in_page = cursor % page_size;
        let take = (page_size - in_page).min(end - cursor);
        ranges.push(PageRange {
            page_index,
            offset: in_page,
            len: take,
        });
        cursor += take;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_page_geometry() {
        assert_eq!(page_count(0, 4), 0);
        assert_eq!(page_count(9, 4), 3);
        assert_eq!(page_length(9, 4, 2), 1);
        assert_eq!(page_length(9, 4, 3), 0);
        assert_eq!(
            page_ranges(3, 6, 4),
            vec![
                PageRange { page_index: 0, offset: 3, len: 1 },
                PageRange { page_index: 1, offset: 0, len: 4 },
                PageRange { page_index: 2, offset: 0, len: 1 },
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_ranges_tile_the_request(
            offset in 0u64..10_000,
            len in 0u64..10_000,
            page_size in 1u64..2_048,
        ) {
            let ranges = page_ranges(offset, len, page_size);
            let total: u64 = ranges.iter().map(|r| r.len).sum();
            prop_assert_eq!(total, len);

            let mut cursor = offset;
            for range in &ranges {
                prop_assert!(range.len > 0);
                prop_assert!(range.offset + range.len <= page_size);
                prop_assert_eq!(range.page_index * page_size + range.offset, cursor);
                cursor += range.len;
            }
        }

        #[test]
        fn prop_page_lengths_sum_to_block(length in 0u64..100_000, page_size in 1u64..4_096) {
            let sum: u64 = (0..page_count(length, page_size))
                .map(|i| page_length(length, page_size, i))
                .sum();
            prop_assert_eq!(sum, length);
        }
    }
}
