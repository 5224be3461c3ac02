// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Page-aligned staging buffers for shadow copies.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

const PAGE_SIZE: usize = 4096;

#[repr(C, align(4096))]
#[derive(Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
struct Page([u8; PAGE_SIZE]);

const ZERO_PAGE: Page = Page([0; PAGE_SIZE]);

/// A page-aligned buffer used to stage data for a transform.
pub(crate) struct ScratchBuffer {
    pages: Vec<Page>,
    len: usize,
}

impl ScratchBuffer {
    /// Allocates a zeroed scratch buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        let pages = vec![ZERO_PAGE; len.div_ceil(PAGE_SIZE)];
        ScratchBuffer { pages, len }
    }

    /// Returns the buffer contents.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut IntoBytes::as_mut_bytes(self.pages.as_mut_slice())[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_whole_pages() {
        let mut buf = ScratchBuffer::new(PAGE_SIZE + 1);
        assert_eq!(buf.as_mut_bytes().len(), PAGE_SIZE + 1);
        assert_eq!(buf.pages.len(), 2);
        assert!(buf.as_mut_bytes().iter().all(|&b| b == 0));
    }
}
