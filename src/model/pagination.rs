use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// Pagination query parameters, 1-indexed.
#[derive(Debug, Clone, Copy, FromForm)]
pub struct PaginationRequest {
    #[field(default = 1, validate = range(1..))]
    page_num: u32,
    #[field(default = DEFAULT_PAGE_SIZE, validate = range(1..=MAX_PAGE_SIZE as isize))]
    page_size: u32,
}

impl PaginationRequest {
    pub fn new(page_num: u32, page_size: u32) -> Self {
        Self {
            page_num: page_num.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of items before this page.
    pub fn skip(&self) -> u64 {
        u64::from(self.page_num - 1) * u64::from(self.page_size)
    }

    pub fn to_paginated<T>(self, total: u64, items: Vec<T>) -> Paginated<T> {
        Paginated {
            items,
            pagination: PaginationResult {
                page_num: self.page_num,
                page_size: self.page_size,
                total,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    pub page_num: u32,
    pub page_size: u32,
    pub total: u64,
}

/// One page of results plus where it sits in the whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}
