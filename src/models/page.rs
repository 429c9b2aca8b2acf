use serde::{Deserialize, Serialize};

/// Paging parameters for state-filtered lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page index
    pub page_number: usize,
    /// Maximum records per page; 0 means unbounded
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page_number: usize, page_size: usize) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    pub fn first(page_size: usize) -> Self {
        Self::new(0, page_size)
    }

    pub fn offset(&self) -> usize {
        self.page_number.saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub page_offset: usize,
    pub page_size: usize,
    pub result_list: Vec<T>,
}

impl<T> PageResult<T> {
    pub fn new(request: &PageRequest, result_list: Vec<T>) -> Self {
        Self {
            page_offset: request.offset(),
            page_size: request.page_size,
            result_list,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.result_list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.result_list.len()
    }
}
