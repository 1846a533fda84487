//! Data access for the order/payment ledger.
//!
//! Every function takes any [`sea_orm::ConnectionTrait`] so the same query
//! runs on the pool or inside an open [`sea_orm::DatabaseTransaction`].

pub mod catalog_repository;
pub mod order_repository;
pub mod payment_repository;
pub mod user_repository;

/// One-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 10;
    pub const MAX_LIMIT: u64 = 100;

    /// Clamps raw query values into a valid page.
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Page;

    #[test]
    fn page_values_are_clamped() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: 10 });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, limit: 1 });
        assert_eq!(Page::new(Some(3), Some(500)), Page { page: 3, limit: 100 });
    }
}
