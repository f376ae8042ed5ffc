//! Paging options for user listings

/// Default page size
pub const DEFAULT_LIMIT: usize = 25;

/// Largest page a caller may request
pub const MAX_LIMIT: usize = 1000;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMethod {
    #[default]
    Asc,
    Desc,
}

/// Field a listing is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    #[default]
    Id,
    Username,
    Email,
    CreatedAt,
}

/// Limit/offset/order for [`UserStore::list_users`](super::UserStore::list_users)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    pub limit: usize,
    pub offset: usize,
    pub order_field: OrderField,
    pub order_method: OrderMethod,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            order_field: OrderField::Id,
            order_method: OrderMethod::Asc,
        }
    }
}

impl PageOptions {
    /// Set the page size; out-of-range values keep the current limit
    pub fn limit(mut self, limit: usize) -> Self {
        if limit == 0 || limit > MAX_LIMIT {
            tracing::warn!(limit, "Page limit out of bounds, keeping {}", self.limit);
            return self;
        }
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn order_by(mut self, field: OrderField, method: OrderMethod) -> Self {
        self.order_field = field;
        self.order_method = method;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let page = PageOptions::default();
        assert_eq!(page.limit, 25);
        assert_eq!(page.offset, 0);
        assert_eq!(page.order_field, OrderField::Id);
        assert_eq!(page.order_method, OrderMethod::Asc);
    }

    #[test]
    fn test_limit_bounds() {
        assert_eq!(PageOptions::default().limit(0).limit, DEFAULT_LIMIT);
        assert_eq!(PageOptions::default().limit(1001).limit, DEFAULT_LIMIT);
        assert_eq!(PageOptions::default().limit(1000).limit, 1000);
    }
}
