use std::time::Duration;

/// Settings injected into services when they are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Upper bound for one use case, covering every storage call it makes.
    pub timeout: Duration,

    /// Page size used when a listing does not request one.
    pub default_page_size: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            default_page_size: 10,
        }
    }
}
