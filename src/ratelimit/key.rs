//! Rate limit key generation and handling.

use serde::{Deserialize, Serialize};

/// Logical grouping of API endpoints that share one throttling budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Unclassified; never rate limited.
    #[default]
    Unknown,
    /// Microsoft.Compute
    Compute,
    /// Microsoft.Network
    Network,
    /// Microsoft.Storage control plane
    Storage,
    /// Microsoft.DocumentDB
    Cosmos,
    /// Microsoft.Cache
    Redis,
}

impl Service {
    /// Every known service, in display order.
    pub const ALL: [Service; 5] = [
        Service::Compute,
        Service::Network,
        Service::Storage,
        Service::Cosmos,
        Service::Redis,
    ];

    /// Whether this is the unknown (unlimited) service.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Service::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Unknown => "unknown",
            Service::Compute => "compute",
            Service::Network => "network",
            Service::Storage => "storage",
            Service::Cosmos => "cosmos",
            Service::Redis => "redis",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call kind. List and read calls draw from independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Read,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::List, Operation::Read];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Read => "read",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that uniquely identifies one throttling budget.
///
/// Two different scopes never share a budget, even for the same service and
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Caller-supplied tenant or subscription identifier (opaque)
    pub scope: String,
    /// Service the call belongs to
    pub service: Service,
    /// Kind of call
    pub operation: Operation,
}

impl RateLimitKey {
    /// Create a new rate limit key.
    pub fn new(scope: impl Into<String>, service: Service, operation: Operation) -> Self {
        Self {
            scope: scope.into(),
            service,
            operation,
        }
    }

    /// Whether admission for this key is always granted without a limiter.
    pub fn is_unlimited(&self) -> bool {
        self.service.is_unknown()
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.scope, self.service, self.operation)
    }
}
