//! Resource classification: resource type to service, and refresh cost.

use super::key::Service;

/// Resource-type prefixes and the service they belong to. First match wins.
const SERVICE_PREFIXES: &[(&str, Service)] = &[
    ("azurerm_virtual_machine", Service::Compute),
    ("azurerm_linux_virtual_machine", Service::Compute),
    ("azurerm_windows_virtual_machine", Service::Compute),
    ("azurerm_managed_disk", Service::Compute),
    ("azurerm_availability_set", Service::Compute),
    ("azurerm_image", Service::Compute),
    ("azurerm_virtual_network", Service::Network),
    ("azurerm_subnet", Service::Network),
    ("azurerm_network_", Service::Network),
    ("azurerm_public_ip", Service::Network),
    ("azurerm_lb", Service::Network),
    ("azurerm_route_table", Service::Network),
    ("azurerm_application_gateway", Service::Network),
    ("azurerm_firewall", Service::Network),
    ("azurerm_storage_account", Service::Storage),
    ("azurerm_cosmosdb_", Service::Cosmos),
    ("azurerm_redis_", Service::Redis),
];

/// Number of read calls one refresh of a resource issues.
///
/// These mirror the read functions of the corresponding resources and are
/// maintained by hand: when a read function gains or loses an API call, the
/// count here has to change with it. Types not listed cost one read.
const READ_COSTS: &[(&str, u32)] = &[
    // properties, keys, blob, file and queue service properties, static website
    ("azurerm_storage_account", 6),
    // account, keys, read-only keys, connection strings
    ("azurerm_cosmosdb_account", 4),
    // cache, keys, patch schedule
    ("azurerm_redis_cache", 3),
];

/// Map a resource type to the service whose budget its calls draw from.
///
/// Unmatched types yield [`Service::Unknown`], which is never rate limited.
pub fn service_for(resource_type: &str) -> Service {
    SERVICE_PREFIXES
        .iter()
        .find(|(prefix, _)| resource_type.starts_with(prefix))
        .map(|(_, service)| *service)
        .unwrap_or_default()
}

/// Number of read calls (always at least 1) one refresh of `resource_type` costs.
pub fn read_cost(resource_type: &str) -> u32 {
    READ_COSTS
        .iter()
        .find(|(name, _)| *name == resource_type)
        .map(|(_, cost)| *cost)
        .unwrap_or(1)
}

/// Resource types with a read cost above one.
pub fn multi_read_types() -> impl Iterator<Item = (&'static str, u32)> {
    READ_COSTS.iter().copied()
}
