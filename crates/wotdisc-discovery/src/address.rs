//! Multicast group selection
//!
//! Maps the per-family flags and scopes of the discovery configuration to
//! the ordered, duplicate-free list of targets a run queries.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use wotdisc_core::config::{AddressScope, DiscoveryConfig};
use wotdisc_core::types::DiscoveryTarget;

/// IPv4 "All CoAP Nodes" group (RFC 7252)
pub const ALL_COAP_NODES_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

/// IPv6 link-local "All CoAP Nodes" group (RFC 7252)
pub const ALL_COAP_NODES_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfd);

/// IPv4 "All Systems on this Subnet" group
pub const ALL_NODES_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// IPv6 link-local "All Nodes" group
pub const ALL_NODES_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// IPv4 "All CoRE Resource Directories" group (RFC 9176)
pub const ALL_CORE_RD_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 189);

/// IPv6 link-local "All CoRE Resource Directories" group (RFC 9176)
pub const ALL_CORE_RD_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfe);

/// Which groups a discovery branch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// TD probe and `/.well-known/core` discovery, scoped per family
    Coap,
    /// Resource Directory discovery on the fixed RD groups
    ResourceDirectory,
}

/// Address family selection with a scope per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilySelection {
    pub ipv4: Option<AddressScope>,
    pub ipv6: Option<AddressScope>,
}

impl FamilySelection {
    /// Families used by the TD probe and core link-format branches.
    pub fn for_coap(config: &DiscoveryConfig) -> Self {
        Self {
            ipv4: config.coap_use_ipv4.then_some(config.coap_ipv4_scope),
            ipv6: config.coap_use_ipv6.then_some(config.coap_ipv6_scope),
        }
    }

    /// Families used by the Resource Directory branch. The scope is ignored.
    pub fn for_resource_directory(config: &DiscoveryConfig) -> Self {
        Self {
            ipv4: config.core_rd_use_ipv4.then_some(AddressScope::CoapOnly),
            ipv6: config.core_rd_use_ipv6.then_some(AddressScope::CoapOnly),
        }
    }
}

/// Resolves configured families to discovery targets on a fixed port.
#[derive(Debug, Clone, Copy)]
pub struct AddressResolver {
    port: u16,
}

impl AddressResolver {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Returns the groups for a selection: IPv4 first, then IPv6, no duplicates.
    pub fn resolve(&self, selection: FamilySelection, mode: GroupMode) -> Vec<DiscoveryTarget> {
        let mut targets = Vec::with_capacity(2);

        let candidates = [
            selection.ipv4.map(|scope| IpAddr::V4(ipv4_group(scope, mode))),
            selection.ipv6.map(|scope| IpAddr::V6(ipv6_group(scope, mode))),
        ];

        for ip in candidates.into_iter().flatten() {
            let target = DiscoveryTarget::with_port(ip, self.port);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        targets
    }

    /// Targets of the TD probe and core link-format branches.
    pub fn coap_targets(&self, config: &DiscoveryConfig) -> Vec<DiscoveryTarget> {
        if !config.use_coap {
            return Vec::new();
        }
        self.resolve(FamilySelection::for_coap(config), GroupMode::Coap)
    }

    /// Targets of the Resource Directory branch.
    pub fn resource_directory_targets(&self, config: &DiscoveryConfig) -> Vec<DiscoveryTarget> {
        if !(config.use_coap && config.use_core_rd) {
            return Vec::new();
        }
        self.resolve(
            FamilySelection::for_resource_directory(config),
            GroupMode::ResourceDirectory,
        )
    }
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(wotdisc_core::types::COAP_DEFAULT_PORT)
    }
}

fn ipv4_group(scope: AddressScope, mode: GroupMode) -> Ipv4Addr {
    match (mode, scope) {
        (GroupMode::ResourceDirectory, _) => ALL_CORE_RD_IPV4,
        (GroupMode::Coap, AddressScope::All) => ALL_NODES_IPV4,
        (GroupMode::Coap, AddressScope::CoapOnly) => ALL_COAP_NODES_IPV4,
    }
}

fn ipv6_group(scope: AddressScope, mode: GroupMode) -> Ipv6Addr {
    match (mode, scope) {
        (GroupMode::ResourceDirectory, _) => ALL_CORE_RD_IPV6,
        (GroupMode::Coap, AddressScope::All) => ALL_NODES_IPV6,
        (GroupMode::Coap, AddressScope::CoapOnly) => ALL_COAP_NODES_IPV6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(targets: &[DiscoveryTarget]) -> Vec<String> {
        targets.iter().map(|t| t.host()).collect()
    }

    #[test]
    fn test_coap_only_both_families() {
        let selection = FamilySelection {
            ipv4: Some(AddressScope::CoapOnly),
            ipv6: Some(AddressScope::CoapOnly),
        };
        let targets = AddressResolver::default().resolve(selection, GroupMode::Coap);
        assert_eq!(ips(&targets), ["224.0.1.187", "[ff02::fd]"]);
        assert!(targets.iter().all(|t| t.port == 5683));
    }

    #[test]
    fn test_all_scope() {
        let selection = FamilySelection {
            ipv4: Some(AddressScope::All),
            ipv6: Some(AddressScope::All),
        };
        let targets = AddressResolver::default().resolve(selection, GroupMode::Coap);
        assert_eq!(ips(&targets), ["224.0.0.1", "[ff02::1]"]);
    }

    #[test]
    fn test_mixed_scopes() {
        let selection = FamilySelection {
            ipv4: Some(AddressScope::All),
            ipv6: Some(AddressScope::CoapOnly),
        };
        let targets = AddressResolver::default().resolve(selection, GroupMode::Coap);
        assert_eq!(ips(&targets), ["224.0.0.1", "[ff02::fd]"]);
    }

    #[test]
    fn test_resource_directory_groups_ignore_scope() {
        let selection = FamilySelection {
            ipv4: Some(AddressScope::All),
            ipv6: Some(AddressScope::All),
        };
        let targets =
            AddressResolver::default().resolve(selection, GroupMode::ResourceDirectory);
        assert_eq!(ips(&targets), ["224.0.1.189", "[ff02::fe]"]);
    }

    #[test]
    fn test_no_family_selected() {
        let selection = FamilySelection {
            ipv4: None,
            ipv6: None,
        };
        assert!(AddressResolver::default()
            .resolve(selection, GroupMode::Coap)
            .is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = DiscoveryConfig::default();
        let resolver = AddressResolver::new(config.coap_port);

        assert_eq!(ips(&resolver.coap_targets(&config)), ["224.0.1.187"]);
        assert!(resolver.resource_directory_targets(&config).is_empty());

        config.use_core_rd = true;
        config.core_rd_use_ipv6 = true;
        assert_eq!(
            ips(&resolver.resource_directory_targets(&config)),
            ["224.0.1.189", "[ff02::fe]"]
        );

        config.use_coap = false;
        assert!(resolver.coap_targets(&config).is_empty());
        assert!(resolver.resource_directory_targets(&config).is_empty());
    }

    #[test]
    fn test_custom_port() {
        let selection = FamilySelection {
            ipv4: Some(AddressScope::CoapOnly),
            ipv6: None,
        };
        let targets = AddressResolver::new(15683).resolve(selection, GroupMode::Coap);
        assert_eq!(targets[0].to_string(), "coap://224.0.1.187:15683");
    }
}
