//! DNAT mapping identifiers and the mapping resolver.

use tracing::{debug, warn};

use super::types::{DNatConfig, IdentityMapping, LocalIp, StaticMapping};

/// Registry name of a static (or load-balanced static) mapping.
///
/// Local endpoints are sorted first, so listing them in a different order
/// yields the same name.
pub fn static_mapping_id(mapping: &StaticMapping) -> String {
    let mut locals: Vec<String> = mapping
        .local_ips
        .iter()
        .map(|l| format!("{}:{}:{}", l.local_ip, l.local_port, l.probability))
        .collect();
    locals.sort();

    format!(
        "stmap|{}|{}|{}|{}|{}|{}",
        mapping.external_interface,
        mapping.external_ip,
        mapping.external_port,
        mapping.protocol.as_str(),
        mapping.twice_nat.as_str(),
        locals.join(",")
    )
}

/// Registry name of an identity mapping.
pub fn identity_mapping_id(mapping: &IdentityMapping) -> String {
    format!(
        "idmap|{}|{}|{}|{}|{}",
        mapping.vrf_id,
        mapping.addressed_interface,
        mapping.ip_address,
        mapping.port,
        mapping.protocol.as_str()
    )
}

/// Same endpoint count and every desired endpoint present in `actual`.
fn same_local_endpoints(desired: &[LocalIp], actual: &[LocalIp]) -> bool {
    desired.len() == actual.len() && desired.iter().all(|l| actual.contains(l))
}

fn lb_mapping_matches(desired: &StaticMapping, actual: &StaticMapping) -> bool {
    desired.twice_nat == actual.twice_nat
        && desired.external_ip == actual.external_ip
        && desired.external_port == actual.external_port
        && desired.protocol == actual.protocol
        && same_local_endpoints(&desired.local_ips, &actual.local_ips)
}

fn single_mapping_matches(desired: &StaticMapping, actual: &StaticMapping) -> bool {
    if desired.twice_nat != actual.twice_nat
        || desired.external_ip != actual.external_ip
        || desired.external_port != actual.external_port
        || desired.external_interface != actual.external_interface
        || desired.protocol != actual.protocol
    {
        return false;
    }
    match (desired.local_ips.as_slice(), actual.local_ips.as_slice()) {
        ([want], [have]) => want == have,
        _ => {
            warn!(
                "Static mapping {} without load balancing has {} local endpoints, dataplane has {}",
                static_mapping_id(desired),
                desired.local_ips.len(),
                actual.local_ips.len()
            );
            false
        }
    }
}

fn identity_mapping_matches(desired: &IdentityMapping, actual: &IdentityMapping) -> bool {
    desired.vrf_id == actual.vrf_id
        && desired.addressed_interface == actual.addressed_interface
        && desired.ip_address == actual.ip_address
        && desired.port == actual.port
        && desired.protocol == actual.protocol
}

/// Mappings of a DNAT label found already configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMappings {
    pub static_ids: Vec<String>,
    pub identity_ids: Vec<String>,
}

/// Pairs the mappings of `desired` with dumped ones.
///
/// Every matched dumped mapping is removed from `actual_st` / `actual_id`,
/// so they end up holding only the dataplane leftovers. A dumped mapping
/// matches at most one desired mapping. Returns the identifiers of the
/// matched desired mappings in declaration order.
pub fn resolve_mappings(
    desired: &DNatConfig,
    actual_st: &mut Vec<StaticMapping>,
    actual_id: &mut Vec<IdentityMapping>,
) -> ResolvedMappings {
    let mut resolved = ResolvedMappings::default();

    for want in &desired.st_mappings {
        let position = if want.is_load_balanced() {
            actual_st.iter().position(|have| lb_mapping_matches(want, have))
        } else {
            actual_st
                .iter()
                .position(|have| single_mapping_matches(want, have))
        };
        if let Some(pos) = position {
            actual_st.remove(pos);
            let id = static_mapping_id(want);
            debug!("DNAT {}: mapping {} already configured", desired.label, id);
            resolved.static_ids.push(id);
        }
    }

    for want in &desired.id_mappings {
        if let Some(pos) = actual_id
            .iter()
            .position(|have| identity_mapping_matches(want, have))
        {
            actual_id.remove(pos);
            let id = identity_mapping_id(want);
            debug!("DNAT {}: identity mapping {} already configured", desired.label, id);
            resolved.identity_ids.push(id);
        }
    }

    resolved
}
