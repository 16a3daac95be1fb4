use super::error::NsResolutionError;
use crate::metrics::REFERRAL_CANDIDATES_TOTAL;
use crate::types::{RData, Response};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};

/// Turns a nameserver hostname into an address when a referral carries no glue.
#[async_trait]
pub trait NameserverLookup: Send + Sync {
    async fn lookup_ns(&self, ns: &str) -> Result<Ipv4Addr, NsResolutionError>;
}

/// NS hostnames named in the authority section, in order, without duplicates.
pub fn nameservers(response: &Response) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in &response.authority {
        if let RData::NS(ns) = &record.data {
            if !names.contains(ns) { names.push(ns.clone()); }
        }
    }
    names
}

/// Additional-section A records belonging to one of `ns_names`, ordered by
/// the nameserver they belong to.
pub fn glue_addresses(response: &Response, ns_names: &[String], port: u16) -> Vec<SocketAddr> {
    let mut addrs = Vec::new();
    for ns in ns_names {
        for record in &response.additional {
            if &record.name != ns { continue; }
            if let RData::A(ip) = record.data {
                let addr = SocketAddr::new(ip.into(), port);
                if !addrs.contains(&addr) { addrs.push(addr); }
            }
        }
    }
    addrs
}

/// Next-hop candidates for a referral. Glue wins outright; otherwise up to
/// `max_lookups` NS names are resolved through `lookup`, skipping failures.
/// An empty result means the referral is unusable.
pub async fn extract<L>(response: &Response, port: u16, max_lookups: usize, lookup: &L) -> Vec<SocketAddr>
where
    L: NameserverLookup + ?Sized,
{
    let ns_names = nameservers(response);
    if ns_names.is_empty() { return Vec::new(); }

    let glue = glue_addresses(response, &ns_names, port);
    if !glue.is_empty() {
        REFERRAL_CANDIDATES_TOTAL.with_label_values(&["glue"]).inc_by(glue.len() as u64);
        tracing::debug!("Referral to {:?} with {} glue address(es)", ns_names, glue.len());
        return glue;
    }

    let mut candidates = Vec::new();
    for ns in ns_names.iter().take(max_lookups) {
        match lookup.lookup_ns(ns).await {
            Ok(ip) => {
                let addr = SocketAddr::new(ip.into(), port);
                if !candidates.contains(&addr) { candidates.push(addr); }
            }
            Err(e) => tracing::warn!("Dropping nameserver candidate: {}", e),
        }
    }
    REFERRAL_CANDIDATES_TOTAL.with_label_values(&["lookup"]).inc_by(candidates.len() as u64);
    candidates
}
