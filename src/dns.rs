//! Domain name checks for discovered devices
//!
//! Purely informational: a failed check is logged and recorded on the
//! device, it never stops the device from being stored.

use crate::device::Device;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

/// Name service used by [`DomainChecker`]
pub trait NameResolver: Send + Sync {
    /// PTR lookup
    fn reverse(&self, address: IpAddr) -> io::Result<String>;
    /// A/AAAA lookup
    fn forward(&self, name: &str) -> io::Result<Vec<IpAddr>>;
}

/// The system resolver (getnameinfo/getaddrinfo)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl NameResolver for SystemResolver {
    fn reverse(&self, address: IpAddr) -> io::Result<String> {
        let name = dns_lookup::lookup_addr(&address)?;
        // getnameinfo falls back to the numeric form when there is no PTR
        if name.parse::<IpAddr>().is_ok() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no PTR record"));
        }
        Ok(name)
    }

    fn forward(&self, name: &str) -> io::Result<Vec<IpAddr>> {
        dns_lookup::lookup_host(name)
    }
}

/// Result of checking one address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCheck {
    pub name: Option<String>,
    pub error: Option<String>,
}

pub struct DomainChecker {
    resolver: Arc<dyn NameResolver>,
    supply_zone: Option<String>,
}

impl DomainChecker {
    pub fn new(resolver: Arc<dyn NameResolver>, supply_zone: Option<String>) -> Self {
        Self {
            resolver,
            supply_zone: supply_zone.map(|zone| zone.trim_matches('.').to_string()),
        }
    }

    /// Reverse lookup, forward confirmation, then the supply zone check
    pub fn check(&self, address: IpAddr) -> DomainCheck {
        let name = match self.resolver.reverse(address) {
            Ok(name) => name.trim_end_matches('.').to_string(),
            Err(e) => {
                return DomainCheck {
                    name: None,
                    error: Some(format!("no domain name: {}", e)),
                }
            }
        };

        let error = match self.resolver.forward(&name) {
            Ok(addresses) if addresses.contains(&address) => self.check_supply_zone(&name),
            Ok(_) => Some(format!("{} does not resolve back to {}", name, address)),
            Err(e) => Some(format!("forward lookup of {} failed: {}", name, e)),
        };

        DomainCheck {
            name: Some(name),
            error,
        }
    }

    fn check_supply_zone(&self, name: &str) -> Option<String> {
        let zone = self.supply_zone.as_ref()?;
        let label = name.split('.').next().unwrap_or(name);
        let supply_name = format!("{}.{}", label, zone);
        match self.resolver.forward(&supply_name) {
            Ok(addresses) if !addresses.is_empty() => None,
            _ => Some(format!("{} not found in supply zone", supply_name)),
        }
    }

    /// Run the check and record its outcome on the device
    pub fn apply(&self, device: &mut Device) {
        let check = self.check(device.address);
        if let Some(error) = &check.error {
            log::info!("{}: {}", device.address, error);
        }
        device.domain_name = check.name;
        device.domain_name_error = check.error;
    }
}
