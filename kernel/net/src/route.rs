//! IPv4 routing table.
//!
//! A linear table searched for the longest matching prefix; the default
//! route (`0.0.0.0/0`) applies when nothing else matches. Ties on prefix
//! length go to the entry with the greater metric.

use alloc::vec::Vec;

use bitflags::bitflags;

use muon_core::KernelError;
use muon_core::sync::{SpinLock, preempt_guard};

use crate::address::Ipv4Addr;
use crate::interface::IfaceId;

bitflags! {
    /// Route entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RouteFlags: u16 {
        /// The route is active.
        const UP = 1 << 0;
        /// The target is a single host.
        const HOST = 1 << 1;
        /// Traffic goes via the gateway.
        const GATEWAY = 1 << 2;
        /// Traffic matching this route is dropped.
        const REJECT = 1 << 3;
    }
}

/// One routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Outgoing interface.
    pub iface: IfaceId,
    /// Destination network.
    pub dest: Ipv4Addr,
    /// Destination netmask.
    pub mask: Ipv4Addr,
    /// Next-hop gateway, `0.0.0.0` for on-link routes.
    pub gateway: Ipv4Addr,
    /// Route metric.
    pub metric: u16,
    /// Flags.
    pub flags: RouteFlags,
    /// CIDR prefix length, derived from the mask at insertion.
    pub prefix_len: u8,
}

/// Returns whether `mask` is a valid netmask (contiguous leading ones).
pub fn mask_valid(mask: Ipv4Addr) -> bool {
    let inv = !mask.0;
    inv & inv.wrapping_add(1) == 0
}

/// Converts a netmask to its CIDR prefix length.
pub fn mask_to_prefix_len(mask: Ipv4Addr) -> u8 {
    mask.0.count_ones() as u8
}

/// The routing table.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Adds a route.
    ///
    /// A duplicate is a route with the same destination, mask and
    /// gateway, or a second default route regardless of gateway.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-contiguous mask; `Exists` for
    /// duplicates.
    pub fn add(&mut self, route: Route) -> Result<(), KernelError> {
        if !mask_valid(route.mask) {
            return Err(KernelError::InvalidArgument);
        }

        let is_default = route.dest == Ipv4Addr::ANY && route.mask == Ipv4Addr::ANY;
        for existing in &self.routes {
            if existing.mask == route.mask
                && existing.dest == route.dest
                && (existing.gateway == route.gateway || is_default)
            {
                return Err(KernelError::Exists);
            }
        }

        let mut route = route;
        route.prefix_len = mask_to_prefix_len(route.mask);
        self.routes.push(route);
        Ok(())
    }

    /// Deletes the route matching `(dest, mask, gateway)`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such route exists.
    pub fn delete(
        &mut self,
        dest: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<(), KernelError> {
        let pos = self
            .routes
            .iter()
            .position(|r| r.dest == dest && r.mask == mask && r.gateway == gateway)
            .ok_or(KernelError::NotFound)?;
        self.routes.remove(pos);
        Ok(())
    }

    /// Finds the best route for `ip`: longest matching active prefix,
    /// greatest metric among equal prefixes, with the default route as
    /// the fallback.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = self
            .routes
            .iter()
            .find(|r| r.dest == Ipv4Addr::ANY && r.mask == Ipv4Addr::ANY && r.flags.contains(RouteFlags::UP));

        let mut best_prefix: i16 = -1;
        let mut best_metric: i32 = -1;

        for r in &self.routes {
            if (r.dest.0 & r.mask.0) == (ip.0 & r.mask.0)
                && r.flags.contains(RouteFlags::UP)
                && (i16::from(r.prefix_len) > best_prefix
                    || (i16::from(r.prefix_len) == best_prefix
                        && i32::from(r.metric) > best_metric))
            {
                best_prefix = i16::from(r.prefix_len);
                best_metric = i32::from(r.metric);
                best = Some(r);
            }
        }

        best
    }

    /// Iterates over the table entries.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ── Global table ────────────────────────────────────────────────────────

static ROUTES: SpinLock<RouteTable> = SpinLock::new(RouteTable::new());

/// Adds a route to the global table.
pub fn add(route: Route) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    ROUTES.lock().add(route)
}

/// Deletes a route from the global table.
pub fn delete(dest: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    ROUTES.lock().delete(dest, mask, gateway)
}

/// Looks up the route for `ip` in the global table.
pub fn lookup(ip: Ipv4Addr) -> Option<Route> {
    let _guard = preempt_guard();
    ROUTES.lock().lookup(ip).copied()
}

/// Snapshots the global table for iteration.
pub fn entries() -> Vec<Route> {
    let _guard = preempt_guard();
    ROUTES.lock().iter().copied().collect()
}
