//! DHCP lease management.
//!
//! This module owns the allocation table and the address-selection algorithm:
//!
//! - Pending offers (short-lived reservations made on DISCOVER)
//! - Bindings (confirmed leases made on REQUEST)
//! - Ascending first-fit scan of the configured range
//! - Lazy expiry on read plus an explicit [`Leases::sweep_expired`]
//!
//! Every operation takes the current time as an argument so callers (and
//! tests) control the clock.
//!
//! # Thread Safety
//!
//! All state lives behind one [`RwLock`]. Anything that may remove or insert
//! an entry (`offer`, `commit`, `lookup`, `sweep_expired`) takes the write
//! lock, so the range scan in `offer` and the insert in `commit` never
//! interleave. Pure reads take the read lock.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Proposed in an OFFER, waiting for the client's REQUEST.
    Offered,
    /// Confirmed with an ACK.
    Bound,
}

/// A time-bounded association between a client and an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub mac: MacAddress,
    pub ip_address: Ipv4Addr,
    pub expires_at: DateTime<Utc>,
    pub state: LeaseState,
}

impl Lease {
    fn new(
        mac: MacAddress,
        ip_address: Ipv4Addr,
        now: DateTime<Utc>,
        ttl_seconds: u32,
        state: LeaseState,
    ) -> Self {
        Self {
            mac,
            ip_address,
            expires_at: now + TimeDelta::seconds(i64::from(ttl_seconds)),
            state,
        }
    }

    /// A lease is live only while its expiry is strictly in the future.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct PoolState {
    offers: HashMap<MacAddress, Lease>,
    bindings: HashMap<MacAddress, Lease>,
}

impl PoolState {
    fn lookup(&mut self, mac: MacAddress, now: DateTime<Utc>) -> Option<Ipv4Addr> {
        let lease = self.bindings.get(&mac)?;
        if lease.is_active(now) {
            return Some(lease.ip_address);
        }

        debug!("Binding {} -> {} expired", mac, lease.ip_address);
        self.bindings.remove(&mac);
        None
    }

    /// True if a live binding or a live offer of a different client holds `ip`.
    fn held_by_other(&self, mac: MacAddress, ip: Ipv4Addr, now: DateTime<Utc>) -> bool {
        self.bindings
            .values()
            .chain(self.offers.values())
            .any(|lease| lease.mac != mac && lease.ip_address == ip && lease.is_active(now))
    }

    /// Addresses of live bindings plus live offers made to other clients.
    ///
    /// The caller's own offer never counts against it.
    fn unavailable_for(&self, mac: MacAddress, now: DateTime<Utc>) -> HashSet<Ipv4Addr> {
        let bound = self
            .bindings
            .values()
            .filter(|lease| lease.is_active(now))
            .map(|lease| lease.ip_address);
        let offered = self
            .offers
            .values()
            .filter(|lease| lease.mac != mac && lease.is_active(now))
            .map(|lease| lease.ip_address);
        bound.chain(offered).collect()
    }
}

/// The lease table for one address range.
///
/// # Example
///
/// ```no_run
/// use bridgelease::{Config, Leases, MacAddress};
///
/// # async fn example() -> bridgelease::Result<()> {
/// let leases = Leases::new(&Config::default());
/// let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
/// let now = chrono::Utc::now();
///
/// let ip = leases.offer(mac, now).await?;
/// leases.commit(mac, ip, now).await;
/// assert_eq!(leases.lookup(mac, now).await, Some(ip));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Leases {
    state: RwLock<PoolState>,
    range_start: u32,
    range_end: u32,
    lease_time_seconds: u32,
    offer_time_seconds: u32,
}

impl Leases {
    pub fn new(config: &Config) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            range_start: u32::from(config.range_start),
            range_end: u32::from(config.range_end),
            lease_time_seconds: config.lease_time_seconds,
            offer_time_seconds: config.offer_time_seconds,
        }
    }

    /// Returns the bound address for `mac` if the binding has not expired.
    ///
    /// An expired binding is removed by this call.
    pub async fn lookup(&self, mac: MacAddress, now: DateTime<Utc>) -> Option<Ipv4Addr> {
        let mut state = self.state.write().await;
        state.lookup(mac, now)
    }

    /// Picks an address for a DISCOVER from `mac`.
    ///
    /// # Allocation Priority
    ///
    /// 1. Existing live binding for this client (returned unchanged)
    /// 2. This client's own live offer, if nobody else has taken the address
    /// 3. First address of the range not held by a live binding or by another
    ///    client's live offer
    ///
    /// Cases 2 and 3 (re)start the offer timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no address is free. No offer is
    /// recorded in that case.
    pub async fn offer(&self, mac: MacAddress, now: DateTime<Utc>) -> Result<Ipv4Addr> {
        let mut state = self.state.write().await;

        if let Some(ip) = state.lookup(mac, now) {
            return Ok(ip);
        }

        if let Some(pending) = state.offers.get(&mac)
            && pending.is_active(now)
            && !state.held_by_other(mac, pending.ip_address, now)
        {
            let ip = pending.ip_address;
            state.offers.insert(
                mac,
                Lease::new(mac, ip, now, self.offer_time_seconds, LeaseState::Offered),
            );
            return Ok(ip);
        }

        let unavailable = state.unavailable_for(mac, now);
        let free = (self.range_start..=self.range_end)
            .map(Ipv4Addr::from)
            .find(|ip| !unavailable.contains(ip));

        match free {
            Some(ip) => {
                state.offers.insert(
                    mac,
                    Lease::new(mac, ip, now, self.offer_time_seconds, LeaseState::Offered),
                );
                Ok(ip)
            }
            None => Err(Error::PoolExhausted),
        }
    }

    /// Binds `ip` to `mac` for the configured lease time.
    ///
    /// Overwrites any previous binding of `mac` and drops its pending offer.
    /// The address is not checked against the offer or the range; see
    /// [`try_commit`](Self::try_commit) for the checked variant.
    pub async fn commit(&self, mac: MacAddress, ip: Ipv4Addr, now: DateTime<Utc>) -> Lease {
        let mut state = self.state.write().await;

        let lease = Lease::new(mac, ip, now, self.lease_time_seconds, LeaseState::Bound);
        state.offers.remove(&mac);
        state.bindings.insert(mac, lease.clone());
        lease
    }

    /// Binds `ip` to `mac` only if the address is free for this client.
    ///
    /// The availability check and the insert happen under one write lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressUnavailable`] if `ip` is outside the range or
    /// another client holds a live binding or offer for it.
    pub async fn try_commit(
        &self,
        mac: MacAddress,
        ip: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        if !self.in_range(ip) {
            return Err(Error::AddressUnavailable(ip));
        }

        let mut state = self.state.write().await;
        if state.held_by_other(mac, ip, now) {
            return Err(Error::AddressUnavailable(ip));
        }

        let lease = Lease::new(mac, ip, now, self.lease_time_seconds, LeaseState::Bound);
        state.offers.remove(&mac);
        state.bindings.insert(mac, lease.clone());
        Ok(lease)
    }

    /// Returns the live binding for `mac` without removing stale entries.
    pub async fn binding(&self, mac: MacAddress, now: DateTime<Utc>) -> Option<Lease> {
        let state = self.state.read().await;
        state
            .bindings
            .get(&mac)
            .filter(|lease| lease.is_active(now))
            .cloned()
    }

    /// Returns the live pending offer for `mac`, if any.
    pub async fn pending_offer(&self, mac: MacAddress, now: DateTime<Utc>) -> Option<Lease> {
        let state = self.state.read().await;
        state
            .offers
            .get(&mac)
            .filter(|lease| lease.is_active(now))
            .cloned()
    }

    /// Removes every expired offer and binding.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let before = state.offers.len() + state.bindings.len();

        state.offers.retain(|_, lease| lease.is_active(now));
        state.bindings.retain(|_, lease| lease.is_active(now));

        before - (state.offers.len() + state.bindings.len())
    }

    /// Returns all offers and bindings (including expired ones not yet swept).
    pub async fn list_leases(&self) -> Vec<Lease> {
        let state = self.state.read().await;
        let mut leases: Vec<Lease> = state
            .bindings
            .values()
            .chain(state.offers.values())
            .cloned()
            .collect();
        leases.sort_by_key(|lease| lease.ip_address);
        leases
    }

    /// Returns the count of non-expired bindings.
    pub async fn active_binding_count(&self, now: DateTime<Utc>) -> usize {
        let state = self.state.read().await;
        state
            .bindings
            .values()
            .filter(|lease| lease.is_active(now))
            .count()
    }

    /// Zero when the range is inverted.
    pub fn pool_size(&self) -> u32 {
        self.range_end
            .checked_sub(self.range_start)
            .map_or(0, |span| span.saturating_add(1))
    }

    fn in_range(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        addr >= self.range_start && addr <= self.range_end
    }
}
