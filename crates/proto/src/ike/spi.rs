//! IKE SPI reservation
//!
//! A process-wide registry of (address, SPI) pairs prevents two sessions
//! from using the same SPI value toward the same peer. Reservations are
//! released when the [`IkeSpi`] guard drops.

use crate::ike::{Error, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;

/// How many collisions an allocation tolerates before giving up
pub const MAX_ALLOCATION_ATTEMPTS: usize = 100;

static REGISTRY: Lazy<Mutex<HashSet<(IpAddr, u64)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// A reserved IKE SPI
///
/// Holding this value keeps the (address, SPI) pair reserved; dropping it
/// releases the reservation. The zero SPI is never handed out.
#[derive(Debug)]
pub struct IkeSpi {
    addr: IpAddr,
    value: u64,
}

impl IkeSpi {
    /// Allocate a fresh random SPI for the given address.
    ///
    /// # Errors
    ///
    /// Returns `SpiExhausted` after 100 colliding attempts.
    pub fn allocate(addr: IpAddr) -> Result<Self> {
        let mut registry = REGISTRY.lock().expect("SPI registry poisoned");
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let value: u64 = rng.gen();
            if value == 0 {
                continue;
            }
            if registry.insert((addr, value)) {
                return Ok(IkeSpi { addr, value });
            }
        }

        Err(Error::SpiExhausted)
    }

    /// Reserve a specific SPI value the peer chose.
    ///
    /// # Errors
    ///
    /// Rejects zero and values already reserved for this address, so each
    /// active remote SPI maps to exactly one SA record.
    pub fn reserve(addr: IpAddr, value: u64) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidParameter("SPI zero is reserved".into()));
        }

        let mut registry = REGISTRY.lock().expect("SPI registry poisoned");
        if !registry.insert((addr, value)) {
            return Err(Error::InvalidParameter(format!(
                "SPI 0x{:016x} already reserved for {}",
                value, addr
            )));
        }

        Ok(IkeSpi { addr, value })
    }

    /// The reserved SPI value
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The peer address this reservation is scoped to
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The SPI as wire bytes
    pub fn to_bytes(&self) -> [u8; 8] {
        self.value.to_be_bytes()
    }
}

impl Drop for IkeSpi {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock().expect("SPI registry poisoned");
        registry.remove(&(self.addr, self.value));
    }
}
