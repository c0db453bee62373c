//! Server connection table.
//!
//! Fixed-size open-addressed hash keyed by client address, salted with a
//! random per-process value. Collisions probe with a full-period linear
//! congruential sequence; slots an insert probes through are marked
//! collided so lookups keep walking even after the occupant is removed.
//! Population is capped at half the capacity, which bounds probe lengths.
//!
//! A lock-free "recently inserted" stack threads new entries to the timer
//! thread, which finalizes admission and owns lifetime from then on.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::constants::{COLLISION_INCREMENTER, COLLISION_MULTIPLIER, HASH_TABLE_SIZE};

/// Slot is occupied.
const FLAG_USED: u32 = 1;
/// An insert probed through this slot; lookups must not stop here.
const FLAG_COLLISION: u32 = 2;

/// Why an insert was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// Population cap reached.
    Full,
    /// A live entry already has this address.
    Occupied,
}

/// Anything the table can key by address.
pub trait HasAddr {
    /// The address this entry is keyed under.
    fn addr(&self) -> SocketAddr;
}

struct Slot<T> {
    flags: AtomicU32,
    /// Next slot index + 1 in the recently-inserted stack; 0 terminates.
    next_inserted: AtomicU32,
    entry: Mutex<Option<Arc<T>>>,
}

/// Open-addressed address-to-entry table with bounded population.
pub struct ConnectionTable<T> {
    salt: u32,
    slots: Box<[Slot<T>]>,
    population: AtomicUsize,
    max_population: usize,
    insert_head: AtomicU32,
}

impl<T: HasAddr> ConnectionTable<T> {
    /// Table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(HASH_TABLE_SIZE)
    }

    /// Table with `capacity` slots (must be a power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| Slot {
                flags: AtomicU32::new(0),
                next_inserted: AtomicU32::new(0),
                entry: Mutex::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            salt: OsRng.next_u32(),
            slots,
            population: AtomicUsize::new(0),
            max_population: capacity / 2,
            insert_head: AtomicU32::new(0),
        }
    }

    /// Live entries.
    pub fn population(&self) -> usize {
        self.population.load(Ordering::Acquire)
    }

    /// Whether an insert would be refused for capacity.
    pub fn is_full(&self) -> bool {
        self.population() >= self.max_population
    }

    fn next_key(&self, key: u32) -> u32 {
        COLLISION_MULTIPLIER
            .wrapping_mul(key)
            .wrapping_add(COLLISION_INCREMENTER)
            % self.slots.len() as u32
    }

    fn first_key(&self, addr: &SocketAddr) -> u32 {
        hash_addr(addr, self.salt) % self.slots.len() as u32
    }

    /// Look up the live entry for `addr`.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<T>> {
        let mut key = self.first_key(addr);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[key as usize];
            let flags = slot.flags.load(Ordering::Acquire);
            if flags & FLAG_USED != 0 {
                if let Some(entry) = slot.entry.lock().unwrap().as_ref() {
                    if entry.addr() == *addr {
                        return Some(Arc::clone(entry));
                    }
                }
            } else if flags & FLAG_COLLISION == 0 {
                return None;
            }
            key = self.next_key(key);
        }
        None
    }

    /// Claim a slot for `entry` and thread it onto the recently-inserted
    /// stack.
    pub fn insert(&self, entry: Arc<T>) -> Result<usize, InsertError> {
        if self.is_full() {
            return Err(InsertError::Full);
        }
        let addr = entry.addr();
        let mut key = self.first_key(&addr);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[key as usize];
            let flags = slot.flags.load(Ordering::Acquire);
            if flags & FLAG_USED != 0 {
                if let Some(existing) = slot.entry.lock().unwrap().as_ref() {
                    if existing.addr() == addr {
                        return Err(InsertError::Occupied);
                    }
                }
                slot.flags.fetch_or(FLAG_COLLISION, Ordering::AcqRel);
                key = self.next_key(key);
                continue;
            }
            if slot
                .flags
                .compare_exchange(flags, flags | FLAG_USED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *slot.entry.lock().unwrap() = Some(entry);
                self.population.fetch_add(1, Ordering::AcqRel);
                self.push_inserted(key);
                return Ok(key as usize);
            }
            // Lost the claim race; treat like an occupied slot.
            slot.flags.fetch_or(FLAG_COLLISION, Ordering::AcqRel);
            key = self.next_key(key);
        }
        Err(InsertError::Full)
    }

    /// Remove `entry`. Clears the used flag but preserves the collision
    /// flag so probe chains through this slot stay intact. Returns false
    /// when the entry was already gone.
    pub fn remove(&self, entry: &Arc<T>) -> bool {
        let addr = entry.addr();
        let mut key = self.first_key(&addr);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[key as usize];
            let flags = slot.flags.load(Ordering::Acquire);
            if flags & FLAG_USED != 0 {
                let mut guard = slot.entry.lock().unwrap();
                if let Some(existing) = guard.as_ref() {
                    if Arc::ptr_eq(existing, entry) {
                        *guard = None;
                        drop(guard);
                        slot.flags.fetch_and(!FLAG_USED, Ordering::AcqRel);
                        self.population.fetch_sub(1, Ordering::AcqRel);
                        return true;
                    }
                    if existing.addr() == addr {
                        return false; // replaced by a different entry
                    }
                }
            } else if flags & FLAG_COLLISION == 0 {
                return false;
            }
            key = self.next_key(key);
        }
        false
    }

    fn push_inserted(&self, key: u32) {
        let slot = &self.slots[key as usize];
        loop {
            let head = self.insert_head.load(Ordering::Acquire);
            slot.next_inserted.store(head, Ordering::Release);
            if self
                .insert_head
                .compare_exchange(head, key + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Drain the recently-inserted stack, oldest first.
    pub fn take_inserted(&self) -> Vec<Arc<T>> {
        let mut head = self.insert_head.swap(0, Ordering::AcqRel);
        let mut out = Vec::new();
        while head != 0 {
            let slot = &self.slots[(head - 1) as usize];
            if let Some(entry) = slot.entry.lock().unwrap().as_ref() {
                out.push(Arc::clone(entry));
            }
            head = slot.next_inserted.swap(0, Ordering::AcqRel);
        }
        out.reverse();
        out
    }
}

impl<T: HasAddr> Default for ConnectionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_addr(addr: &SocketAddr, salt: u32) -> u32 {
    let mut h = salt;
    match addr.ip() {
        IpAddr::V4(ip) => {
            h = mix32(h ^ u32::from_be_bytes(ip.octets()));
        }
        IpAddr::V6(ip) => {
            for chunk in ip.octets().chunks_exact(4) {
                h = mix32(h ^ u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
    }
    mix32(h ^ addr.port() as u32)
}

/// 32-bit avalanche mixer.
fn mix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}
