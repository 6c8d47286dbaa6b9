//! Persistent storage for the single BLE bond.
//!
//! The remote pairs with exactly one host. The bond (peer identity plus the
//! long-term key material the SoftDevice hands us after pairing) is kept in
//! its own record region so a power cut during a bonding write can never
//! leave a half-written key behind.

use embedded_storage_async::nor_flash::NorFlash;
use serde::{Deserialize, Serialize};

use crate::config::{BOND_FLASH_PAGE_START, FLASH_PAGE_SIZE};
use crate::error::StorageError;
use crate::storage::{LoadOutcome, Persisted};

/// Bumped whenever the serialised layout of [`BondRecord`] changes.
const BOND_FORMAT_VERSION: u8 = 1;

/// BLE address of the bonded host (6 bytes + address type).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    /// 0 public, 1 random static, 2 resolvable private, 3 non-resolvable.
    pub kind: u8,
    pub bytes: [u8; 6],
}

/// Everything needed to re-encrypt a link with the bonded host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    /// Identity address of the host.
    pub peer: PeerAddress,
    /// Long-term key.
    pub ltk: [u8; 16],
    /// LTK flags as reported by the controller (authenticated, LESC, size).
    pub ltk_flags: u8,
    /// Master identification (legacy pairing: EDIV + Rand).
    pub ediv: u16,
    pub rand: [u8; 8],
    /// Identity resolving key of the host, for resolvable private addresses.
    pub irk: [u8; 16],
}

/// In-memory cache of the bond, synced with flash.
pub struct BondStore {
    cell: Persisted<BondRecord>,
}

impl BondStore {
    pub const fn new() -> Self {
        Self::at(BOND_FLASH_PAGE_START * FLASH_PAGE_SIZE)
    }

    pub const fn at(base: u32) -> Self {
        Self {
            cell: Persisted::new(base, BOND_FORMAT_VERSION),
        }
    }

    pub fn get(&self) -> Option<&BondRecord> {
        self.cell.get()
    }

    pub fn has_bond(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Store a freshly completed bond, replacing any previous one.
    pub fn replace(&mut self, bond: BondRecord) {
        if self.get().is_some_and(|b| b.peer != bond.peer) {
            info!("BondStore: replacing bond with a new host");
        }
        self.cell.set(bond);
    }

    /// Forget the bond. Idempotent.
    pub fn clear(&mut self) {
        if self.has_bond() {
            info!("BondStore: bond cleared");
        }
        self.cell.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.cell.is_dirty()
    }

    /// Load the bond. An unreadable record is discarded and a tombstone is
    /// scheduled, leaving the device unbonded.
    pub async fn load_from_flash(&mut self, flash: &mut impl NorFlash) -> LoadOutcome {
        let outcome = self.cell.load(flash).await;
        match outcome {
            LoadOutcome::Loaded => info!("BondStore: bond loaded"),
            LoadOutcome::Empty => info!("BondStore: no bond stored"),
            LoadOutcome::Discarded => warn!("BondStore: corrupt bond discarded"),
        }
        outcome
    }

    /// Persist the bond if it changed.
    pub async fn save_to_flash(&mut self, flash: &mut impl NorFlash) -> Result<(), StorageError> {
        let r = self.cell.flush(flash).await;
        if let Err(e) = r {
            error!("BondStore: flash write error: {:?}", e);
        }
        r
    }
}

impl Default for BondStore {
    fn default() -> Self {
        Self::new()
    }
}
