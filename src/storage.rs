//! Power-loss-safe value storage on internal flash.
//!
//! Each store owns a region of [`STORE_PAGES`] flash pages managed as a
//! `sequential-storage` map holding a single item:
//!
//! ```text
//! key RECORD_KEY => [format version u8][postcard payload]
//! ```
//!
//! The map appends new items and only reclaims a page once its newest item
//! has been copied forward, so a power cut during a write leaves the
//! previous item readable.
//!
//! An empty item is a tombstone: the value was deleted.

use core::ops::Range;

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{FLASH_PAGE_SIZE, STORE_PAGES};
use crate::error::StorageError;

/// Map key of the one item each region holds.
const RECORD_KEY: u8 = 0x01;

/// Largest stored item: version byte plus payload.
pub const MAX_RECORD_SIZE: usize = 512;

/// Scratch space for the map: item, key and word padding.
const SCRATCH_SIZE: usize = MAX_RECORD_SIZE + 32;

/// Size in bytes of one store's region.
pub const REGION_SIZE: u32 = STORE_PAGES * FLASH_PAGE_SIZE;

fn storage_error<E>(e: sequential_storage::Error<E>) -> StorageError {
    match e {
        sequential_storage::Error::Storage { .. } => StorageError::Flash,
        sequential_storage::Error::FullStorage => StorageError::Flash,
        sequential_storage::Error::Corrupted { .. } => StorageError::Corrupt,
        _ => StorageError::TooLarge,
    }
}

/// Result of [`Persisted::load`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadOutcome {
    /// Nothing stored, or a tombstone.
    Empty,
    Loaded,
    /// A record was present but could not be used; the cache is empty and
    /// marked dirty so the next flush replaces it.
    Discarded,
}

/// RAM copy of one persisted value plus its dirty flag.
pub struct Persisted<T> {
    range: Range<u32>,
    version: u8,
    value: Option<T>,
    dirty: bool,
}

impl<T: Serialize + DeserializeOwned + PartialEq> Persisted<T> {
    /// `base` must be aligned to the flash page size.
    pub const fn new(base: u32, version: u8) -> Self {
        Self {
            range: base..base + REGION_SIZE,
            version,
            value: None,
            dirty: false,
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Replace the cached value. Writing the same value again is a no-op.
    pub fn set(&mut self, value: T) {
        if self.value.as_ref() != Some(&value) {
            self.value = Some(value);
            self.dirty = true;
        }
    }

    /// Drop the value. Always schedules a tombstone so a record that could
    /// not be decoded is removed from flash too.
    pub fn clear(&mut self) {
        self.value = None;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub async fn load<F: NorFlash>(&mut self, flash: &mut F) -> LoadOutcome {
        let mut buf = [0u8; SCRATCH_SIZE];
        self.dirty = false;
        self.value = None;

        let item = map::fetch_item::<u8, &[u8], _>(
            flash,
            self.range.clone(),
            &mut NoCache::new(),
            &mut buf,
            &RECORD_KEY,
        )
        .await;

        match item {
            Ok(None) => LoadOutcome::Empty,
            Ok(Some(data)) => match data.split_first() {
                None => LoadOutcome::Empty,
                Some((&version, _)) if version != self.version => {
                    warn!("storage: dropping v{} record (want v{})", version, self.version);
                    self.dirty = true;
                    LoadOutcome::Discarded
                }
                Some((_, payload)) => match postcard::from_bytes::<T>(payload) {
                    Ok(v) => {
                        self.value = Some(v);
                        LoadOutcome::Loaded
                    }
                    Err(_) => {
                        error!("storage: {}-byte record does not decode", payload.len());
                        self.dirty = true;
                        LoadOutcome::Discarded
                    }
                },
            },
            Err(e) => {
                error!("storage: read failed: {:?}", storage_error(e));
                self.dirty = true;
                LoadOutcome::Discarded
            }
        }
    }

    /// Persist the cache if it changed.
    ///
    /// A failed tombstone falls back to erasing the region; if that fails
    /// too the error is [`StorageError::Unrecoverable`].
    pub async fn flush<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }

        let mut buf = [0u8; SCRATCH_SIZE];
        match &self.value {
            Some(v) => {
                let mut record = [0u8; MAX_RECORD_SIZE];
                record[0] = self.version;
                let len = postcard::to_slice(v, &mut record[1..])
                    .map_err(|_| StorageError::TooLarge)?
                    .len();
                let item: &[u8] = &record[..1 + len];
                map::store_item::<u8, &[u8], _>(
                    flash,
                    self.range.clone(),
                    &mut NoCache::new(),
                    &mut buf,
                    &RECORD_KEY,
                    &item,
                )
                .await
                .map_err(storage_error)?;
            }
            None => {
                let tombstone: &[u8] = &[];
                let stored = map::store_item::<u8, &[u8], _>(
                    flash,
                    self.range.clone(),
                    &mut NoCache::new(),
                    &mut buf,
                    &RECORD_KEY,
                    &tombstone,
                )
                .await;
                if let Err(e) = stored {
                    warn!("storage: tombstone failed ({:?}), erasing region", storage_error(e));
                    sequential_storage::erase_all(flash, self.range.clone())
                        .await
                        .map_err(|_| StorageError::Unrecoverable)?;
                }
            }
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Flash stand-ins for host tests.

    use embedded_storage_async::nor_flash::{
        ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };
    use sequential_storage::mock_flash::{MockFlashBase, MockFlashError, WriteCountCheck};

    pub const PAGE: usize = 4096;

    /// Four 4 KiB pages of 32-bit words: room for two store regions.
    pub type MockFlash = MockFlashBase<4, 4, 1024>;

    pub fn flash() -> MockFlash {
        MockFlash::new(WriteCountCheck::Twice, None, true)
    }

    #[derive(Debug)]
    pub enum Fault {
        Injected,
        Flash(MockFlashError),
    }

    impl NorFlashError for Fault {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Fault::Injected => NorFlashErrorKind::Other,
                Fault::Flash(e) => e.kind(),
            }
        }
    }

    /// [`MockFlash`] whose writes and erases can be made to fail outright.
    pub struct Faulty {
        pub inner: MockFlash,
        pub fail_writes: bool,
        pub fail_erase: bool,
    }

    impl Faulty {
        pub fn new() -> Self {
            Self {
                inner: flash(),
                fail_writes: false,
                fail_erase: false,
            }
        }

        /// Writes and erases both fail.
        pub fn dead() -> Self {
            Self {
                fail_writes: true,
                fail_erase: true,
                ..Self::new()
            }
        }
    }

    impl ErrorType for Faulty {
        type Error = Fault;
    }

    impl ReadNorFlash for Faulty {
        const READ_SIZE: usize = MockFlash::READ_SIZE;

        async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Fault> {
            self.inner.read(offset, bytes).await.map_err(Fault::Flash)
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }
    }

    impl NorFlash for Faulty {
        const WRITE_SIZE: usize = MockFlash::WRITE_SIZE;
        const ERASE_SIZE: usize = MockFlash::ERASE_SIZE;

        async fn erase(&mut self, from: u32, to: u32) -> Result<(), Fault> {
            if self.fail_erase {
                return Err(Fault::Injected);
            }
            self.inner.erase(from, to).await.map_err(Fault::Flash)
        }

        async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Fault> {
            if self.fail_writes {
                return Err(Fault::Injected);
            }
            self.inner.write(offset, bytes).await.map_err(Fault::Flash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{self, Faulty};
    use super::*;
    use embassy_futures::block_on;
    use serde::Deserialize;

    const VERSION: u8 = 3;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: [u8; 6],
    }

    fn sample(a: u32) -> Sample {
        Sample {
            a,
            b: [a as u8; 6],
        }
    }

    fn cell() -> Persisted<Sample> {
        Persisted::new(0, VERSION)
    }

    fn reload<F: NorFlash>(flash: &mut F) -> (LoadOutcome, Option<Sample>) {
        let mut c = cell();
        let outcome = block_on(c.load(flash));
        (outcome, c.get().copied())
    }

    fn write_raw(flash: &mut mock::MockFlash, item: &[u8]) {
        let mut buf = [0u8; SCRATCH_SIZE];
        block_on(map::store_item::<u8, &[u8], _>(
            flash,
            0..REGION_SIZE,
            &mut NoCache::new(),
            &mut buf,
            &RECORD_KEY,
            &item,
        ))
        .unwrap();
    }

    #[test]
    fn empty_flash_has_no_record() {
        let mut flash = mock::flash();
        assert_eq!(reload(&mut flash), (LoadOutcome::Empty, None));
    }

    #[test]
    fn persisted_roundtrip_and_dirty_tracking() {
        let mut flash = mock::flash();
        let mut c = cell();
        assert!(!c.is_dirty());
        c.set(sample(7));
        assert!(c.is_dirty());
        block_on(c.flush(&mut flash)).unwrap();
        assert!(!c.is_dirty());

        c.set(sample(7));
        assert!(!c.is_dirty());

        assert_eq!(reload(&mut flash), (LoadOutcome::Loaded, Some(sample(7))));
    }

    #[test]
    fn newest_value_wins_across_page_reuse() {
        let mut flash = mock::flash();
        let mut c = cell();
        for a in 0..400 {
            c.set(sample(a));
            block_on(c.flush(&mut flash)).unwrap();
        }
        assert_eq!(reload(&mut flash).1, Some(sample(399)));
    }

    #[test]
    fn neighbouring_regions_are_independent() {
        let mut flash = mock::flash();
        let mut a = cell();
        let mut b = Persisted::<Sample>::new(REGION_SIZE, VERSION);
        a.set(sample(1));
        b.set(sample(2));
        block_on(a.flush(&mut flash)).unwrap();
        block_on(b.flush(&mut flash)).unwrap();

        let mut b2 = Persisted::<Sample>::new(REGION_SIZE, VERSION);
        block_on(b2.load(&mut flash));
        assert_eq!(b2.get(), Some(&sample(2)));
        assert_eq!(reload(&mut flash).1, Some(sample(1)));
    }

    #[test]
    fn tombstone_hides_record() {
        let mut flash = mock::flash();
        let mut c = cell();
        c.set(sample(1));
        block_on(c.flush(&mut flash)).unwrap();
        c.clear();
        block_on(c.flush(&mut flash)).unwrap();
        assert_eq!(reload(&mut flash), (LoadOutcome::Empty, None));
    }

    #[test]
    fn persisted_version_mismatch_is_discarded() {
        let mut flash = mock::flash();
        let mut payload = [0u8; 32];
        let encoded = postcard::to_slice(&sample(5), &mut payload).unwrap();
        let mut item = std::vec![VERSION + 1];
        item.extend_from_slice(encoded);
        write_raw(&mut flash, &item);

        let mut c = cell();
        assert_eq!(block_on(c.load(&mut flash)), LoadOutcome::Discarded);
        assert!(c.get().is_none());
        assert!(c.is_dirty());

        // The next flush replaces the stale record with a tombstone.
        block_on(c.flush(&mut flash)).unwrap();
        assert_eq!(reload(&mut flash), (LoadOutcome::Empty, None));
    }

    #[test]
    fn persisted_undecodable_payload_is_discarded() {
        let mut flash = mock::flash();
        write_raw(&mut flash, &[VERSION, 0x01]);
        assert_eq!(reload(&mut flash), (LoadOutcome::Discarded, None));
    }

    #[test]
    fn oversize_value_rejected() {
        let mut flash = mock::flash();
        let mut c = Persisted::<heapless::Vec<u8, 600>>::new(0, VERSION);
        let mut big = heapless::Vec::new();
        big.resize(600, 0xAA).unwrap();
        c.set(big);
        assert_eq!(block_on(c.flush(&mut flash)), Err(StorageError::TooLarge));
        assert!(c.is_dirty());
    }

    /// Cut power after every possible number of programmed bytes while
    /// replacing `before` with `after`. The value read back after the
    /// reboot is always one of the two.
    fn power_cut_sweep(before: Option<Sample>, after: Sample) {
        for cut in 0u32.. {
            assert!(cut < 20_000, "write never completed");
            let mut flash = mock::flash();
            let mut c = cell();
            if let Some(v) = before {
                c.set(v);
                block_on(c.flush(&mut flash)).unwrap();
            }

            c.set(after);
            flash.bytes_until_shutoff = Some(cut);
            let completed = block_on(c.flush(&mut flash)).is_ok();
            flash.bytes_until_shutoff = None;

            let (_, seen) = reload(&mut flash);
            if completed {
                assert_eq!(seen, Some(after), "cut after {} bytes", cut);
                return;
            }
            assert!(
                seen == before || seen == Some(after),
                "cut after {} bytes exposed {:?}",
                cut,
                seen
            );
        }
    }

    #[test]
    fn power_cut_never_exposes_partial_record() {
        power_cut_sweep(None, sample(1));
        power_cut_sweep(Some(sample(1)), sample(2));
    }

    #[test]
    fn power_cut_after_pages_have_been_recycled() {
        const HISTORY: u32 = 300;
        for cut in [0u32, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144] {
            let mut flash = mock::flash();
            let mut c = cell();
            for a in 0..HISTORY {
                c.set(sample(a));
                block_on(c.flush(&mut flash)).unwrap();
            }
            c.set(sample(9_999));
            flash.bytes_until_shutoff = Some(cut);
            let completed = block_on(c.flush(&mut flash)).is_ok();
            flash.bytes_until_shutoff = None;

            let seen = reload(&mut flash).1;
            if completed {
                assert_eq!(seen, Some(sample(9_999)));
            } else {
                assert!(
                    seen == Some(sample(HISTORY - 1)) || seen == Some(sample(9_999)),
                    "cut after {} bytes exposed {:?}",
                    cut,
                    seen
                );
            }
        }
    }

    #[test]
    fn failed_tombstone_erases_region() {
        let mut flash = Faulty::new();
        let mut c = cell();
        c.set(sample(4));
        block_on(c.flush(&mut flash)).unwrap();

        flash.fail_writes = true;
        c.clear();
        block_on(c.flush(&mut flash)).unwrap();
        assert!(!c.is_dirty());

        flash.fail_writes = false;
        assert_eq!(reload(&mut flash), (LoadOutcome::Empty, None));
    }

    #[test]
    fn failed_tombstone_and_erase_is_unrecoverable() {
        let mut flash = Faulty::dead();
        let mut c = cell();
        c.clear();
        assert_eq!(
            block_on(c.flush(&mut flash)),
            Err(StorageError::Unrecoverable)
        );
        assert!(c.is_dirty());
    }
}
