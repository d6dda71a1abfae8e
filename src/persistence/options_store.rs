use super::medium::{PersistentMedium, StorageError};
use super::{
    record_checksum, stored_checksum, GamepadOptions, SocdMode, OPTIONS_RECORD_SIZE,
};
use tracing::{debug, info, warn};

/// Offset of the options record on the medium
pub const GAMEPAD_STORAGE_INDEX: usize = 0;

/// Checksum-guarded holder of [`GamepadOptions`] in one reserved slot
pub struct OptionsStore<M: PersistentMedium> {
    medium: M,
    slot: usize,
    default_socd: SocdMode,
}

impl<M: PersistentMedium> OptionsStore<M> {
    /// Reserves `slot` on `medium` for the options record.
    ///
    /// `default_socd` is the SOCD mode written when the record has to be
    /// rebuilt from defaults.
    pub fn new(medium: M, slot: usize, default_socd: SocdMode) -> Result<Self, StorageError> {
        let capacity = medium.capacity();
        if slot.checked_add(OPTIONS_RECORD_SIZE).map_or(true, |end| end > capacity) {
            return Err(StorageError::OutOfBounds {
                offset: slot,
                len: OPTIONS_RECORD_SIZE,
                capacity,
            });
        }

        debug!(
            "Options store reserved {} bytes at offset {} (default SOCD {:?})",
            OPTIONS_RECORD_SIZE, slot, default_socd
        );
        Ok(Self {
            medium,
            slot,
            default_socd,
        })
    }

    /// Factory options for this store, not yet signed
    pub fn defaults(&self) -> GamepadOptions {
        GamepadOptions::defaults(self.default_socd)
    }

    /// Reads and validates the record.
    ///
    /// A record whose checksum does not match, or whose fields do not parse,
    /// is replaced by the defaults, which are written back before returning.
    /// A valid record is returned without touching the medium.
    pub fn load(&mut self) -> Result<GamepadOptions, StorageError> {
        let mut record = [0u8; OPTIONS_RECORD_SIZE];
        self.medium.read(self.slot, &mut record)?;

        let last_crc = stored_checksum(&record);
        let computed = record_checksum(&record);

        if computed == last_crc {
            match GamepadOptions::from_record(&record) {
                Ok(options) => {
                    debug!("Loaded gamepad options: {}", options);
                    return Ok(options);
                }
                Err(e) => warn!("Options record has a valid checksum but {}", e),
            }
        } else {
            warn!(
                "Options checksum mismatch (stored {:#010x}, computed {:#010x}), restoring defaults",
                last_crc, computed
            );
        }

        let defaults = self.defaults();
        self.save(defaults)?;
        Ok(defaults.signed())
    }

    /// Signs `options`, writes them to the slot and commits the medium
    pub fn save(&mut self, options: GamepadOptions) -> Result<(), StorageError> {
        let options = options.signed();
        self.medium.write(self.slot, &options.to_record())?;
        self.medium.commit()?;
        info!("Saved gamepad options: {}", options);
        Ok(())
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn into_medium(self) -> M {
        self.medium
    }
}
