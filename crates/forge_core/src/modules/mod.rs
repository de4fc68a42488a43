//! Per-tile resource modules.
//!
//! A module is a fixed-size table indexed by a dense content id, plus a
//! running total that is maintained incrementally on every mutation.
//! Capacity is *not* enforced here; producers and consume contracts
//! check capacity before adding.
//!
//! # Binary format
//!
//! All modules share the same little-endian framing, used for save files
//! and network snapshots:
//!
//! ```text
//! i32  module id
//! u8   number of nonzero entries
//! [u8 resource id, amount]*   (amount: i32 for items, i64 fixed bits for liquids)
//! ```

mod items;
mod liquids;
mod power;

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

pub use items::ItemModule;
pub use liquids::LiquidModule;
pub use power::PowerModule;

static NEXT_MODULE_ID: AtomicI32 = AtomicI32::new(0);

/// Process-unique module identifier.
///
/// Disambiguates modules inside save and network streams. Reading a module
/// replaces its id with the one stored in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub i32);

impl ModuleId {
    /// Allocate the next unused id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

fn map_read_error(err: io::Error) -> GameError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        GameError::Corruption("module stream truncated".into())
    } else {
        GameError::Io(err)
    }
}

pub(crate) fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(map_read_error)?;
    Ok(buf[0])
}

pub(crate) fn read_i32(reader: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_read_error)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_i64(reader: &mut impl Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(map_read_error)?;
    Ok(i64::from_le_bytes(buf))
}

pub(crate) fn write_u8(writer: &mut impl Write, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub(crate) fn write_i32(writer: &mut impl Write, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_i64(writer: &mut impl Write, value: i64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Convert an entry count to the single header byte.
pub(crate) fn entry_count(count: usize) -> Result<u8> {
    u8::try_from(count).map_err(|_| {
        GameError::InvariantViolation(format!("{count} nonzero entries do not fit the header byte"))
    })
}
