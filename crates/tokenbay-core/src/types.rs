use crate::constants::{
    DEFAULT_MANUFACTURER_ID, DEFAULT_SLOT_DESCRIPTION, MANUFACTURER_ID_LEN, SLOT_DESCRIPTION_LEN,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal of a physical reader, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReaderId(usize);

impl ReaderId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the reader in the card table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for ReaderId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Identifier of a virtual slot as seen by clients.
///
/// Clients may cache a slot id across calls; the id is only an index into the
/// fixed slot pool and is range-checked on every lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(usize);

impl SlotId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Principal authenticated on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// Security officer.
    SecurityOfficer,

    /// Normal user.
    User,

    /// Re-authentication for a single operation.
    ContextSpecific,
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SecurityOfficer => "SO",
            Self::User => "User",
            Self::ContextSpecific => "ContextSpecific",
        };
        write!(f, "{name}")
    }
}

/// Two-part version number reported for slot hardware and firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Capability flags of a virtual slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFlags {
    /// A token is present in the slot.
    pub token_present: bool,

    /// The token can be removed from the slot.
    pub removable_device: bool,

    /// The slot is backed by a hardware reader.
    pub hardware_slot: bool,
}

impl Default for SlotFlags {
    fn default() -> Self {
        Self {
            token_present: false,
            removable_device: true,
            hardware_slot: true,
        }
    }
}

/// Presentation metadata of a virtual slot.
///
/// The default value is the "no token" state every slot returns to when it is
/// freed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    description: String,
    manufacturer_id: String,
    pub flags: SlotFlags,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl Default for SlotInfo {
    fn default() -> Self {
        Self {
            description: DEFAULT_SLOT_DESCRIPTION.to_string(),
            manufacturer_id: DEFAULT_MANUFACTURER_ID.to_string(),
            flags: SlotFlags::default(),
            hardware_version: Version::default(),
            firmware_version: Version::default(),
        }
    }
}

impl SlotInfo {
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn manufacturer_id(&self) -> &str {
        &self.manufacturer_id
    }

    /// Set the description, truncated to [`SLOT_DESCRIPTION_LEN`] bytes.
    pub fn set_description(&mut self, description: &str) {
        self.description = truncate_utf8(description, SLOT_DESCRIPTION_LEN).to_string();
    }

    /// Set the manufacturer, truncated to [`MANUFACTURER_ID_LEN`] bytes.
    pub fn set_manufacturer_id(&mut self, manufacturer_id: &str) {
        self.manufacturer_id = truncate_utf8(manufacturer_id, MANUFACTURER_ID_LEN).to_string();
    }

    /// Description as a blank-padded fixed-width field.
    #[must_use]
    pub fn padded_description(&self) -> String {
        format!("{:<width$}", self.description, width = SLOT_DESCRIPTION_LEN)
    }

    /// Manufacturer as a blank-padded fixed-width field.
    #[must_use]
    pub fn padded_manufacturer_id(&self) -> String {
        format!("{:<width$}", self.manufacturer_id, width = MANUFACTURER_ID_LEN)
    }

    #[must_use]
    pub fn is_token_present(&self) -> bool {
        self.flags.token_present
    }
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
