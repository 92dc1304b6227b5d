//! Pool-index sequence tags.
//!
//! A tag is carried through the substrate's opaque correlation field
//! (remote key / immediate value) and echoed back with the aggregated
//! result. Layout, least significant bit first:
//!
//! ```text
//!  bit 0      parity: flips each time the slot posts a new chunk
//!  bits 1..   pool index in packet units = slot base * packets_per_message
//!             (+ packet offset within the message, ignored on decode)
//! ```
//!
//! Both ends only have to agree on this packing.

/// Encoded pool index plus parity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SequenceTag(u32);

const PARITY_MASK: u32 = 1;

impl SequenceTag {
    /// Initial tag for a slot whose global position is `pool_base`.
    ///
    /// Parity starts at 1 so the flip before the first post yields parity 0.
    pub const fn for_slot(pool_base: u32, packets_per_message: u32) -> Self {
        Self(((pool_base * packets_per_message) << 1) | PARITY_MASK)
    }

    /// Wrap a raw value read back from the substrate.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Parity bit (0 or 1).
    pub const fn parity(self) -> u32 {
        self.0 & PARITY_MASK
    }

    /// Flip the parity bit in place.
    pub fn flip(&mut self) {
        self.0 ^= PARITY_MASK;
    }

    /// Pool index in packet units, without the parity bit.
    pub const fn pool_index(self) -> u32 {
        self.0 >> 1
    }

    /// Message-sized pool index (the slot's global position).
    pub const fn message_index(self, packets_per_message: u32) -> u32 {
        self.pool_index() / packets_per_message
    }

    /// True if `other` names the same slot, regardless of parity.
    pub const fn same_slot(self, other: SequenceTag, packets_per_message: u32) -> bool {
        self.message_index(packets_per_message) == other.message_index(packets_per_message)
    }

    /// True if `received` acknowledges the chunk this tag was posted with:
    /// same slot and same parity. A response for the chunk previously
    /// occupying the slot carries the opposite parity and is stale.
    pub const fn is_current(self, received: SequenceTag, packets_per_message: u32) -> bool {
        self.same_slot(received, packets_per_message) && self.parity() == received.parity()
    }
}

impl std::fmt::Display for SequenceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}/p{}", self.pool_index(), self.parity())
    }
}
