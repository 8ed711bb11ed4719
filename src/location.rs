//! Virtual register locations and the interned location catalog.
//!
//! At each safepoint the compiler records, for every live source virtual
//! register, where its value currently resides: a machine register, a stack
//! slot, or a constant that was folded away. The set of distinct locations
//! across a whole method is tiny compared to the total number of live-slot
//! records, so locations are interned into a catalog and the per-safepoint
//! maps store small catalog indices instead.
//!
//! # Catalog entry encoding
//!
//! Entries are byte-oriented and variable length:
//!
//! ```text
//! short (1 byte):  [ value:5 | tag:3 ]   value fits in 5 bits
//! large (5 bytes): [ tag:3 ] [ value:i32 LE ]
//! ```
//!
//! Register kinds always encode short (machine registers are numbered below
//! 32). Constants and stack slots fall back to a large form when the value
//! does not fit; stack offsets are 4-byte slot aligned, so the short form
//! stores `offset / 4`.

use rustc_hash::FxHashMap;

use crate::bits::minimum_bits_to_store;

// =============================================================================
// VRegLocation
// =============================================================================

/// Bytes per stack slot; short-form stack offsets are stored in slot units.
const FRAME_SLOT_BYTES: i32 = 4;

const TAG_IN_REGISTER: u8 = 0;
const TAG_IN_REGISTER_HIGH: u8 = 1;
const TAG_IN_FPU_REGISTER: u8 = 2;
const TAG_IN_FPU_REGISTER_HIGH: u8 = 3;
const TAG_CONSTANT: u8 = 4;
const TAG_IN_STACK: u8 = 5;
const TAG_IN_STACK_LARGE: u8 = 6;
const TAG_CONSTANT_LARGE: u8 = 7;

const SHORT_VALUE_MAX: i32 = 31;
const SHORT_ENTRY_SIZE: usize = 1;
const LARGE_ENTRY_SIZE: usize = 5;

/// Where a source virtual register lives at a safepoint.
///
/// `None` marks a dead slot. Dead slots never enter the catalog; they only
/// advance the per-frame register cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VRegLocation {
    /// Dead; the register holds no recoverable value here.
    None,
    /// Low word in a general purpose register.
    InRegister(u8),
    /// High word of a wide value in a general purpose register.
    InRegisterHigh(u8),
    /// Low word in a floating point register.
    InFpuRegister(u8),
    /// High word of a wide value in a floating point register.
    InFpuRegisterHigh(u8),
    /// Constant-folded value.
    Constant(i32),
    /// Byte offset of a stack slot in the current frame.
    InStack(i32),
}

impl VRegLocation {
    /// Whether this is the dead-slot marker.
    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self, VRegLocation::None)
    }

    /// Tag and raw value, for hashing map contents. Not defined for `None`.
    pub(crate) fn hash_parts(self) -> (u32, u32) {
        let (tag, value) = match self {
            VRegLocation::None => unreachable!("dead locations are never hashed"),
            VRegLocation::InRegister(r) => (TAG_IN_REGISTER, r as i32),
            VRegLocation::InRegisterHigh(r) => (TAG_IN_REGISTER_HIGH, r as i32),
            VRegLocation::InFpuRegister(r) => (TAG_IN_FPU_REGISTER, r as i32),
            VRegLocation::InFpuRegisterHigh(r) => (TAG_IN_FPU_REGISTER_HIGH, r as i32),
            VRegLocation::Constant(c) => (TAG_CONSTANT, c),
            VRegLocation::InStack(off) => (TAG_IN_STACK, off),
        };
        (tag as u32, value as u32)
    }

    /// Short-form `(tag, 5-bit value)` when this location fits one byte.
    fn short_form(self) -> Option<(u8, u8)> {
        match self {
            VRegLocation::None => unreachable!("dead locations are never encoded"),
            VRegLocation::InRegister(r) => Some((TAG_IN_REGISTER, r)),
            VRegLocation::InRegisterHigh(r) => Some((TAG_IN_REGISTER_HIGH, r)),
            VRegLocation::InFpuRegister(r) => Some((TAG_IN_FPU_REGISTER, r)),
            VRegLocation::InFpuRegisterHigh(r) => Some((TAG_IN_FPU_REGISTER_HIGH, r)),
            VRegLocation::Constant(c) if (0..=SHORT_VALUE_MAX).contains(&c) => {
                Some((TAG_CONSTANT, c as u8))
            }
            VRegLocation::InStack(off)
                if off >= 0
                    && off % FRAME_SLOT_BYTES == 0
                    && off / FRAME_SLOT_BYTES <= SHORT_VALUE_MAX =>
            {
                Some((TAG_IN_STACK, (off / FRAME_SLOT_BYTES) as u8))
            }
            VRegLocation::Constant(_) | VRegLocation::InStack(_) => None,
        }
    }

    /// Serialized size of this catalog entry in bytes.
    pub(crate) fn encoded_size(self) -> usize {
        if self.short_form().is_some() {
            SHORT_ENTRY_SIZE
        } else {
            LARGE_ENTRY_SIZE
        }
    }

    /// Encode into the front of `out`, returning the bytes written.
    pub(crate) fn encode_into(self, out: &mut [u8]) -> usize {
        if let Some((tag, value)) = self.short_form() {
            debug_assert!(value <= SHORT_VALUE_MAX as u8);
            out[0] = tag | (value << 3);
            return SHORT_ENTRY_SIZE;
        }
        let (tag, value) = match self {
            VRegLocation::Constant(c) => (TAG_CONSTANT_LARGE, c),
            VRegLocation::InStack(off) => (TAG_IN_STACK_LARGE, off),
            _ => unreachable!("only constants and stack slots have a large form"),
        };
        out[0] = tag;
        out[1..LARGE_ENTRY_SIZE].copy_from_slice(&value.to_le_bytes());
        LARGE_ENTRY_SIZE
    }

    /// Decode one entry from the front of `bytes`, returning it and its size.
    ///
    /// Large tags fold back to their short kinds, so the decoded location
    /// compares equal to whatever was interned.
    pub(crate) fn decode_from(bytes: &[u8]) -> (VRegLocation, usize) {
        let tag = bytes[0] & 0x7;
        let small = (bytes[0] >> 3) as i32;
        match tag {
            TAG_IN_REGISTER => (VRegLocation::InRegister(small as u8), SHORT_ENTRY_SIZE),
            TAG_IN_REGISTER_HIGH => (VRegLocation::InRegisterHigh(small as u8), SHORT_ENTRY_SIZE),
            TAG_IN_FPU_REGISTER => (VRegLocation::InFpuRegister(small as u8), SHORT_ENTRY_SIZE),
            TAG_IN_FPU_REGISTER_HIGH => {
                (VRegLocation::InFpuRegisterHigh(small as u8), SHORT_ENTRY_SIZE)
            }
            TAG_CONSTANT => (VRegLocation::Constant(small), SHORT_ENTRY_SIZE),
            TAG_IN_STACK => (VRegLocation::InStack(small * FRAME_SLOT_BYTES), SHORT_ENTRY_SIZE),
            TAG_IN_STACK_LARGE | TAG_CONSTANT_LARGE => {
                let value = i32::from_le_bytes(bytes[1..LARGE_ENTRY_SIZE].try_into().unwrap());
                let location = if tag == TAG_IN_STACK_LARGE {
                    VRegLocation::InStack(value)
                } else {
                    VRegLocation::Constant(value)
                };
                (location, LARGE_ENTRY_SIZE)
            }
            _ => unreachable!("3-bit tag"),
        }
    }
}

// =============================================================================
// MethodRef
// =============================================================================

/// Reference to the method an inlined frame belongs to.
///
/// Methods resident in the outer method table are referenced by index;
/// methods that only exist at runtime (for example intrinsics materialized
/// by the JIT) are referenced by a pointer-identity handle. The serialized
/// form carries an explicit one-bit tag, so either variant round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRef {
    /// Index into the outer code unit's method table.
    Index(u32),
    /// Pointer-identity handle of a runtime-resident method.
    Handle(u64),
}

impl MethodRef {
    #[inline]
    pub(crate) fn is_handle(self) -> bool {
        matches!(self, MethodRef::Handle(_))
    }

    #[inline]
    pub(crate) fn payload(self) -> u64 {
        match self {
            MethodRef::Index(index) => index as u64,
            MethodRef::Handle(handle) => handle,
        }
    }
}

// =============================================================================
// LocationCatalog
// =============================================================================

/// Interned table of distinct locations, in first-seen order.
///
/// Indices are stable for the lifetime of the builder: index `i` always
/// refers to the i-th distinct location ever interned.
#[derive(Debug, Default)]
pub struct LocationCatalog {
    entries: Vec<VRegLocation>,
    index_map: FxHashMap<VRegLocation, u32>,
}

impl LocationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a location, returning its stable catalog index.
    pub fn intern(&mut self, location: VRegLocation) -> u32 {
        debug_assert!(!location.is_none(), "dead locations are never interned");
        if let Some(&index) = self.index_map.get(&location) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.entries.push(location);
        self.index_map.insert(location, index);
        index
    }

    /// Number of distinct locations interned.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an interned location by index.
    #[inline]
    pub fn get(&self, index: u32) -> VRegLocation {
        self.entries[index as usize]
    }

    /// Serialized size of the whole catalog in bytes.
    pub fn encoded_size(&self) -> usize {
        self.entries.iter().map(|e| e.encoded_size()).sum()
    }

    /// Bits needed to store any catalog index.
    ///
    /// A single-entry catalog needs zero bits: every live register can only
    /// refer to entry 0.
    #[inline]
    pub fn bits_per_index(&self) -> u32 {
        minimum_bits_to_store(self.entries.len().saturating_sub(1) as u64)
    }

    /// Write every entry back to back into `out`, which must be exactly
    /// [`encoded_size`](Self::encoded_size) bytes.
    pub(crate) fn write_into(&self, out: &mut [u8]) {
        let mut cursor = 0;
        for entry in &self.entries {
            cursor += entry.encode_into(&mut out[cursor..]);
        }
        debug_assert_eq!(cursor, out.len(), "catalog region size mismatch");
    }
}

// =============================================================================
// Tests
// =============================================================================
