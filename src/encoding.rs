//! Field layouts and the self-describing table header.
//!
//! Every numeric field in the stack map and inline tables is stored at a
//! per-build bit width chosen from the maximum value the field has to hold.
//! The header records those widths together with the byte offset and size
//! of every sub-table, so a decoder needs nothing but the header to address
//! any row of any table.
//!
//! # Region layout
//!
//! ```text
//! ┌──────────────────────┐ 0
//! │ header               │ fixed HEADER_SIZE bytes
//! ├──────────────────────┤ catalog_byte_offset
//! │ location catalog     │ variable-size entries
//! ├──────────────────────┤ vreg_maps_byte_offset
//! │ vreg maps            │ live mask + packed catalog indices per map
//! ├──────────────────────┤ stack_maps_byte_offset
//! │ stack map rows       │ bit-packed, fixed row width
//! ├──────────────────────┤ inline_table_byte_offset
//! │ inline rows          │ bit-packed, fixed row width
//! ├──────────────────────┤ stack_masks_byte_offset
//! │ stack mask rows      │ bit-packed, stack_mask_bits per row
//! ├──────────────────────┤ register_masks_byte_offset
//! │ register mask rows   │ bit-packed, register_mask_bits per row
//! └──────────────────────┘ total_size
//! ```

use crate::bits::{bits_to_bytes, load_bits, store_bits};

// =============================================================================
// FieldEncoding
// =============================================================================

/// One bit-packed field within a table row: its offset from the row start
/// and its width. A zero-width field loads as 0 and stores nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldEncoding {
    bit_offset: u32,
    num_bits: u32,
}

impl FieldEncoding {
    pub(crate) fn new(bit_offset: u32, num_bits: u32) -> Self {
        Self { bit_offset, num_bits }
    }

    #[inline]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// The all-ones value of this field, reserved as its absent-value marker.
    #[inline]
    pub fn sentinel(&self) -> u64 {
        if self.num_bits == 0 {
            0
        } else {
            u64::MAX >> (64 - self.num_bits)
        }
    }

    #[inline]
    pub(crate) fn load(&self, region: &[u8], row_bit_base: usize) -> u64 {
        load_bits(region, row_bit_base + self.bit_offset as usize, self.num_bits)
    }

    #[inline]
    pub(crate) fn store(&self, region: &mut [u8], row_bit_base: usize, value: u64) {
        store_bits(region, row_bit_base + self.bit_offset as usize, self.num_bits, value);
    }
}

// =============================================================================
// StackMapLayout
// =============================================================================

/// Field layout of one stack map row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackMapLayout {
    pub native_pc: FieldEncoding,
    pub bc_pc: FieldEncoding,
    pub vreg_map_offset: FieldEncoding,
    pub inline_index: FieldEncoding,
    pub register_mask_index: FieldEncoding,
    pub stack_mask_index: FieldEncoding,
}

impl StackMapLayout {
    pub(crate) fn from_widths(
        native_pc_bits: u32,
        bc_pc_bits: u32,
        vreg_map_offset_bits: u32,
        inline_index_bits: u32,
        register_mask_index_bits: u32,
        stack_mask_index_bits: u32,
    ) -> Self {
        let mut bit = 0;
        let mut next = |bits: u32| {
            let field = FieldEncoding::new(bit, bits);
            bit += bits;
            field
        };
        Self {
            native_pc: next(native_pc_bits),
            bc_pc: next(bc_pc_bits),
            vreg_map_offset: next(vreg_map_offset_bits),
            inline_index: next(inline_index_bits),
            register_mask_index: next(register_mask_index_bits),
            stack_mask_index: next(stack_mask_index_bits),
        }
    }

    /// Total bits per row.
    #[inline]
    pub fn row_bits(&self) -> u32 {
        self.native_pc.num_bits
            + self.bc_pc.num_bits
            + self.vreg_map_offset.num_bits
            + self.inline_index.num_bits
            + self.register_mask_index.num_bits
            + self.stack_mask_index.num_bits
    }
}

// =============================================================================
// InlineLayout
// =============================================================================

/// Field layout of one inline frame row.
///
/// The depth field is only meaningful in the first row of a stack map's
/// group of frames; a one-bit tag distinguishes handle method references
/// from method-table indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineLayout {
    pub depth: FieldEncoding,
    pub is_handle: FieldEncoding,
    pub method: FieldEncoding,
    pub bc_pc: FieldEncoding,
    pub vreg_map_offset: FieldEncoding,
}

impl InlineLayout {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_widths(
        depth_bits: u32,
        method_bits: u32,
        bc_pc_bits: u32,
        vreg_map_offset_bits: u32,
    ) -> Self {
        let mut bit = 0;
        let mut next = |bits: u32| {
            let field = FieldEncoding::new(bit, bits);
            bit += bits;
            field
        };
        Self {
            depth: next(depth_bits),
            is_handle: next(1),
            method: next(method_bits),
            bc_pc: next(bc_pc_bits),
            vreg_map_offset: next(vreg_map_offset_bits),
        }
    }

    /// Total bits per row.
    #[inline]
    pub fn row_bits(&self) -> u32 {
        self.depth.num_bits
            + self.is_handle.num_bits
            + self.method.num_bits
            + self.bc_pc.num_bits
            + self.vreg_map_offset.num_bits
    }
}

// =============================================================================
// CodeInfoHeader
// =============================================================================

/// Serialized size of the header in bytes.
pub const HEADER_SIZE: usize = 66;

/// The self-describing descriptor written at the front of every region.
///
/// Byte offsets are absolute from the region start. Field widths are part
/// of the two row layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeInfoHeader {
    pub num_stack_maps: u32,
    pub stack_map: StackMapLayout,
    pub num_inline_rows: u32,
    pub inline: InlineLayout,
    pub catalog_num_entries: u32,
    pub catalog_byte_offset: u32,
    pub catalog_num_bytes: u32,
    pub vreg_maps_byte_offset: u32,
    pub vreg_maps_num_bytes: u32,
    pub stack_maps_byte_offset: u32,
    pub inline_table_byte_offset: u32,
    pub stack_masks_byte_offset: u32,
    pub stack_mask_bits: u32,
    pub num_stack_mask_entries: u32,
    pub register_masks_byte_offset: u32,
    pub register_mask_bits: u32,
    pub num_register_mask_entries: u32,
}

impl CodeInfoHeader {
    /// Bytes of the bit-packed stack map table.
    #[inline]
    pub fn stack_maps_table_bytes(&self) -> usize {
        bits_to_bytes(self.num_stack_maps as usize * self.stack_map.row_bits() as usize)
    }

    /// Bytes of the bit-packed inline frame table.
    #[inline]
    pub fn inline_table_bytes(&self) -> usize {
        bits_to_bytes(self.num_inline_rows as usize * self.inline.row_bits() as usize)
    }

    /// Bytes of the bit-packed stack mask table.
    #[inline]
    pub fn stack_masks_bytes(&self) -> usize {
        bits_to_bytes(self.num_stack_mask_entries as usize * self.stack_mask_bits as usize)
    }

    /// Bytes of the bit-packed register mask table.
    #[inline]
    pub fn register_masks_bytes(&self) -> usize {
        bits_to_bytes(self.num_register_mask_entries as usize * self.register_mask_bits as usize)
    }

    /// Fix every table offset from the sizes recorded so far.
    pub(crate) fn compute_table_offsets(&mut self) {
        self.catalog_byte_offset = HEADER_SIZE as u32;
        self.vreg_maps_byte_offset = self.catalog_byte_offset + self.catalog_num_bytes;
        self.stack_maps_byte_offset = self.vreg_maps_byte_offset + self.vreg_maps_num_bytes;
        self.inline_table_byte_offset =
            self.stack_maps_byte_offset + self.stack_maps_table_bytes() as u32;
        self.stack_masks_byte_offset =
            self.inline_table_byte_offset + self.inline_table_bytes() as u32;
        self.register_masks_byte_offset =
            self.stack_masks_byte_offset + self.stack_masks_bytes() as u32;
    }

    /// Total region size in bytes, header included.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.register_masks_byte_offset as usize + self.register_masks_bytes()
    }

    /// Serialize into the fixed [`HEADER_SIZE`] byte form.
    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        let put_u32 = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_le_bytes());
        let put_u8 = |out: &mut Vec<u8>, v: u32| {
            debug_assert!(v <= u8::MAX as u32);
            out.push(v as u8);
        };

        put_u32(&mut out, self.num_stack_maps);
        put_u8(&mut out, self.stack_map.native_pc.num_bits());
        put_u8(&mut out, self.stack_map.bc_pc.num_bits());
        put_u8(&mut out, self.stack_map.vreg_map_offset.num_bits());
        put_u8(&mut out, self.stack_map.inline_index.num_bits());
        put_u8(&mut out, self.stack_map.register_mask_index.num_bits());
        put_u8(&mut out, self.stack_map.stack_mask_index.num_bits());
        put_u32(&mut out, self.num_inline_rows);
        put_u8(&mut out, self.inline.depth.num_bits());
        put_u8(&mut out, self.inline.method.num_bits());
        put_u8(&mut out, self.inline.bc_pc.num_bits());
        put_u32(&mut out, self.catalog_num_entries);
        put_u32(&mut out, self.catalog_byte_offset);
        put_u32(&mut out, self.catalog_num_bytes);
        put_u32(&mut out, self.vreg_maps_byte_offset);
        put_u32(&mut out, self.vreg_maps_num_bytes);
        put_u32(&mut out, self.stack_maps_byte_offset);
        put_u32(&mut out, self.inline_table_byte_offset);
        put_u32(&mut out, self.stack_masks_byte_offset);
        put_u32(&mut out, self.stack_mask_bits);
        put_u32(&mut out, self.num_stack_mask_entries);
        put_u32(&mut out, self.register_masks_byte_offset);
        put_u32(&mut out, self.num_register_mask_entries);
        put_u8(&mut out, self.register_mask_bits);

        debug_assert_eq!(out.len(), HEADER_SIZE);
        out
    }

    /// Parse the header back from the front of a serialized region.
    pub fn parse(region: &[u8]) -> Self {
        assert!(region.len() >= HEADER_SIZE, "region too small for header");
        let mut cursor = 0usize;
        let get_u32 = |cursor: &mut usize| {
            let v = u32::from_le_bytes(region[*cursor..*cursor + 4].try_into().unwrap());
            *cursor += 4;
            v
        };
        let get_u8 = |cursor: &mut usize| {
            let v = region[*cursor] as u32;
            *cursor += 1;
            v
        };

        let num_stack_maps = get_u32(&mut cursor);
        let native_pc_bits = get_u8(&mut cursor);
        let bc_pc_bits = get_u8(&mut cursor);
        let vreg_map_offset_bits = get_u8(&mut cursor);
        let inline_index_bits = get_u8(&mut cursor);
        let register_mask_index_bits = get_u8(&mut cursor);
        let stack_mask_index_bits = get_u8(&mut cursor);
        let num_inline_rows = get_u32(&mut cursor);
        let depth_bits = get_u8(&mut cursor);
        let method_bits = get_u8(&mut cursor);
        let inline_bc_pc_bits = get_u8(&mut cursor);

        let stack_map = StackMapLayout::from_widths(
            native_pc_bits,
            bc_pc_bits,
            vreg_map_offset_bits,
            inline_index_bits,
            register_mask_index_bits,
            stack_mask_index_bits,
        );
        let inline = if num_inline_rows == 0 {
            InlineLayout::empty()
        } else {
            InlineLayout::from_widths(
                depth_bits,
                method_bits,
                inline_bc_pc_bits,
                vreg_map_offset_bits,
            )
        };

        let mut header = Self {
            num_stack_maps,
            stack_map,
            num_inline_rows,
            inline,
            catalog_num_entries: get_u32(&mut cursor),
            catalog_byte_offset: get_u32(&mut cursor),
            catalog_num_bytes: get_u32(&mut cursor),
            vreg_maps_byte_offset: get_u32(&mut cursor),
            vreg_maps_num_bytes: get_u32(&mut cursor),
            stack_maps_byte_offset: get_u32(&mut cursor),
            inline_table_byte_offset: get_u32(&mut cursor),
            stack_masks_byte_offset: get_u32(&mut cursor),
            stack_mask_bits: get_u32(&mut cursor),
            num_stack_mask_entries: get_u32(&mut cursor),
            register_masks_byte_offset: get_u32(&mut cursor),
            num_register_mask_entries: get_u32(&mut cursor),
            register_mask_bits: 0,
        };
        header.register_mask_bits = get_u8(&mut cursor);
        debug_assert_eq!(cursor, HEADER_SIZE);
        header
    }
}

// =============================================================================
// Tests
// =============================================================================
