//! Random-access decoder for serialized stack map tables.
//!
//! A [`CodeInfo`] wraps a region produced by
//! [`StackMapStream::fill_in`](crate::StackMapStream::fill_in) and
//! addresses every sub-table through the self-describing header alone. The
//! runtime uses it on the GC and deoptimization paths; the builder uses it
//! in debug builds to prove the freshly written region round-trips every
//! input.
//!
//! Decoding allocates nothing: views are plain field bundles read out of
//! the bit-packed rows.

use crate::bits::{bits_to_bytes, load_bit, load_bits, minimum_bits_to_store};
use crate::encoding::CodeInfoHeader;
use crate::isa::{CodeOffset, InstructionSet};
use crate::location::{MethodRef, VRegLocation};

// =============================================================================
// CodeInfo
// =============================================================================

/// Decoder over one method's serialized stack map table.
#[derive(Debug)]
pub struct CodeInfo<'a> {
    region: &'a [u8],
    header: CodeInfoHeader,
}

impl<'a> CodeInfo<'a> {
    /// Wrap a serialized region, parsing its header.
    pub fn new(region: &'a [u8]) -> Self {
        let header = CodeInfoHeader::parse(region);
        debug_assert!(region.len() >= header.total_size(), "truncated region");
        Self { region, header }
    }

    /// The parsed table header.
    #[inline]
    pub fn header(&self) -> &CodeInfoHeader {
        &self.header
    }

    #[inline]
    pub fn num_stack_maps(&self) -> u32 {
        self.header.num_stack_maps
    }

    #[inline]
    pub fn num_catalog_entries(&self) -> u32 {
        self.header.catalog_num_entries
    }

    /// Common width of every stored stack mask, in bits.
    #[inline]
    pub fn num_stack_mask_bits(&self) -> u32 {
        self.header.stack_mask_bits
    }

    /// Decode the stack map at `index`.
    pub fn stack_map_at(&self, index: u32) -> StackMapView {
        assert!(index < self.header.num_stack_maps, "stack map index out of range");
        let layout = &self.header.stack_map;
        let row = self.header.stack_maps_byte_offset as usize * 8
            + index as usize * layout.row_bits() as usize;

        let vreg_raw = layout.vreg_map_offset.load(self.region, row);
        let vreg_map_offset = (layout.vreg_map_offset.num_bits() > 0
            && vreg_raw != layout.vreg_map_offset.sentinel())
        .then(|| vreg_raw as u32);
        let inline_raw = layout.inline_index.load(self.region, row);
        let inline_index = (layout.inline_index.num_bits() > 0
            && inline_raw != layout.inline_index.sentinel())
        .then(|| inline_raw as u32);

        StackMapView {
            index,
            bc_pc: layout.bc_pc.load(self.region, row) as u32,
            native_pc: CodeOffset::from_compressed(layout.native_pc.load(self.region, row) as u32),
            vreg_map_offset,
            inline_index,
            register_mask_index: layout.register_mask_index.load(self.region, row) as u32,
            stack_mask_index: layout.stack_mask_index.load(self.region, row) as u32,
        }
    }

    /// First stack map whose native PC offset equals `native_pc_offset`.
    pub fn stack_map_for_native_pc(
        &self,
        native_pc_offset: u32,
        isa: InstructionSet,
    ) -> Option<StackMapView> {
        (0..self.num_stack_maps())
            .map(|i| self.stack_map_at(i))
            .find(|map| map.native_pc_offset(isa) == native_pc_offset)
    }

    /// First stack map recorded for the given bytecode PC.
    pub fn stack_map_for_bc_pc(&self, bc_pc: u32) -> Option<StackMapView> {
        (0..self.num_stack_maps())
            .map(|i| self.stack_map_at(i))
            .find(|map| map.bc_pc() == bc_pc)
    }

    /// Deduped register mask at `index`.
    pub fn register_mask_at(&self, index: u32) -> u32 {
        assert!(
            index < self.header.num_register_mask_entries,
            "register mask index out of range"
        );
        let base = self.header.register_masks_byte_offset as usize * 8;
        load_bits(
            self.region,
            base + index as usize * self.header.register_mask_bits as usize,
            self.header.register_mask_bits,
        ) as u32
    }

    /// Register mask of a stack map, through its dedup index.
    #[inline]
    pub fn register_mask_of(&self, map: &StackMapView) -> u32 {
        self.register_mask_at(map.register_mask_index)
    }

    /// One bit of a stack map's stack mask; `bit` indexes stack slots.
    pub fn stack_mask_bit(&self, map: &StackMapView, bit: u32) -> bool {
        assert!(bit < self.header.stack_mask_bits, "stack mask bit out of range");
        let base = self.header.stack_masks_byte_offset as usize * 8;
        load_bit(
            self.region,
            base + map.stack_mask_index as usize * self.header.stack_mask_bits as usize
                + bit as usize,
        )
    }

    /// Decode the catalog location at `index`.
    ///
    /// Catalog entries are variable length, so this walks from the region
    /// start; the catalog is small by construction.
    pub fn location_at(&self, index: u32) -> VRegLocation {
        assert!(index < self.header.catalog_num_entries, "catalog index out of range");
        let start = self.header.catalog_byte_offset as usize;
        let mut cursor = start;
        let mut remaining = index;
        loop {
            let (location, size) = VRegLocation::decode_from(&self.region[cursor..]);
            if remaining == 0 {
                return location;
            }
            remaining -= 1;
            cursor += size;
            debug_assert!(cursor < start + self.header.catalog_num_bytes as usize);
        }
    }

    /// The outer vreg map of a stack map, if it has live registers.
    pub fn vreg_map_of(&self, map: &StackMapView, num_vregs: u16) -> Option<VRegMapView<'a>> {
        self.vreg_map_at(map.vreg_map_offset?, num_vregs)
    }

    /// Inline frame count of a stack map; zero when nothing was inlined.
    pub fn inline_depth_of(&self, map: &StackMapView) -> u32 {
        match map.inline_index {
            None => 0,
            Some(row) => self.header.inline.depth.load(self.region, self.inline_row_base(row)) as u32,
        }
    }

    /// Decode one inline frame of a stack map.
    pub fn inline_frame_at(&self, map: &StackMapView, depth: u32) -> InlineFrameView {
        let first_row = map.inline_index.expect("stack map has no inline info");
        debug_assert!(depth < self.inline_depth_of(map), "inline depth out of range");
        let layout = &self.header.inline;
        let row = self.inline_row_base(first_row + depth);

        let payload = layout.method.load(self.region, row);
        let method = if layout.is_handle.load(self.region, row) != 0 {
            MethodRef::Handle(payload)
        } else {
            MethodRef::Index(payload as u32)
        };
        let vreg_raw = layout.vreg_map_offset.load(self.region, row);
        let vreg_map_offset = (layout.vreg_map_offset.num_bits() > 0
            && vreg_raw != layout.vreg_map_offset.sentinel())
        .then(|| vreg_raw as u32);

        InlineFrameView {
            method,
            bc_pc: layout.bc_pc.load(self.region, row) as u32,
            vreg_map_offset,
        }
    }

    /// The vreg map of one inline frame, if it has live registers.
    pub fn vreg_map_at_depth(
        &self,
        map: &StackMapView,
        depth: u32,
        num_vregs: u16,
    ) -> Option<VRegMapView<'a>> {
        self.vreg_map_at(self.inline_frame_at(map, depth).vreg_map_offset?, num_vregs)
    }

    #[inline]
    fn inline_row_base(&self, row: u32) -> usize {
        self.header.inline_table_byte_offset as usize * 8
            + row as usize * self.header.inline.row_bits() as usize
    }

    fn vreg_map_at(&self, offset: u32, num_vregs: u16) -> Option<VRegMapView<'a>> {
        debug_assert!(num_vregs > 0, "a stored vreg map always covers registers");
        let start = (self.header.vreg_maps_byte_offset + offset) as usize;
        Some(VRegMapView {
            bytes: &self.region[start..],
            num_vregs,
            bits_per_index: minimum_bits_to_store(
                self.header.catalog_num_entries.saturating_sub(1) as u64,
            ),
        })
    }
}

// =============================================================================
// StackMapView
// =============================================================================

/// Decoded fields of one stack map row.
#[derive(Debug, Clone)]
pub struct StackMapView {
    index: u32,
    bc_pc: u32,
    native_pc: CodeOffset,
    vreg_map_offset: Option<u32>,
    inline_index: Option<u32>,
    register_mask_index: u32,
    stack_mask_index: u32,
}

impl StackMapView {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn bc_pc(&self) -> u32 {
        self.bc_pc
    }

    /// The compressed native PC offset as stored.
    #[inline]
    pub fn native_pc(&self) -> CodeOffset {
        self.native_pc
    }

    /// The native PC byte offset under the given instruction set.
    #[inline]
    pub fn native_pc_offset(&self, isa: InstructionSet) -> u32 {
        self.native_pc.offset(isa)
    }

    /// Offset of this map's vreg map within the vreg map region.
    #[inline]
    pub fn vreg_map_offset(&self) -> Option<u32> {
        self.vreg_map_offset
    }

    #[inline]
    pub fn has_vreg_map(&self) -> bool {
        self.vreg_map_offset.is_some()
    }

    /// First row of this map's inline frames in the inline table.
    #[inline]
    pub fn inline_index(&self) -> Option<u32> {
        self.inline_index
    }

    #[inline]
    pub fn has_inline_info(&self) -> bool {
        self.inline_index.is_some()
    }

    #[inline]
    pub fn register_mask_index(&self) -> u32 {
        self.register_mask_index
    }

    #[inline]
    pub fn stack_mask_index(&self) -> u32 {
        self.stack_mask_index
    }
}

// =============================================================================
// InlineFrameView
// =============================================================================

/// Decoded fields of one inline frame row.
#[derive(Debug, Clone)]
pub struct InlineFrameView {
    method: MethodRef,
    bc_pc: u32,
    vreg_map_offset: Option<u32>,
}

impl InlineFrameView {
    #[inline]
    pub fn method(&self) -> MethodRef {
        self.method
    }

    /// Bytecode PC of the inlined call site; [`crate::NO_BC_PC`] when the
    /// frame carries none.
    #[inline]
    pub fn bc_pc(&self) -> u32 {
        self.bc_pc
    }

    #[inline]
    pub fn has_bc_pc(&self) -> bool {
        self.bc_pc != crate::NO_BC_PC
    }

    #[inline]
    pub fn vreg_map_offset(&self) -> Option<u32> {
        self.vreg_map_offset
    }

    #[inline]
    pub fn has_vreg_map(&self) -> bool {
        self.vreg_map_offset.is_some()
    }
}

// =============================================================================
// VRegMapView
// =============================================================================

/// Decoded view of one frame's vreg map: the live bitmask followed by
/// bit-packed catalog indices for the live registers.
#[derive(Debug, Clone)]
pub struct VRegMapView<'a> {
    bytes: &'a [u8],
    num_vregs: u16,
    bits_per_index: u32,
}

impl VRegMapView<'_> {
    #[inline]
    pub fn num_vregs(&self) -> u16 {
        self.num_vregs
    }

    /// Whether the given register is live in this frame.
    #[inline]
    pub fn is_live(&self, reg: u16) -> bool {
        assert!(reg < self.num_vregs, "vreg out of range");
        load_bit(self.bytes, reg as usize)
    }

    /// Number of live registers.
    pub fn live_count(&self) -> u32 {
        (0..self.num_vregs).filter(|&reg| self.is_live(reg)).count() as u32
    }

    /// Location of the given register; `None` when it is dead here.
    pub fn location(&self, info: &CodeInfo<'_>, reg: u16) -> VRegLocation {
        if !self.is_live(reg) {
            return VRegLocation::None;
        }
        let k = (0..reg).filter(|&r| self.is_live(r)).count();
        let indices_base = bits_to_bytes(self.num_vregs as usize) * 8;
        let index = load_bits(
            self.bytes,
            indices_base + k * self.bits_per_index as usize,
            self.bits_per_index,
        ) as u32;
        info.location_at(index)
    }
}
