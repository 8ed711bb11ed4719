//! Streaming builder for safepoint stack map tables.
//!
//! During code generation the backend reports one entry per safepoint:
//! which machine registers and stack slots hold heap references, the
//! bytecode PC, the native PC offset, and where every live source virtual
//! register currently resides. When a call site was inlined, the same is
//! reported for each inlined frame. The builder accumulates these entries,
//! deduplicates their large repeating substructures, and serializes the
//! whole table into one contiguous byte region that the runtime can
//! random-access by stack map index during GC, deoptimization and
//! exception delivery.
//!
//! # Phases
//!
//! Construction is strictly staged:
//!
//! 1. **Collect** (`begin_stack_map_entry` .. `end_stack_map_entry`):
//!    entries stream in, locations are interned into the catalog, and
//!    identical vreg maps are detected as entries close.
//! 2. **Plan** (`prepare_for_fill_in`): one pass over the collected data
//!    computes every field width from its observed maximum, interns the
//!    stack and register masks, and freezes the header with all table
//!    offsets. Returns the exact region size.
//! 3. **Serialize** (`fill_in`): one pass writes the header and every
//!    table into the caller's region. In debug builds the region is then
//!    read back through the decoder and checked field by field against
//!    the collected input.
//!
//! # Deduplication
//!
//! Three independent layers keep the table small:
//!
//! - distinct vreg locations are interned into the location catalog, so
//!   maps store small indices instead of full locations,
//! - an outer frame whose vreg map is bit-for-bit identical to an earlier
//!   entry's reuses that entry's map offset and the map is stored once,
//! - stack masks and register masks are each interned into their own
//!   table and entries store indices into them.
//!
//! All inputs come from the in-process compiler, so every misuse of the
//! builder is a programmer error and fails hard rather than returning an
//! error value.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::NO_BC_PC;
use crate::bits::{BitVector, bits_to_bytes, load_bit, minimum_bits_to_store, store_bit, store_bits};
use crate::encoding::{CodeInfoHeader, InlineLayout, StackMapLayout, HEADER_SIZE};
use crate::isa::{CodeOffset, InstructionSet};
use crate::location::{LocationCatalog, MethodRef, VRegLocation};

// =============================================================================
// Collected entries
// =============================================================================

/// One safepoint, as collected. Frozen once `end_stack_map_entry` runs.
#[derive(Debug)]
struct StackMapEntry<'a> {
    bc_pc: u32,
    native_pc: CodeOffset,
    register_mask: u32,
    sp_mask: Option<&'a BitVector>,
    num_vregs: u16,
    inlining_depth: u8,
    /// Start of this entry's slice of the global catalog-index sequence.
    locations_start: u32,
    /// Start of this entry's slice of the inline entry sequence.
    inline_start: u32,
    live_mask: Option<BitVector>,
    map_hash: u32,
    /// Earlier entry with a bit-for-bit identical vreg map, if any.
    same_map_as: Option<u32>,
    // Dedup table back-references, assigned during planning.
    register_mask_index: u32,
    stack_mask_index: u32,
}

/// One inlined frame of a safepoint.
#[derive(Debug)]
struct InlineEntry {
    method: MethodRef,
    bc_pc: u32,
    num_vregs: u16,
    locations_start: u32,
    live_mask: Option<BitVector>,
}

#[derive(Debug)]
struct OpenEntry<'a> {
    entry: StackMapEntry<'a>,
    next_vreg: u16,
}

#[derive(Debug)]
struct OpenInline {
    entry: InlineEntry,
    next_vreg: u16,
}

/// Serialized size in bytes of one vreg map, zero when nothing is live.
fn vreg_map_size(bits_per_index: u32, num_vregs: u16, live_mask: Option<&BitVector>) -> usize {
    if num_vregs == 0 {
        return 0;
    }
    let live = live_mask.map_or(0, |m| m.count_set()) as usize;
    if live == 0 {
        return 0;
    }
    bits_to_bytes(num_vregs as usize) + bits_to_bytes(live * bits_per_index as usize)
}

// =============================================================================
// StackMapStream
// =============================================================================

/// Streaming builder and encoder for one compiled method's stack map table.
///
/// Owned by a single compilation; caller-supplied stack masks are borrowed
/// for the builder's lifetime. See the module docs for the phase contract.
pub struct StackMapStream<'a> {
    isa: InstructionSet,
    catalog: LocationCatalog,
    /// Flat sequence of catalog indices, sliced per frame by start + count.
    location_indices: Vec<u32>,
    stack_maps: Vec<StackMapEntry<'a>>,
    inline_infos: Vec<InlineEntry>,
    current: Option<OpenEntry<'a>>,
    current_inline: Option<OpenInline>,
    /// Map hash -> candidate entry indices. The hash is not collision
    /// free, so candidates are compared structurally.
    map_hash_buckets: FxHashMap<u32, SmallVec<[u32; 4]>>,
    stack_mask_max: Option<u32>,
    bc_pc_max: u32,
    register_mask_max: u32,
    num_with_inline_info: u32,
    // Planning products.
    register_masks: Vec<u32>,
    stack_masks: Vec<u8>,
    header: Option<CodeInfoHeader>,
    header_bytes: Vec<u8>,
    filled: bool,
}

impl<'a> StackMapStream<'a> {
    /// Create a builder for code targeting the given instruction set.
    pub fn new(isa: InstructionSet) -> Self {
        Self {
            isa,
            catalog: LocationCatalog::new(),
            location_indices: Vec::new(),
            stack_maps: Vec::new(),
            inline_infos: Vec::new(),
            current: None,
            current_inline: None,
            map_hash_buckets: FxHashMap::default(),
            stack_mask_max: None,
            bc_pc_max: 0,
            register_mask_max: 0,
            num_with_inline_info: 0,
            register_masks: Vec::new(),
            stack_masks: Vec::new(),
            header: None,
            header_bytes: Vec::new(),
            filled: false,
        }
    }

    /// Number of safepoints recorded so far.
    #[inline]
    pub fn num_stack_maps(&self) -> usize {
        self.stack_maps.len()
    }

    /// Number of recorded safepoints that carry inline frames.
    #[inline]
    pub fn num_entries_with_inline_info(&self) -> u32 {
        self.num_with_inline_info
    }

    // -------------------------------------------------------------------------
    // Phase 1: collect
    // -------------------------------------------------------------------------

    /// Open a new safepoint entry.
    ///
    /// `num_vregs` vreg entries must follow before the matching
    /// `end_stack_map_entry`, and exactly `inlining_depth` inline frames.
    pub fn begin_stack_map_entry(
        &mut self,
        bc_pc: u32,
        native_pc_offset: u32,
        register_mask: u32,
        sp_mask: Option<&'a BitVector>,
        num_vregs: u16,
        inlining_depth: u8,
    ) {
        assert!(
            self.current.is_none(),
            "begin_stack_map_entry called while another entry is open"
        );
        assert_ne!(bc_pc, NO_BC_PC, "invalid bc_pc");

        if let Some(mask) = sp_mask {
            if let Some(high) = mask.highest_bit() {
                self.stack_mask_max = Some(self.stack_mask_max.map_or(high, |m| m.max(high)));
            }
        }
        if inlining_depth > 0 {
            self.num_with_inline_info += 1;
        }
        self.bc_pc_max = self.bc_pc_max.max(bc_pc);
        self.register_mask_max = self.register_mask_max.max(register_mask);

        self.current = Some(OpenEntry {
            entry: StackMapEntry {
                bc_pc,
                native_pc: CodeOffset::from_offset(native_pc_offset, self.isa),
                register_mask,
                sp_mask,
                num_vregs,
                inlining_depth,
                locations_start: self.location_indices.len() as u32,
                inline_start: self.inline_infos.len() as u32,
                live_mask: (num_vregs > 0).then(BitVector::new),
                map_hash: 0,
                same_map_as: None,
                register_mask_index: 0,
                stack_mask_index: 0,
            },
            next_vreg: 0,
        });
    }

    /// Record the location of the next vreg of the open frame.
    ///
    /// Targets the open inline frame when one is active, the outer frame
    /// otherwise. `VRegLocation::None` marks a dead slot: it advances the
    /// frame's register cursor without touching the catalog.
    pub fn add_vreg_entry(&mut self, location: VRegLocation) {
        assert!(
            self.current.is_some(),
            "add_vreg_entry called with no open stack map entry"
        );
        let index = if location.is_none() {
            None
        } else {
            let index = self.catalog.intern(location);
            self.location_indices.push(index);
            Some(index)
        };

        if let Some(open) = self.current_inline.as_mut() {
            assert!(
                open.next_vreg < open.entry.num_vregs,
                "more vreg entries than declared for inline frame"
            );
            if index.is_some() {
                open.entry
                    .live_mask
                    .as_mut()
                    .expect("live mask present when num_vregs > 0")
                    .set_bit(open.next_vreg as u32);
            }
            open.next_vreg += 1;
        } else {
            let open = self.current.as_mut().unwrap();
            assert!(
                open.next_vreg < open.entry.num_vregs,
                "more vreg entries than declared"
            );
            if index.is_some() {
                // The entry's map is read back as one contiguous slice of
                // the global index sequence, so inline frames may not have
                // interleaved their own locations yet.
                assert_eq!(
                    self.inline_infos.len() as u32,
                    open.entry.inline_start,
                    "outer vreg entries must be added before inline frames"
                );
                open.entry
                    .live_mask
                    .as_mut()
                    .expect("live mask present when num_vregs > 0")
                    .set_bit(open.next_vreg as u32);
                let (tag, value) = location.hash_parts();
                open.entry.map_hash = open
                    .entry
                    .map_hash
                    .wrapping_add(1u32 << (open.next_vreg % 32))
                    .wrapping_add(value)
                    .wrapping_add(tag);
            }
            open.next_vreg += 1;
        }
    }

    /// Close the open safepoint entry and run vreg map deduplication.
    pub fn end_stack_map_entry(&mut self) {
        assert!(
            self.current_inline.is_none(),
            "end_stack_map_entry called while an inline entry is open"
        );
        let OpenEntry { mut entry, next_vreg } = self
            .current
            .take()
            .expect("end_stack_map_entry called with no open entry");
        assert_eq!(
            next_vreg, entry.num_vregs,
            "vreg entries added does not match the declared count"
        );
        assert_eq!(
            self.inline_infos.len() as u32 - entry.inline_start,
            entry.inlining_depth as u32,
            "inline entries added does not match the declared inlining depth"
        );
        entry.same_map_as = self.find_entry_with_same_map(&entry);
        self.stack_maps.push(entry);
    }

    /// Open an inline frame inside the open safepoint entry.
    pub fn begin_inline_info_entry(&mut self, method: MethodRef, bc_pc: u32, num_vregs: u16) {
        assert!(
            self.current.is_some(),
            "begin_inline_info_entry called with no open stack map entry"
        );
        assert!(self.current_inline.is_none(), "inline entries cannot nest");
        self.current_inline = Some(OpenInline {
            entry: InlineEntry {
                method,
                bc_pc,
                num_vregs,
                locations_start: self.location_indices.len() as u32,
                live_mask: (num_vregs > 0).then(BitVector::new),
            },
            next_vreg: 0,
        });
    }

    /// Close the open inline frame.
    pub fn end_inline_info_entry(&mut self) {
        let OpenInline { entry, next_vreg } = self
            .current_inline
            .take()
            .expect("end_inline_info_entry called with no open inline entry");
        assert_eq!(
            next_vreg, entry.num_vregs,
            "inline vreg entries added does not match the declared count"
        );
        self.inline_infos.push(entry);
    }

    // -------------------------------------------------------------------------
    // Vreg map deduplication
    // -------------------------------------------------------------------------

    /// Find the earliest prior entry whose vreg map is identical.
    ///
    /// The hash buckets hold every prior entry that did not itself hit a
    /// duplicate, so a miss appends the new entry as a future candidate.
    fn find_entry_with_same_map(&mut self, entry: &StackMapEntry<'a>) -> Option<u32> {
        let current_index = self.stack_maps.len() as u32;
        if let Some(bucket) = self.map_hash_buckets.get(&entry.map_hash) {
            for &candidate in bucket {
                if self.have_same_vreg_maps(&self.stack_maps[candidate as usize], entry) {
                    return Some(candidate);
                }
            }
        }
        self.map_hash_buckets
            .entry(entry.map_hash)
            .or_default()
            .push(current_index);
        None
    }

    fn have_same_vreg_maps(&self, a: &StackMapEntry<'a>, b: &StackMapEntry<'a>) -> bool {
        let (a_mask, b_mask) = match (&a.live_mask, &b.live_mask) {
            (None, None) => return true,
            (Some(a_mask), Some(b_mask)) => (a_mask, b_mask),
            _ => return false,
        };
        if a.num_vregs != b.num_vregs || a_mask != b_mask {
            return false;
        }
        let count = a_mask.count_set() as usize;
        let a_start = a.locations_start as usize;
        let b_start = b.locations_start as usize;
        self.location_indices[a_start..a_start + count]
            == self.location_indices[b_start..b_start + count]
    }

    // -------------------------------------------------------------------------
    // Phase 2: plan
    // -------------------------------------------------------------------------

    /// Compute every field width and table offset, freeze the header, and
    /// return the exact byte size `fill_in` requires.
    pub fn prepare_for_fill_in(&mut self) -> usize {
        assert!(
            self.current.is_none() && self.current_inline.is_none(),
            "prepare_for_fill_in called with an open entry"
        );
        assert!(self.header.is_none(), "prepare_for_fill_in may only be called once");

        // Vreg map region: the first occurrence of every distinct outer
        // map plus every inline map.
        let bits_per_index = self.catalog.bits_per_index();
        let mut vreg_maps_num_bytes = 0usize;
        for entry in &self.stack_maps {
            if entry.same_map_as.is_none() {
                vreg_maps_num_bytes +=
                    vreg_map_size(bits_per_index, entry.num_vregs, entry.live_mask.as_ref());
            }
            let start = entry.inline_start as usize;
            for inline in &self.inline_infos[start..start + entry.inlining_depth as usize] {
                vreg_maps_num_bytes +=
                    vreg_map_size(bits_per_index, inline.num_vregs, inline.live_mask.as_ref());
            }
        }

        // Inline row maxima. A frame without a bytecode PC stores the raw
        // no-PC marker, which forces the field to full width and makes the
        // marker round-trip exactly.
        let mut depth_max = 0u64;
        let mut method_max = 0u64;
        let mut inline_bc_pc_max = 0u64;
        for entry in &self.stack_maps {
            depth_max = depth_max.max(entry.inlining_depth as u64);
        }
        for inline in &self.inline_infos {
            method_max = method_max.max(inline.method.payload());
            inline_bc_pc_max = inline_bc_pc_max.max(inline.bc_pc as u64);
        }

        let stack_mask_bits = self.stack_mask_max.map_or(0, |max| max + 1);
        let num_stack_mask_entries = self.prepare_stack_masks(stack_mask_bits);
        let num_register_mask_entries = self.prepare_register_masks();

        let native_pc_max = self
            .stack_maps
            .iter()
            .map(|e| e.native_pc.compressed())
            .max()
            .unwrap_or(0);
        // The all-ones value of the offset and index fields is reserved as
        // the absent-value marker, hence the + 1 under the width.
        let vreg_map_offset_bits = minimum_bits_to_store(1 + vreg_maps_num_bytes as u64);
        let num_inline_rows = self.inline_infos.len() as u32;
        let inline_index_bits = if num_inline_rows == 0 {
            0
        } else {
            minimum_bits_to_store(1 + num_inline_rows as u64)
        };

        let stack_map = StackMapLayout::from_widths(
            minimum_bits_to_store(native_pc_max as u64),
            minimum_bits_to_store(self.bc_pc_max as u64),
            vreg_map_offset_bits,
            inline_index_bits,
            minimum_bits_to_store(num_register_mask_entries.saturating_sub(1) as u64),
            minimum_bits_to_store(num_stack_mask_entries.saturating_sub(1) as u64),
        );
        let inline = if num_inline_rows == 0 {
            InlineLayout::empty()
        } else {
            InlineLayout::from_widths(
                minimum_bits_to_store(depth_max),
                minimum_bits_to_store(method_max),
                minimum_bits_to_store(inline_bc_pc_max),
                vreg_map_offset_bits,
            )
        };

        let mut header = CodeInfoHeader {
            num_stack_maps: self.stack_maps.len() as u32,
            stack_map,
            num_inline_rows,
            inline,
            catalog_num_entries: self.catalog.len() as u32,
            catalog_num_bytes: self.catalog.encoded_size() as u32,
            vreg_maps_num_bytes: vreg_maps_num_bytes as u32,
            stack_mask_bits,
            num_stack_mask_entries,
            register_mask_bits: minimum_bits_to_store(self.register_mask_max as u64),
            num_register_mask_entries,
            ..Default::default()
        };
        header.compute_table_offsets();
        self.header_bytes = header.serialize();
        let needed_size = header.total_size();
        self.header = Some(header);
        needed_size
    }

    /// Intern every entry's stack mask at the common width.
    ///
    /// Masks are kept byte packed in a dense buffer for serialization; the
    /// dedup map owns its key bytes so rehashing cannot invalidate them.
    fn prepare_stack_masks(&mut self, stack_mask_bits: u32) -> u32 {
        let byte_entry_size = bits_to_bytes(stack_mask_bits as usize);
        let mut dedup: FxHashMap<Vec<u8>, u32> = FxHashMap::default();
        self.stack_masks.clear();
        for entry in &mut self.stack_maps {
            let mut bytes = vec![0u8; byte_entry_size];
            if let Some(mask) = entry.sp_mask {
                for bit in mask.iter_set_bits() {
                    debug_assert!(bit < stack_mask_bits);
                    store_bit(&mut bytes, bit as usize, true);
                }
            }
            let next = dedup.len() as u32;
            entry.stack_mask_index = match dedup.entry(bytes) {
                Entry::Occupied(occupied) => *occupied.get(),
                Entry::Vacant(vacant) => {
                    self.stack_masks.extend_from_slice(vacant.key());
                    vacant.insert(next);
                    next
                }
            };
        }
        dedup.len() as u32
    }

    /// Intern every entry's register mask.
    fn prepare_register_masks(&mut self) -> u32 {
        let mut dedup: FxHashMap<u32, u32> = FxHashMap::default();
        self.register_masks.clear();
        for entry in &mut self.stack_maps {
            let next = dedup.len() as u32;
            entry.register_mask_index = match dedup.entry(entry.register_mask) {
                Entry::Occupied(occupied) => *occupied.get(),
                Entry::Vacant(vacant) => {
                    self.register_masks.push(*vacant.key());
                    vacant.insert(next);
                    next
                }
            };
        }
        dedup.len() as u32
    }

    // -------------------------------------------------------------------------
    // Phase 3: serialize
    // -------------------------------------------------------------------------

    /// Write the whole table into `region`, whose length must equal the
    /// value returned by `prepare_for_fill_in`. Writes every byte of the
    /// region, so identical inputs produce byte-identical regions.
    pub fn fill_in(&mut self, region: &mut [u8]) {
        assert!(
            self.current.is_none() && self.current_inline.is_none(),
            "fill_in called with an open entry"
        );
        assert!(
            self.header.is_some(),
            "prepare_for_fill_in must be called before fill_in"
        );
        assert!(!self.filled, "fill_in may only be called once");
        let header = self.header.clone().unwrap();
        assert_eq!(
            region.len(),
            header.total_size(),
            "region size does not match prepare_for_fill_in"
        );
        self.filled = true;

        region.fill(0);
        region[..HEADER_SIZE].copy_from_slice(&self.header_bytes);

        // Location catalog.
        let catalog_start = header.catalog_byte_offset as usize;
        let catalog_end = catalog_start + header.catalog_num_bytes as usize;
        self.catalog.write_into(&mut region[catalog_start..catalog_end]);

        // Stack map rows, carving vreg maps and inline rows as we go.
        let bits_per_index = self.catalog.bits_per_index();
        let layout = &header.stack_map;
        let inline_layout = &header.inline;
        let stack_maps_base = header.stack_maps_byte_offset as usize * 8;
        let inline_base = header.inline_table_byte_offset as usize * 8;
        let mut next_map_offset = 0usize;
        let mut next_inline_row = 0u32;
        // Raw stored offset field per entry, so duplicates can copy it.
        let mut stored_offsets = vec![0u64; self.stack_maps.len()];
        for (i, entry) in self.stack_maps.iter().enumerate() {
            let row = stack_maps_base + i * layout.row_bits() as usize;
            layout.native_pc.store(region, row, entry.native_pc.compressed() as u64);
            layout.bc_pc.store(region, row, entry.bc_pc as u64);
            layout
                .register_mask_index
                .store(region, row, entry.register_mask_index as u64);
            layout
                .stack_mask_index
                .store(region, row, entry.stack_mask_index as u64);

            let map_size = vreg_map_size(bits_per_index, entry.num_vregs, entry.live_mask.as_ref());
            let stored = if map_size == 0 {
                // Nothing live: the absent marker wins even over a dedup hit.
                layout.vreg_map_offset.sentinel()
            } else if let Some(prior) = entry.same_map_as {
                stored_offsets[prior as usize]
            } else {
                let offset = next_map_offset;
                self.write_vreg_map(
                    region,
                    header.vreg_maps_byte_offset as usize + offset,
                    entry.num_vregs,
                    entry.live_mask.as_ref().unwrap(),
                    entry.locations_start,
                    bits_per_index,
                );
                next_map_offset += map_size;
                offset as u64
            };
            stored_offsets[i] = stored;
            layout.vreg_map_offset.store(region, row, stored);

            if entry.inlining_depth > 0 {
                debug_assert_eq!(next_inline_row, entry.inline_start);
                let first_row = next_inline_row;
                layout.inline_index.store(region, row, first_row as u64);
                let first_row_base =
                    inline_base + first_row as usize * inline_layout.row_bits() as usize;
                inline_layout
                    .depth
                    .store(region, first_row_base, entry.inlining_depth as u64);
                for depth in 0..entry.inlining_depth as u32 {
                    let inline_row = (first_row + depth) as usize;
                    let row_base = inline_base + inline_row * inline_layout.row_bits() as usize;
                    let inline_entry = &self.inline_infos[inline_row];
                    inline_layout.is_handle.store(
                        region,
                        row_base,
                        inline_entry.method.is_handle() as u64,
                    );
                    inline_layout
                        .method
                        .store(region, row_base, inline_entry.method.payload());
                    inline_layout
                        .bc_pc
                        .store(region, row_base, inline_entry.bc_pc as u64);

                    let inline_map_size = vreg_map_size(
                        bits_per_index,
                        inline_entry.num_vregs,
                        inline_entry.live_mask.as_ref(),
                    );
                    let inline_stored = if inline_map_size == 0 {
                        inline_layout.vreg_map_offset.sentinel()
                    } else {
                        let offset = next_map_offset;
                        self.write_vreg_map(
                            region,
                            header.vreg_maps_byte_offset as usize + offset,
                            inline_entry.num_vregs,
                            inline_entry.live_mask.as_ref().unwrap(),
                            inline_entry.locations_start,
                            bits_per_index,
                        );
                        next_map_offset += inline_map_size;
                        offset as u64
                    };
                    inline_layout
                        .vreg_map_offset
                        .store(region, row_base, inline_stored);
                }
                next_inline_row += entry.inlining_depth as u32;
            } else if layout.inline_index.num_bits() > 0 {
                layout
                    .inline_index
                    .store(region, row, layout.inline_index.sentinel());
            }
        }
        debug_assert_eq!(next_map_offset, header.vreg_maps_num_bytes as usize);
        debug_assert_eq!(next_inline_row, header.num_inline_rows);

        // Stack mask table: byte-packed dedup buffer to bit-packed rows.
        let byte_entry_size = bits_to_bytes(header.stack_mask_bits as usize);
        let stack_masks_base = header.stack_masks_byte_offset as usize * 8;
        for i in 0..header.num_stack_mask_entries as usize {
            let source = &self.stack_masks[i * byte_entry_size..(i + 1) * byte_entry_size];
            let row = stack_masks_base + i * header.stack_mask_bits as usize;
            for bit in 0..header.stack_mask_bits as usize {
                if load_bit(source, bit) {
                    store_bit(region, row + bit, true);
                }
            }
        }

        // Register mask table.
        let register_masks_base = header.register_masks_byte_offset as usize * 8;
        for (i, &mask) in self.register_masks.iter().enumerate() {
            store_bits(
                region,
                register_masks_base + i * header.register_mask_bits as usize,
                header.register_mask_bits,
                mask as u64,
            );
        }

        #[cfg(debug_assertions)]
        self.check_code_info(region);
    }

    /// Write one vreg map: the live bitmask followed by the bit-packed
    /// catalog indices of the live registers.
    fn write_vreg_map(
        &self,
        region: &mut [u8],
        byte_start: usize,
        num_vregs: u16,
        live_mask: &BitVector,
        locations_start: u32,
        bits_per_index: u32,
    ) {
        let mask_base = byte_start * 8;
        let indices_base = mask_base + bits_to_bytes(num_vregs as usize) * 8;
        for (k, reg) in live_mask.iter_set_bits().enumerate() {
            store_bit(region, mask_base + reg as usize, true);
            let catalog_index = self.location_indices[locations_start as usize + k];
            store_bits(
                region,
                indices_base + k * bits_per_index as usize,
                bits_per_index,
                catalog_index as u64,
            );
        }
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Read the just-written region back through the decoder and check
    /// every input round-trips. Any mismatch is a builder bug.
    #[cfg(debug_assertions)]
    fn check_code_info(&self, region: &[u8]) {
        use crate::decode::CodeInfo;

        let info = CodeInfo::new(region);
        assert_eq!(info.num_stack_maps() as usize, self.stack_maps.len());
        for (i, entry) in self.stack_maps.iter().enumerate() {
            let map = info.stack_map_at(i as u32);
            assert_eq!(map.native_pc_offset(self.isa), entry.native_pc.offset(self.isa));
            assert_eq!(map.bc_pc(), entry.bc_pc);
            assert_eq!(map.register_mask_index(), entry.register_mask_index);
            assert_eq!(info.register_mask_of(&map), entry.register_mask);
            assert_eq!(map.stack_mask_index(), entry.stack_mask_index);
            for bit in 0..info.num_stack_mask_bits() {
                let expected = entry.sp_mask.map_or(false, |m| m.is_set(bit));
                assert_eq!(info.stack_mask_bit(&map, bit), expected);
            }

            self.check_vreg_map(
                &info,
                info.vreg_map_of(&map, entry.num_vregs),
                entry.num_vregs,
                entry.live_mask.as_ref(),
                entry.locations_start,
            );

            assert_eq!(map.has_inline_info(), entry.inlining_depth > 0);
            if entry.inlining_depth > 0 {
                assert_eq!(info.inline_depth_of(&map), entry.inlining_depth as u32);
                for depth in 0..entry.inlining_depth as u32 {
                    let frame = info.inline_frame_at(&map, depth);
                    let inline_entry = &self.inline_infos[(entry.inline_start + depth) as usize];
                    assert_eq!(frame.method(), inline_entry.method);
                    assert_eq!(frame.bc_pc(), inline_entry.bc_pc);
                    self.check_vreg_map(
                        &info,
                        info.vreg_map_at_depth(&map, depth, inline_entry.num_vregs),
                        inline_entry.num_vregs,
                        inline_entry.live_mask.as_ref(),
                        inline_entry.locations_start,
                    );
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_vreg_map(
        &self,
        info: &crate::decode::CodeInfo<'_>,
        view: Option<crate::decode::VRegMapView<'_>>,
        num_vregs: u16,
        live_mask: Option<&BitVector>,
        locations_start: u32,
    ) {
        let mut k = 0usize;
        for reg in 0..num_vregs {
            let live = live_mask.map_or(false, |m| m.is_set(reg as u32));
            if live {
                let catalog_index = self.location_indices[locations_start as usize + k];
                k += 1;
                let expected = self.catalog.get(catalog_index);
                let view = view.as_ref().expect("vreg map missing for live registers");
                assert!(view.is_live(reg));
                assert_eq!(view.location(info, reg), expected);
            } else if let Some(view) = view.as_ref() {
                assert!(!view.is_live(reg));
                assert_eq!(view.location(info, reg), VRegLocation::None);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
