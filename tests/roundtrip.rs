//! End-to-end build/decode round-trip tests for stack map tables.

use vesper_stackmaps::{
    BitVector, CodeInfo, InstructionSet, MethodRef, StackMapStream, VRegLocation, HEADER_SIZE,
    NO_BC_PC,
};

fn finish(mut stream: StackMapStream<'_>) -> Vec<u8> {
    let size = stream.prepare_for_fill_in();
    let mut region = vec![0u8; size];
    stream.fill_in(&mut region);
    region
}

#[test]
fn test_single_safepoint_no_live_regs() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(4, 0x20, 0, None, 0, 0);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_stack_maps(), 1);
    assert_eq!(info.num_catalog_entries(), 0);

    let map = info.stack_map_at(0);
    assert_eq!(map.bc_pc(), 4);
    assert_eq!(map.native_pc_offset(InstructionSet::X64), 0x20);
    assert!(!map.has_vreg_map());
    assert!(!map.has_inline_info());
    assert_eq!(map.stack_mask_index(), 0);
    assert_eq!(map.register_mask_index(), 0);
    assert_eq!(info.register_mask_of(&map), 0);
}

#[test]
fn test_identical_vreg_maps_stored_once() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    for (bc_pc, native) in [(0u32, 0x10u32), (5, 0x24)] {
        stream.begin_stack_map_entry(bc_pc, native, 0, None, 2, 0);
        stream.add_vreg_entry(VRegLocation::InRegister(3));
        stream.add_vreg_entry(VRegLocation::InStack(16));
        stream.end_stack_map_entry();
    }
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_catalog_entries(), 2);

    let first = info.stack_map_at(0);
    let second = info.stack_map_at(1);
    assert!(first.has_vreg_map());
    assert_eq!(first.vreg_map_offset(), second.vreg_map_offset());
    // One live bitmask byte plus one byte of packed indices: the shared
    // map is the whole region.
    assert_eq!(info.header().vreg_maps_num_bytes, 2);

    for map in [&first, &second] {
        let vreg_map = info.vreg_map_of(map, 2).unwrap();
        assert_eq!(vreg_map.location(&info, 0), VRegLocation::InRegister(3));
        assert_eq!(vreg_map.location(&info, 1), VRegLocation::InStack(16));
    }
}

#[test]
fn test_dead_register_slots() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, None, 3, 0);
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::InRegister(7));
    stream.add_vreg_entry(VRegLocation::None);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_catalog_entries(), 1);

    let map = info.stack_map_at(0);
    let vreg_map = info.vreg_map_of(&map, 3).unwrap();
    assert!(!vreg_map.is_live(0));
    assert!(vreg_map.is_live(1));
    assert!(!vreg_map.is_live(2));
    assert_eq!(vreg_map.live_count(), 1);
    assert_eq!(vreg_map.location(&info, 0), VRegLocation::None);
    assert_eq!(vreg_map.location(&info, 1), VRegLocation::InRegister(7));
    assert_eq!(vreg_map.location(&info, 2), VRegLocation::None);
}

#[test]
fn test_inlining_depth_two() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(8, 0x40, 0, None, 1, 2);
    stream.add_vreg_entry(VRegLocation::InStack(4));
    stream.begin_inline_info_entry(MethodRef::Index(17), 3, 2);
    stream.add_vreg_entry(VRegLocation::InRegister(1));
    stream.add_vreg_entry(VRegLocation::Constant(100));
    stream.end_inline_info_entry();
    stream.begin_inline_info_entry(MethodRef::Handle(0xDEAD_BEEF_F00D), NO_BC_PC, 0);
    stream.end_inline_info_entry();
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    let map = info.stack_map_at(0);
    assert!(map.has_inline_info());
    assert_eq!(info.inline_depth_of(&map), 2);

    let frame0 = info.inline_frame_at(&map, 0);
    assert_eq!(frame0.method(), MethodRef::Index(17));
    assert_eq!(frame0.bc_pc(), 3);
    assert!(frame0.has_bc_pc());
    assert!(frame0.has_vreg_map());
    let inline_map = info.vreg_map_at_depth(&map, 0, 2).unwrap();
    assert_eq!(inline_map.location(&info, 0), VRegLocation::InRegister(1));
    assert_eq!(inline_map.location(&info, 1), VRegLocation::Constant(100));

    let frame1 = info.inline_frame_at(&map, 1);
    assert_eq!(frame1.method(), MethodRef::Handle(0xDEAD_BEEF_F00D));
    assert!(!frame1.has_bc_pc());
    assert_eq!(frame1.bc_pc(), NO_BC_PC);
    assert!(!frame1.has_vreg_map());
    assert!(info.vreg_map_at_depth(&map, 1, 0).is_none());
}

#[test]
fn test_register_mask_dedup() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    for (i, mask) in [0x3u32, 0x3, 0x5].into_iter().enumerate() {
        stream.begin_stack_map_entry(i as u32, i as u32 * 4, mask, None, 0, 0);
        stream.end_stack_map_entry();
    }
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.header().num_register_mask_entries, 2);
    let first = info.stack_map_at(0);
    let second = info.stack_map_at(1);
    let third = info.stack_map_at(2);
    assert_eq!(first.register_mask_index(), second.register_mask_index());
    assert_ne!(first.register_mask_index(), third.register_mask_index());
    assert_eq!(info.register_mask_of(&first), 0x3);
    assert_eq!(info.register_mask_of(&second), 0x3);
    assert_eq!(info.register_mask_of(&third), 0x5);
}

#[test]
fn test_stack_mask_width_grows_to_common_maximum() {
    let narrow = BitVector::from_bits(&[0, 3]);
    let wide = BitVector::from_bits(&[1, 17]);
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0x10, 0, Some(&narrow), 0, 0);
    stream.end_stack_map_entry();
    stream.begin_stack_map_entry(1, 0x20, 0, Some(&wide), 0, 0);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_stack_mask_bits(), 18);
    let first = info.stack_map_at(0);
    let second = info.stack_map_at(1);
    assert_ne!(first.stack_mask_index(), second.stack_mask_index());
    for bit in 0..18 {
        assert_eq!(info.stack_mask_bit(&first, bit), narrow.is_set(bit));
        assert_eq!(info.stack_mask_bit(&second, bit), wide.is_set(bit));
    }
}

#[test]
fn test_equal_stack_masks_share_an_entry() {
    let a = BitVector::from_bits(&[2, 9]);
    let b = BitVector::from_bits(&[2, 9]);
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, Some(&a), 0, 0);
    stream.end_stack_map_entry();
    stream.begin_stack_map_entry(1, 4, 0, Some(&b), 0, 0);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.header().num_stack_mask_entries, 1);
    assert_eq!(
        info.stack_map_at(0).stack_mask_index(),
        info.stack_map_at(1).stack_mask_index()
    );
}

#[test]
fn test_zero_stack_maps_is_header_only() {
    let stream = StackMapStream::new(InstructionSet::X64);
    let region = finish(stream);
    assert_eq!(region.len(), HEADER_SIZE);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_stack_maps(), 0);
    assert_eq!(info.num_catalog_entries(), 0);
    assert_eq!(info.num_stack_mask_bits(), 0);
}

#[test]
fn test_all_dead_live_mask_has_no_map() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, None, 2, 0);
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::None);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    let map = info.stack_map_at(0);
    assert!(!map.has_vreg_map());
    assert!(info.vreg_map_of(&map, 2).is_none());
    assert_eq!(info.header().vreg_maps_num_bytes, 0);
}

#[test]
fn test_entry_without_inlining_among_inlined_entries() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, None, 0, 1);
    stream.begin_inline_info_entry(MethodRef::Index(2), 5, 0);
    stream.end_inline_info_entry();
    stream.end_stack_map_entry();
    stream.begin_stack_map_entry(1, 4, 0, None, 0, 0);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert!(info.stack_map_at(0).has_inline_info());
    assert!(!info.stack_map_at(1).has_inline_info());
    assert_eq!(info.inline_depth_of(&info.stack_map_at(1)), 0);
}

#[test]
fn test_null_sp_mask_decodes_as_all_zero() {
    let mask = BitVector::from_bits(&[5]);
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, None, 0, 0);
    stream.end_stack_map_entry();
    stream.begin_stack_map_entry(1, 4, 0, Some(&mask), 0, 0);
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    assert_eq!(info.num_stack_mask_bits(), 6);
    let first = info.stack_map_at(0);
    for bit in 0..6 {
        assert!(!info.stack_mask_bit(&first, bit));
    }
    assert_ne!(
        first.stack_mask_index(),
        info.stack_map_at(1).stack_mask_index()
    );
}

#[test]
fn test_large_location_values_roundtrip() {
    let mut stream = StackMapStream::new(InstructionSet::X64);
    stream.begin_stack_map_entry(0, 0, 0, None, 3, 0);
    stream.add_vreg_entry(VRegLocation::Constant(-42));
    stream.add_vreg_entry(VRegLocation::InStack(4096));
    stream.add_vreg_entry(VRegLocation::InFpuRegisterHigh(15));
    stream.end_stack_map_entry();
    let region = finish(stream);

    let info = CodeInfo::new(&region);
    let map = info.stack_map_at(0);
    let vreg_map = info.vreg_map_of(&map, 3).unwrap();
    assert_eq!(vreg_map.location(&info, 0), VRegLocation::Constant(-42));
    assert_eq!(vreg_map.location(&info, 1), VRegLocation::InStack(4096));
    assert_eq!(vreg_map.location(&info, 2), VRegLocation::InFpuRegisterHigh(15));
}

// -----------------------------------------------------------------------------
// Idempotence
// -----------------------------------------------------------------------------

/// Per-entry shape of the build script: outer vreg count plus the vreg
/// count of each inline frame.
type EntryShape = (u16, Vec<u16>);

fn build_rich_table(masks: &[Option<BitVector>]) -> (Vec<u8>, Vec<EntryShape>) {
    let shapes: Vec<EntryShape> = vec![(2, vec![]), (2, vec![]), (3, vec![2, 0]), (0, vec![])];

    let mut stream = StackMapStream::new(InstructionSet::Arm64);

    stream.begin_stack_map_entry(0, 0x10, 0x3, masks[0].as_ref(), 2, 0);
    stream.add_vreg_entry(VRegLocation::InRegister(3));
    stream.add_vreg_entry(VRegLocation::InStack(16));
    stream.end_stack_map_entry();

    // Same map as the first entry, different masks.
    stream.begin_stack_map_entry(5, 0x24, 0x3, masks[1].as_ref(), 2, 0);
    stream.add_vreg_entry(VRegLocation::InRegister(3));
    stream.add_vreg_entry(VRegLocation::InStack(16));
    stream.end_stack_map_entry();

    stream.begin_stack_map_entry(9, 0x38, 0x5, masks[2].as_ref(), 3, 2);
    stream.add_vreg_entry(VRegLocation::Constant(-7));
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::InStack(2048));
    stream.begin_inline_info_entry(MethodRef::Index(40), 2, 2);
    stream.add_vreg_entry(VRegLocation::InFpuRegister(9));
    stream.add_vreg_entry(VRegLocation::None);
    stream.end_inline_info_entry();
    stream.begin_inline_info_entry(MethodRef::Handle(0xABCD_1234_5678), NO_BC_PC, 0);
    stream.end_inline_info_entry();
    stream.end_stack_map_entry();

    stream.begin_stack_map_entry(12, 0x4C, 0, masks[3].as_ref(), 0, 0);
    stream.end_stack_map_entry();

    (finish(stream), shapes)
}

fn input_masks() -> Vec<Option<BitVector>> {
    vec![
        Some(BitVector::from_bits(&[0, 4])),
        None,
        Some(BitVector::from_bits(&[1, 12])),
        Some(BitVector::from_bits(&[0])),
    ]
}

#[test]
fn test_building_twice_is_deterministic() {
    let masks = input_masks();
    let (first, _) = build_rich_table(&masks);
    let (second, _) = build_rich_table(&masks);
    assert_eq!(first, second);
}

#[test]
fn test_decode_then_reencode_is_identity() {
    let isa = InstructionSet::Arm64;
    let masks = input_masks();
    let (region, shapes) = build_rich_table(&masks);
    let info = CodeInfo::new(&region);

    // Reconstruct every stack mask from the decoded bits. A mask that was
    // absent on input comes back as all-zero, which encodes identically.
    let decoded_masks: Vec<BitVector> = (0..info.num_stack_maps())
        .map(|i| {
            let map = info.stack_map_at(i);
            let mut mask = BitVector::new();
            for bit in 0..info.num_stack_mask_bits() {
                if info.stack_mask_bit(&map, bit) {
                    mask.set_bit(bit);
                }
            }
            mask
        })
        .collect();

    let mut stream = StackMapStream::new(isa);
    for (i, (num_vregs, inline_counts)) in shapes.iter().enumerate() {
        let map = info.stack_map_at(i as u32);
        stream.begin_stack_map_entry(
            map.bc_pc(),
            map.native_pc_offset(isa),
            info.register_mask_of(&map),
            Some(&decoded_masks[i]),
            *num_vregs,
            inline_counts.len() as u8,
        );
        let vreg_map = info.vreg_map_of(&map, *num_vregs);
        for reg in 0..*num_vregs {
            let location = vreg_map
                .as_ref()
                .map_or(VRegLocation::None, |m| m.location(&info, reg));
            stream.add_vreg_entry(location);
        }
        for (depth, inline_vregs) in inline_counts.iter().enumerate() {
            let frame = info.inline_frame_at(&map, depth as u32);
            stream.begin_inline_info_entry(frame.method(), frame.bc_pc(), *inline_vregs);
            let inline_map = info.vreg_map_at_depth(&map, depth as u32, *inline_vregs);
            for reg in 0..*inline_vregs {
                let location = inline_map
                    .as_ref()
                    .map_or(VRegLocation::None, |m| m.location(&info, reg));
                stream.add_vreg_entry(location);
            }
            stream.end_inline_info_entry();
        }
        stream.end_stack_map_entry();
    }

    let reencoded = finish(stream);
    assert_eq!(region, reencoded);
}
