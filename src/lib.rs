//! Safepoint stack map side tables for the Vesper JIT.
//!
//! Compiled code alone cannot tell the runtime which values are heap
//! references. At every safepoint the garbage collector, the deoptimizer
//! and the exception unwinder all need the same side information: which
//! callee-saved registers and stack slots hold references, the bytecode PC
//! the native PC corresponds to, and where every live source virtual
//! register currently resides, including one such record per inlined frame.
//!
//! This crate builds that side table at the end of code generation and
//! decodes it again at run time:
//!
//! - [`StackMapStream`] ingests one entry per safepoint, interns the
//!   repeating substructures (vreg locations, identical vreg maps, stack
//!   masks, register masks), sizes every field from its observed maximum,
//!   and serializes the table into a caller-provided byte region.
//! - [`CodeInfo`] random-accesses a serialized region by stack map index
//!   using nothing but the self-describing header at its front.
//!
//! # Example
//!
//! ```ignore
//! use vesper_stackmaps::{
//!     BitVector, CodeInfo, InstructionSet, StackMapStream, VRegLocation,
//! };
//!
//! // During code generation: one entry per safepoint.
//! let sp_mask = BitVector::from_bits(&[0, 2]);
//! let mut stream = StackMapStream::new(InstructionSet::X64);
//! stream.begin_stack_map_entry(4, 0x20, 0b11, Some(&sp_mask), 2, 0);
//! stream.add_vreg_entry(VRegLocation::InRegister(3));
//! stream.add_vreg_entry(VRegLocation::InStack(16));
//! stream.end_stack_map_entry();
//!
//! // Size, then write once into the method's metadata allocation.
//! let size = stream.prepare_for_fill_in();
//! let mut region = vec![0u8; size];
//! stream.fill_in(&mut region);
//!
//! // During GC: find the safepoint by return address.
//! let info = CodeInfo::new(&region);
//! let map = info.stack_map_for_native_pc(0x20, InstructionSet::X64).unwrap();
//! for bit in 0..info.num_stack_mask_bits() {
//!     if info.stack_mask_bit(&map, bit) {
//!         // slot `bit` holds a reference
//!     }
//! }
//! ```

pub mod bits;
pub mod decode;
pub mod encoding;
pub mod isa;
pub mod location;
pub mod stream;

pub use bits::BitVector;
pub use decode::{CodeInfo, InlineFrameView, StackMapView, VRegMapView};
pub use encoding::{CodeInfoHeader, HEADER_SIZE};
pub use isa::{CodeOffset, InstructionSet};
pub use location::{LocationCatalog, MethodRef, VRegLocation};
pub use stream::StackMapStream;

/// The "no bytecode PC" marker. Valid only for inline frames; outer
/// entries must carry a real PC.
pub const NO_BC_PC: u32 = u32::MAX;
