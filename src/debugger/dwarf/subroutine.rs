//! Subprogram index: which function covers a code offset and how its frame
//! base is expressed.
//!
//! WebAssembly DWARF extends location expressions with `DW_OP_WASM_location`
//! (0xed): an operand class selector (local / global / operand stack) followed
//! by an index. Frame bases of wasm functions are almost always spelled this
//! way, the actual base value lives in the selected slot at runtime.

use super::utils::clone_string_attribute;
use super::DwarfReader;
use crate::debugger::error::Error;
use gimli::{AttributeValue, UnitOffset};
use std::ops::Range;

const DW_OP_WASM_LOCATION: u8 = 0xed;

/// An operand slot of the executing wasm frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmLoc {
    Local(u64),
    Global(u64),
    Stack(u64),
}

impl WasmLoc {
    pub fn index(&self) -> u64 {
        match self {
            WasmLoc::Local(idx) | WasmLoc::Global(idx) | WasmLoc::Stack(idx) => *idx,
        }
    }
}

pub(super) struct Subroutine {
    pub name: Option<String>,
    pub pc: Range<u64>,
    pub unit_index: usize,
    pub entry_offset: UnitOffset,
    pub frame_base: Option<WasmLoc>,
}

/// Decode a `DW_OP_WASM_location` expression into the slot it denotes.
pub(super) fn read_wasm_location(
    attr_value: AttributeValue<DwarfReader>,
) -> Result<WasmLoc, Error> {
    let AttributeValue::Exprloc(ref expr) = attr_value else {
        return Err(Error::EvalUnsupportedRequire("expression location"));
    };

    let mut bytes_reader = expr.0.clone();
    if bytes_reader.is_empty() {
        return Err(Error::ProtocolViolation("empty location expression"));
    }

    use gimli::Reader;
    let magic = bytes_reader.read_u8()?;
    if magic != DW_OP_WASM_LOCATION {
        return Err(Error::EvalUnsupportedRequire("DW_OP_WASM_location"));
    }

    let wasm_op = bytes_reader.read_u8()?;
    let loc = match wasm_op {
        0x00 => WasmLoc::Local(bytes_reader.read_uleb128()?),
        0x01 => WasmLoc::Global(bytes_reader.read_uleb128()?),
        0x02 => WasmLoc::Stack(bytes_reader.read_uleb128()?),
        0x03 => WasmLoc::Global(bytes_reader.read_u32()? as u64),
        _ => return Err(Error::EvalUnsupportedRequire("wasm location class")),
    };
    Ok(loc)
}

/// True when an expression starts with `DW_OP_WASM_location`.
pub(super) fn is_wasm_location(attr_value: &AttributeValue<DwarfReader>) -> bool {
    let AttributeValue::Exprloc(expr) = attr_value else {
        return false;
    };
    let mut reader = expr.0.clone();
    use gimli::Reader;
    matches!(reader.read_u8(), Ok(op) if op == DW_OP_WASM_LOCATION)
}

pub(super) fn read_subprogram_header(
    node: &gimli::EntriesTreeNode<DwarfReader>,
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    unit_index: usize,
) -> Result<Option<Subroutine>, Error> {
    if node.entry().tag() != gimli::DW_TAG_subprogram {
        return Ok(None);
    }

    let name = match node.entry().attr_value(gimli::DW_AT_name)? {
        Some(attr) => Some(clone_string_attribute(dwarf, unit, attr)?),
        None => None,
    };

    let Some(AttributeValue::Addr(low_pc)) = node.entry().attr_value(gimli::DW_AT_low_pc)? else {
        return Ok(None);
    };
    let high_pc = match node.entry().attr_value(gimli::DW_AT_high_pc)? {
        Some(AttributeValue::Udata(size)) => low_pc + size,
        Some(AttributeValue::Addr(high_pc)) => high_pc,
        _ => return Ok(None),
    };
    if high_pc <= low_pc {
        return Ok(None);
    }

    let frame_base = match node.entry().attr_value(gimli::DW_AT_frame_base)? {
        Some(attr) => match read_wasm_location(attr) {
            Ok(loc) => Some(loc),
            Err(e) => {
                log::debug!(target: "debugger", "frame base of {name:?}: {e:#}");
                None
            }
        },
        None => None,
    };

    Ok(Some(Subroutine {
        pc: low_pc..high_pc,
        name,
        unit_index,
        entry_offset: node.entry().offset(),
        frame_base,
    }))
}

/// All subprograms of a module with known code ranges.
pub(super) struct SubroutineMap {
    subroutines: Vec<Subroutine>,
}

impl SubroutineMap {
    pub fn transform(
        dwarf: &gimli::Dwarf<DwarfReader>,
        units: &[gimli::Unit<DwarfReader>],
    ) -> Result<Self, Error> {
        let mut subroutines = Vec::new();
        for (unit_index, unit) in units.iter().enumerate() {
            let mut tree = unit.entries_tree(None)?;
            let root = tree.root()?;
            collect_rec(root, dwarf, unit, unit_index, &mut subroutines)?;
        }
        Ok(Self { subroutines })
    }

    /// Innermost subprogram covering a code offset (nested functions are rare
    /// in wasm DWARF but inlined instances may carry narrower ranges).
    pub fn find(&self, offset: u64) -> Option<&Subroutine> {
        self.subroutines
            .iter()
            .filter(|s| s.pc.contains(&offset))
            .min_by_key(|s| s.pc.end - s.pc.start)
    }
}

fn collect_rec(
    node: gimli::EntriesTreeNode<DwarfReader>,
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    unit_index: usize,
    out: &mut Vec<Subroutine>,
) -> Result<(), Error> {
    let subroutine = read_subprogram_header(&node, dwarf, unit, unit_index)?;

    let mut children = node.children();
    while let Some(child) = children.next()? {
        match child.entry().tag() {
            gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter => continue,
            _ => collect_rec(child, dwarf, unit, unit_index, out)?,
        }
    }

    if let Some(subroutine) = subroutine {
        out.push(subroutine);
    }
    Ok(())
}
