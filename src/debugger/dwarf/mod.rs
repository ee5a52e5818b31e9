//! DWARF symbol container for one WebAssembly module.
//!
//! The debug information lives in custom sections named `.debug_*` inside the
//! module binary. All addresses handled here are byte offsets as CDP reports
//! them (offset into the module), the container translates them to and from
//! code-section relative DWARF addresses internally.

pub mod format;
pub mod sourcemap;
pub mod subroutine;
mod utils;
pub mod variables;

pub use sourcemap::LineInfo;
pub use variables::{VariableLocation, VariableName};

use crate::debugger::error::Error;
use crate::debugger::value::ValueStores;
use format::TypeView;
use sourcemap::SourceMap;
use subroutine::{SubroutineMap, WasmLoc};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use variables::{FrameBase, GroupTable, TypeRef, VariableAccess};
use wasmparser::{Parser, Payload};

pub type DwarfReader = gimli::EndianRcSlice<gimli::LittleEndian>;

/// A variable listing produced at one instruction: the id of the top-level
/// group plus the flattened variable set of every group reachable from it.
pub struct VariableEnumeration {
    pub root_group: i32,
    pub variables: Vec<VariableName>,
}

impl VariableEnumeration {
    /// Entries of one expansion group, the root group when none is given.
    pub fn group(&self, group_id: Option<i32>) -> impl Iterator<Item = &VariableName> {
        let group = group_id.unwrap_or(self.root_group);
        self.variables.iter().filter(move |v| v.group_id == group)
    }
}

pub struct DwarfContainer {
    dwarf: gimli::Dwarf<DwarfReader>,
    units: Vec<gimli::Unit<DwarfReader>>,
    sourcemap: SourceMap,
    subroutines: SubroutineMap,
    groups: RefCell<GroupTable>,
    code_base: u64,
    data_base: u64,
}

impl DwarfContainer {
    /// Parse the embedded DWARF of a module binary.
    pub fn from_module(data: &[u8]) -> Result<Self, Error> {
        let (code_base, data_base) = module_bases(data)?;

        let object = object::File::parse(data)?;
        let dwarf = load_dwarf(&object)?;

        let mut units = Vec::new();
        let mut line_tables = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            let unit = dwarf.unit(header)?;
            if let Some(table) = sourcemap::transform_debug_line(&dwarf, &unit)? {
                line_tables.push(table);
            }
            units.push(unit);
        }

        let subroutines = SubroutineMap::transform(&dwarf, &units)?;

        Ok(Self {
            dwarf,
            units,
            sourcemap: SourceMap::from_units(line_tables),
            subroutines,
            groups: RefCell::default(),
            code_base,
            data_base,
        })
    }

    /// Byte offset of the code section inside the module.
    pub fn code_base(&self) -> u64 {
        self.code_base
    }

    /// Source position of a module byte offset.
    pub fn find_line_info(&self, byte_offset: u64) -> Option<LineInfo> {
        let address = byte_offset.checked_sub(self.code_base)?;
        self.sourcemap.find_line_info(address)
    }

    /// Module byte offset of a (file, line) position.
    pub fn find_address(&self, file: &str, line: u64) -> Option<u64> {
        self.sourcemap
            .find_address(file, line)
            .map(|address| address + self.code_base)
    }

    /// All source files known to this module.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.sourcemap.files()
    }

    /// Variables of the function scope covering the instruction, flattened
    /// with their expansion groups.
    pub fn local_variables(&self, byte_offset: u64) -> Result<VariableEnumeration, Error> {
        let code_offset = self.code_offset(byte_offset)?;
        let subroutine = self
            .subroutines
            .find(code_offset)
            .ok_or(Error::FunctionNotFound(byte_offset))?;
        let unit = &self.units[subroutine.unit_index];

        let mut groups = self.groups.borrow_mut();
        let (root_group, variables) = variables::variables_in_unit_entry(
            &self.dwarf,
            unit,
            subroutine.unit_index,
            Some(subroutine.entry_offset),
            code_offset,
            &mut groups,
        )?;

        Ok(self.enumeration(unit, root_group, variables))
    }

    /// Top-level (global) variables of the compilation unit covering the
    /// instruction.
    pub fn global_variables(&self, byte_offset: u64) -> Result<VariableEnumeration, Error> {
        let code_offset = self.code_offset(byte_offset)?;
        let subroutine = self
            .subroutines
            .find(code_offset)
            .ok_or(Error::FunctionNotFound(byte_offset))?;
        let unit = &self.units[subroutine.unit_index];

        let mut groups = self.groups.borrow_mut();
        let (root_group, variables) = variables::variables_in_unit_entry(
            &self.dwarf,
            unit,
            subroutine.unit_index,
            None,
            0,
            &mut groups,
        )?;

        Ok(self.enumeration(unit, root_group, variables))
    }

    /// Top-level variables of every compilation unit, one enumeration per
    /// unit. Used for global listings of modules other than the paused one.
    pub fn all_global_variables(&self) -> Result<Vec<VariableEnumeration>, Error> {
        let mut result = Vec::with_capacity(self.units.len());
        for (unit_index, unit) in self.units.iter().enumerate() {
            let mut groups = self.groups.borrow_mut();
            let (root_group, variables) =
                variables::variables_in_unit_entry(&self.dwarf, unit, unit_index, None, 0, &mut groups)?;
            drop(groups);
            result.push(self.enumeration(unit, root_group, variables));
        }
        Ok(result)
    }

    fn enumeration(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        root_group: i32,
        variables: Vec<variables::SymbolVariable>,
    ) -> VariableEnumeration {
        let variables = variables
            .into_iter()
            .map(|var| {
                let type_name = match &var.ty {
                    TypeRef::Offset(offset) => {
                        format::type_name(&self.dwarf, unit, Some(*offset))
                            .unwrap_or_else(|_| "<unknown>".to_string())
                    }
                    TypeRef::Description(desc) => desc.clone(),
                };
                let name = var.name.unwrap_or_else(|| "<unnamed>".to_string());
                VariableName {
                    display_name: var.display_name.unwrap_or_else(|| name.clone()),
                    name,
                    type_name,
                    group_id: var.group_id,
                    child_group_id: var.child_group_id,
                }
            })
            .collect();

        VariableEnumeration {
            root_group,
            variables,
        }
    }

    /// Evaluate an expression over a local variable at the given instruction.
    ///
    /// The expression grammar is a dotted member path with optional leading
    /// dereferences and one trailing index: `*list.head`, `point.x`, `buf[3]`.
    pub fn evaluate(
        &self,
        expr: &str,
        stores: &ValueStores,
        byte_offset: u64,
    ) -> Result<VariableEvaluation, Error> {
        let code_offset = self.code_offset(byte_offset)?;
        let subroutine = self
            .subroutines
            .find(code_offset)
            .ok_or(Error::FunctionNotFound(byte_offset))?;
        let unit = &self.units[subroutine.unit_index];

        let frame_base = match subroutine.frame_base {
            Some(loc) => FrameBase::Wasm(read_slot(stores, loc)?),
            None => return Err(Error::NoFrameBase),
        };

        let mut groups = self.groups.borrow_mut();
        let (_, variables) = variables::variables_in_unit_entry(
            &self.dwarf,
            unit,
            subroutine.unit_index,
            Some(subroutine.entry_offset),
            code_offset,
            &mut groups,
        )?;
        drop(groups);

        self.evaluate_in(expr, &variables, unit, frame_base, stores)
    }

    /// Evaluate an expression over a global variable. Globals resolve against
    /// the data-section base instead of a function frame.
    pub fn evaluate_global(
        &self,
        expr: &str,
        stores: &ValueStores,
        byte_offset: u64,
    ) -> Result<VariableEvaluation, Error> {
        let code_offset = self.code_offset(byte_offset)?;
        let subroutine = self
            .subroutines
            .find(code_offset)
            .ok_or(Error::FunctionNotFound(byte_offset))?;
        let unit = &self.units[subroutine.unit_index];

        let mut groups = self.groups.borrow_mut();
        let (_, variables) = variables::variables_in_unit_entry(
            &self.dwarf,
            unit,
            subroutine.unit_index,
            None,
            0,
            &mut groups,
        )?;
        drop(groups);

        self.evaluate_in(
            expr,
            &variables,
            unit,
            FrameBase::Data(self.data_base),
            stores,
        )
    }

    fn evaluate_in(
        &self,
        expr: &str,
        variables: &[variables::SymbolVariable],
        unit: &gimli::Unit<DwarfReader>,
        frame_base: FrameBase,
        stores: &ValueStores,
    ) -> Result<VariableEvaluation, Error> {
        let parsed = ExpressionShape::parse(expr);
        let resolved =
            variables::resolve_variable(variables, &parsed.base, frame_base, unit.encoding())?;

        let TypeRef::Offset(ty_offset) = resolved.ty else {
            // entries without a type reference render as their description
            let TypeRef::Description(desc) = resolved.ty else {
                unreachable!()
            };
            return Ok(VariableEvaluation::ready(desc));
        };

        let mut view = format::type_view(&self.dwarf, unit, ty_offset)?;
        let mut steps: VecDeque<VariableLocation> = VecDeque::new();
        let address_size = unit.header.address_size() as usize;

        let mut derefs = parsed.derefs;
        match resolved.access {
            VariableAccess::Register(loc) => {
                let value = stores
                    .slot(loc)
                    .ok_or(Error::FrameBaseOutOfRange(loc.index()))?;

                if derefs == 0 && parsed.index.is_none() {
                    // a register scalar needs no memory at all
                    let rendered = format::format_value(&view, &value.to_le_bytes())?;
                    return Ok(VariableEvaluation::ready(rendered));
                }

                // the register holds the address the expression starts from
                if view.tag != gimli::DW_TAG_pointer_type {
                    return Err(Error::EvalUnsupportedRequire("dereference of non-pointer"));
                }
                let base = value
                    .as_address()
                    .ok_or(Error::EvalUnsupportedRequire("integer slot"))?;
                steps.push_back(VariableLocation::Address(base));
                view = self.pointee_view(unit, &view)?;
                derefs = derefs.saturating_sub(1);
            }
            VariableAccess::RegisterIndirect {
                loc,
                steps: indirect_steps,
            } => {
                let value = stores
                    .slot(loc)
                    .ok_or(Error::FrameBaseOutOfRange(loc.index()))?;
                let base = value
                    .as_address()
                    .ok_or(Error::EvalUnsupportedRequire("integer slot"))?;
                steps.push_back(VariableLocation::Address(base));
                steps.extend(indirect_steps);
            }
            VariableAccess::Const(bytes) => {
                if derefs > 0 || parsed.index.is_some() {
                    return Err(Error::EvalUnsupportedRequire("constant dereference"));
                }
                let rendered = format::format_value(&view, &bytes)?;
                return Ok(VariableEvaluation::ready(rendered));
            }
            VariableAccess::Memory(memory_steps) => {
                steps.extend(memory_steps);
            }
        }

        while derefs > 0 {
            if view.tag != gimli::DW_TAG_pointer_type {
                return Err(Error::EvalUnsupportedRequire("dereference of non-pointer"));
            }
            steps.push_back(VariableLocation::Pointer);
            view = self.pointee_view(unit, &view)?;
            derefs -= 1;
        }

        if let Some(index) = parsed.index {
            match view.tag {
                gimli::DW_TAG_array_type => {
                    let element = view.element.ok_or(Error::TypeNotFound)?;
                    let element_view = format::type_view(&self.dwarf, unit, element)?;
                    steps.push_back(VariableLocation::Offset(
                        (index as i64) * element_view.byte_size as i64,
                    ));
                    view = element_view;
                }
                gimli::DW_TAG_pointer_type => {
                    steps.push_back(VariableLocation::Pointer);
                    let element_view = self.pointee_view(unit, &view)?;
                    steps.push_back(VariableLocation::Offset(
                        (index as i64) * element_view.byte_size as i64,
                    ));
                    view = element_view;
                }
                _ => return Err(Error::EvalUnsupportedRequire("index of non-array")),
            }
        }

        Ok(VariableEvaluation::memory(view, steps, address_size))
    }

    fn pointee_view(
        &self,
        unit: &gimli::Unit<DwarfReader>,
        view: &TypeView,
    ) -> Result<TypeView, Error> {
        let pointee = view.pointee.ok_or(Error::TypeNotFound)?;
        format::type_view(&self.dwarf, unit, pointee)
    }

    fn code_offset(&self, byte_offset: u64) -> Result<u64, Error> {
        byte_offset
            .checked_sub(self.code_base)
            .ok_or(Error::PlaceNotFound(byte_offset))
    }
}

/// Read one wasm slot as an integer, used for frame base values.
fn read_slot(stores: &ValueStores, loc: WasmLoc) -> Result<u64, Error> {
    let value = stores
        .slot(loc)
        .ok_or(Error::FrameBaseOutOfRange(loc.index()))?;
    value
        .as_address()
        .ok_or(Error::EvalUnsupportedRequire("integer slot"))
}

struct ExpressionShape {
    derefs: usize,
    base: String,
    index: Option<u64>,
}

impl ExpressionShape {
    fn parse(expr: &str) -> Self {
        let trimmed = expr.trim();
        let derefs = trimmed.chars().take_while(|c| *c == '*').count();
        let rest = &trimmed[derefs..];

        let (base, index) = match rest.strip_suffix(']').and_then(|r| r.rsplit_once('[')) {
            Some((base, idx)) => (base, idx.trim().parse::<u64>().ok()),
            None => (rest, None),
        };

        Self {
            derefs,
            base: base.trim().to_string(),
            index,
        }
    }
}

/// Required byte range in the debuggee's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySlice {
    pub address: u64,
    pub byte_size: usize,
}

enum EvaluationState {
    /// The final rendering is already known.
    Ready(String),
    /// Address steps are still being replayed against memory.
    Stepping {
        view: TypeView,
        pending: VecDeque<VariableLocation>,
        address: u64,
        final_bytes: Option<Vec<u8>>,
        address_size: usize,
    },
}

/// Incremental evaluation of one variable expression.
///
/// Drive it by calling [`required_slice`](VariableEvaluation::required_slice),
/// fetching the bytes and feeding them back through
/// [`provide`](VariableEvaluation::provide) until no further slice is needed,
/// then render with [`finish`](VariableEvaluation::finish). Every fulfilled
/// slice either completes the value or advances the address chain, so the
/// loop always terminates.
pub struct VariableEvaluation {
    state: EvaluationState,
}

impl VariableEvaluation {
    fn ready(rendered: String) -> Self {
        Self {
            state: EvaluationState::Ready(rendered),
        }
    }

    fn memory(view: TypeView, pending: VecDeque<VariableLocation>, address_size: usize) -> Self {
        Self {
            state: EvaluationState::Stepping {
                view,
                pending,
                address: 0,
                final_bytes: None,
                address_size,
            },
        }
    }

    /// Next memory range the evaluation needs, `None` once the value is ready.
    pub fn required_slice(&mut self) -> Option<MemorySlice> {
        let EvaluationState::Stepping {
            view,
            pending,
            address,
            final_bytes,
            ..
        } = &mut self.state
        else {
            return None;
        };

        while let Some(step) = pending.front() {
            match step {
                VariableLocation::Address(a) => {
                    *address += a;
                    pending.pop_front();
                }
                VariableLocation::Offset(o) => {
                    *address = address.wrapping_add_signed(*o);
                    pending.pop_front();
                }
                VariableLocation::Pointer => {
                    return Some(MemorySlice {
                        address: *address,
                        byte_size: 8,
                    });
                }
            }
        }

        if final_bytes.is_none() {
            return Some(MemorySlice {
                address: *address,
                byte_size: view.byte_size.max(8),
            });
        }
        None
    }

    /// Feed the bytes of the last required slice.
    pub fn provide(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        let EvaluationState::Stepping {
            pending,
            address,
            final_bytes,
            address_size,
            ..
        } = &mut self.state
        else {
            return Err(Error::EvalUnsupportedRequire("unexpected memory slice"));
        };

        if matches!(pending.front(), Some(VariableLocation::Pointer)) {
            pending.pop_front();
            let mut raw = [0u8; 8];
            let n = bytes.len().min(*address_size).min(8);
            if n == 0 {
                return Err(Error::TypeBinaryRepr("pointer".to_string()));
            }
            raw[..n].copy_from_slice(&bytes[..n]);
            *address = u64::from_le_bytes(raw);
            return Ok(());
        }

        *final_bytes = Some(bytes);
        Ok(())
    }

    /// Render the evaluated value.
    pub fn finish(&self) -> Result<String, Error> {
        match &self.state {
            EvaluationState::Ready(rendered) => Ok(rendered.clone()),
            EvaluationState::Stepping {
                view, final_bytes, ..
            } => {
                let bytes = final_bytes.as_ref().ok_or(Error::NoVariableLocation)?;
                format::format_value(view, bytes)
            }
        }
    }
}

fn load_dwarf(object: &object::File) -> Result<gimli::Dwarf<DwarfReader>, Error> {
    use object::{Object, ObjectSection};

    let endian = gimli::LittleEndian;
    let load_section = |id: gimli::SectionId| -> Result<DwarfReader, Error> {
        let data: Rc<[u8]> = match object.section_by_name(id.name()) {
            Some(ref section) => Rc::from(section.data().unwrap_or(&[][..])),
            None => Rc::from(&[][..]),
        };
        Ok(DwarfReader::new(data, endian))
    };

    gimli::Dwarf::load(&load_section)
}

/// Byte offsets of the code and data sections inside the module file. The
/// code base turns CDP byte offsets into DWARF addresses, the data base
/// relocates addresses of statics into linear memory.
fn module_bases(data: &[u8]) -> Result<(u64, u64), Error> {
    let parser = Parser::new(0);
    let mut code_base = 0;
    let mut data_base = 0;

    for payload in parser.parse_all(data) {
        match payload? {
            Payload::CodeSectionStart { range, .. } => {
                code_base = range.start as u64;
            }
            Payload::DataSection(reader) => {
                for entry in reader {
                    let entry = entry?;
                    if let wasmparser::DataKind::Active { offset_expr, .. } = entry.kind {
                        let mut ops = offset_expr.get_operators_reader();
                        if let Ok(wasmparser::Operator::I32Const { value }) = ops.read() {
                            data_base = value as u64;
                        }
                        break;
                    }
                }
            }
            _ => continue,
        }
    }
    Ok((code_base, data_base))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_expression_shape_parsing() {
        let shape = ExpressionShape::parse("point.x");
        assert_eq!(shape.derefs, 0);
        assert_eq!(shape.base, "point.x");
        assert_eq!(shape.index, None);

        let shape = ExpressionShape::parse("**list.head");
        assert_eq!(shape.derefs, 2);
        assert_eq!(shape.base, "list.head");

        let shape = ExpressionShape::parse("buf[3]");
        assert_eq!(shape.base, "buf");
        assert_eq!(shape.index, Some(3));

        let shape = ExpressionShape::parse("*items[10]");
        assert_eq!(shape.derefs, 1);
        assert_eq!(shape.base, "items");
        assert_eq!(shape.index, Some(10));
    }

    #[test]
    fn test_evaluation_replays_address_steps_without_memory() {
        let view = TypeView {
            name: "int".to_string(),
            byte_size: 4,
            encoding: gimli::DW_ATE_signed,
            tag: gimli::DW_TAG_base_type,
            members: vec![],
            pointee: None,
            element: None,
        };
        let steps = VecDeque::from(vec![
            VariableLocation::Address(0x1000),
            VariableLocation::Offset(8),
        ]);
        let mut eval = VariableEvaluation::memory(view, steps, 4);

        let slice = eval.required_slice().unwrap();
        assert_eq!(slice, MemorySlice { address: 0x1008, byte_size: 8 });

        eval.provide(42i32.to_le_bytes().to_vec()).unwrap();
        assert!(eval.required_slice().is_none());
        assert_eq!(eval.finish().unwrap(), "(int)42");
    }

    #[test]
    fn test_evaluation_requests_new_slice_after_pointer_hop() {
        let view = TypeView {
            name: "int".to_string(),
            byte_size: 4,
            encoding: gimli::DW_ATE_signed,
            tag: gimli::DW_TAG_base_type,
            members: vec![],
            pointee: None,
            element: None,
        };
        let steps = VecDeque::from(vec![
            VariableLocation::Address(0x100),
            VariableLocation::Pointer,
        ]);
        let mut eval = VariableEvaluation::memory(view, steps, 4);

        let slice = eval.required_slice().unwrap();
        assert_eq!(slice.address, 0x100);
        assert_eq!(slice.byte_size, 8);

        // the pointer cell holds 0x2000
        eval.provide(0x2000u64.to_le_bytes().to_vec()).unwrap();

        // a strictly different slice is required next
        let slice = eval.required_slice().unwrap();
        assert_eq!(slice.address, 0x2000);

        eval.provide(7i32.to_le_bytes().to_vec()).unwrap();
        assert!(eval.required_slice().is_none());
        assert_eq!(eval.finish().unwrap(), "(int)7");
    }
}
