//! Variable DIE transformation and location resolution.
//!
//! Enumeration walks every scope whose range covers the queried instruction
//! and flattens composite variables into dotted display names, each entry
//! tagged with a stable group id so a UI can expand composites lazily.
//! Resolution turns a variable's accumulated location contents into either a
//! register slot, a constant, or a sequence of address steps the evaluation
//! machine replays against debuggee memory.

use super::subroutine::{is_wasm_location, read_wasm_location, WasmLoc};
use super::utils::clone_string_attribute;
use super::DwarfReader;
use crate::debugger::error::Error;
use gimli::{AttributeValue, Reader, UnitOffset};
use std::collections::HashMap;

/// A variable as listed to the user: name, type and expansion group links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableName {
    pub name: String,
    pub display_name: String,
    pub type_name: String,
    pub group_id: i32,
    pub child_group_id: Option<i32>,
}

#[derive(Clone)]
pub(super) enum VariableExpression {
    Location(AttributeValue<DwarfReader>),
    ConstValue(Vec<u8>),
    Pointer,
}

/// One step of an address computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    /// Absolute address in linear memory.
    Address(u64),
    /// Relative displacement (member offsets).
    Offset(i64),
    /// Dereference: read a pointer at the address accumulated so far.
    Pointer,
}

#[derive(Clone)]
pub(super) enum TypeRef {
    Offset(UnitOffset),
    Description(String),
}

/// Base the location expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub(super) enum FrameBase {
    /// Function frame base taken from a wasm slot.
    Wasm(u64),
    /// Data-section base, used for globals and statics.
    Data(u64),
}

pub(super) struct SymbolVariable {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub contents: Vec<VariableExpression>,
    pub ty: TypeRef,
    pub group_id: i32,
    pub child_group_id: Option<i32>,
}

/// Stable group id assignment: ids are handed out once per (scope, path) key
/// and memoized for the container lifetime, so repeated enumeration at the
/// same instruction sees identical ids.
#[derive(Default)]
pub(super) struct GroupTable {
    next: i32,
    ids: HashMap<GroupKey, i32>,
}

#[derive(Debug, Hash, PartialEq, Eq)]
pub(super) enum GroupKey {
    /// Root group of a lexical scope or of a unit's global list.
    Scope { unit: usize, offset: Option<usize> },
    /// Expansion group of one composite variable, keyed by its flattened path.
    Members { root: i32, path: String },
}

const FIRST_GROUP_ID: i32 = 1000;

impl GroupTable {
    pub fn id(&mut self, key: GroupKey) -> i32 {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = FIRST_GROUP_ID + self.next;
        self.next += 1;
        self.ids.insert(key, id);
        id
    }
}

/// Collect all variables visible from `entry_offset` downward. Lexical blocks
/// are entered only when their range covers `code_offset`; namespaces become
/// expandable entries of their own.
pub(super) fn variables_in_unit_entry(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    unit_index: usize,
    entry_offset: Option<UnitOffset>,
    code_offset: u64,
    groups: &mut GroupTable,
) -> Result<(i32, Vec<SymbolVariable>), Error> {
    let root_group = groups.id(GroupKey::Scope {
        unit: unit_index,
        offset: entry_offset.map(|o| o.0),
    });

    let mut tree = unit.entries_tree(entry_offset)?;
    let root = tree.root()?;
    let mut variables = vec![];
    variables_rec(
        root,
        dwarf,
        unit,
        unit_index,
        code_offset,
        &mut variables,
        root_group,
        groups,
    )?;
    Ok((root_group, variables))
}

#[allow(clippy::too_many_arguments)]
fn variables_rec(
    node: gimli::EntriesTreeNode<DwarfReader>,
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    unit_index: usize,
    code_offset: u64,
    variables: &mut Vec<SymbolVariable>,
    group_id: i32,
    groups: &mut GroupTable,
) -> Result<(), Error> {
    let mut children = node.children();

    while let Some(child) = children.next()? {
        match child.entry().tag() {
            gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter => {
                let mut var = transform_variable(dwarf, unit, child.entry(), group_id)?;
                if let TypeRef::Offset(offset) = &var.ty {
                    let mut tree = unit.entries_tree(Some(*offset))?;
                    let root = tree.root()?;
                    let chain = var.contents.clone();
                    flatten_composite(root, dwarf, unit, &mut var, &chain, variables, groups)?;
                }
                variables.push(var);
            }
            gimli::DW_TAG_lexical_block => {
                let Some(AttributeValue::Addr(low_pc)) =
                    child.entry().attr_value(gimli::DW_AT_low_pc)?
                else {
                    continue;
                };
                let high_pc = match child.entry().attr_value(gimli::DW_AT_high_pc)? {
                    Some(AttributeValue::Udata(size)) => low_pc + size,
                    Some(AttributeValue::Addr(high_pc)) => high_pc,
                    _ => continue,
                };

                if (low_pc..high_pc).contains(&code_offset) {
                    variables_rec(
                        child,
                        dwarf,
                        unit,
                        unit_index,
                        code_offset,
                        variables,
                        group_id,
                        groups,
                    )?;
                }
            }
            gimli::DW_TAG_namespace => {
                let mut var = transform_namespace(dwarf, unit, child.entry(), group_id)?;
                let ns_group = groups.id(GroupKey::Scope {
                    unit: unit_index,
                    offset: Some(child.entry().offset().0),
                });
                var.child_group_id = Some(ns_group);
                variables_rec(
                    child,
                    dwarf,
                    unit,
                    unit_index,
                    code_offset,
                    variables,
                    ns_group,
                    groups,
                )?;
                variables.push(var);
            }
            _ => continue,
        }
    }
    Ok(())
}

/// Flatten the members of a composite variable into `parent.member` entries
/// and link the parent to its expansion group.
///
/// `chain` is the access path that reaches the composite's storage. Members
/// extend it with their own offsets; behind a pointer the chain grows a
/// dereference step while the pointer variable itself keeps its plain
/// location, so evaluating the pointer yields the scalar address.
fn flatten_composite(
    node: gimli::EntriesTreeNode<DwarfReader>,
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    parent: &mut SymbolVariable,
    chain: &[VariableExpression],
    variables: &mut Vec<SymbolVariable>,
    groups: &mut GroupTable,
) -> Result<(), Error> {
    match node.entry().tag() {
        gimli::DW_TAG_class_type | gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type => {
            let parent_path = parent
                .display_name
                .clone()
                .unwrap_or_else(|| "<unnamed>".to_string());
            let member_group = groups.id(GroupKey::Members {
                root: parent.group_id,
                path: parent_path.clone(),
            });
            parent.child_group_id = Some(member_group);

            let mut children = node.children();
            while let Some(child) = children.next()? {
                if child.entry().tag() != gimli::DW_TAG_member {
                    continue;
                }

                let member = transform_variable(dwarf, unit, child.entry(), member_group)?;
                let member_name = member.name.unwrap_or_else(|| "<unnamed>".to_string());

                let mut contents = chain.to_vec();
                contents.extend(member.contents);

                let mut member = SymbolVariable {
                    display_name: Some(format!("{parent_path}.{member_name}")),
                    name: Some(member_name),
                    contents,
                    ty: member.ty,
                    group_id: member_group,
                    child_group_id: None,
                };

                if let TypeRef::Offset(offset) = &member.ty {
                    let mut tree = unit.entries_tree(Some(*offset))?;
                    let root = tree.root()?;
                    let member_chain = member.contents.clone();
                    flatten_composite(
                        root,
                        dwarf,
                        unit,
                        &mut member,
                        &member_chain,
                        variables,
                        groups,
                    )?;
                }
                variables.push(member);
            }
        }
        gimli::DW_TAG_pointer_type | gimli::DW_TAG_reference_type => {
            let mut deref_chain = chain.to_vec();
            deref_chain.push(VariableExpression::Pointer);
            follow_type_ref(node, dwarf, unit, parent, &deref_chain, variables, groups)?;
        }
        gimli::DW_TAG_base_type => {}
        _ => {
            follow_type_ref(node, dwarf, unit, parent, chain, variables, groups)?;
        }
    }

    Ok(())
}

fn follow_type_ref(
    node: gimli::EntriesTreeNode<DwarfReader>,
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    parent: &mut SymbolVariable,
    chain: &[VariableExpression],
    variables: &mut Vec<SymbolVariable>,
    groups: &mut GroupTable,
) -> Result<(), Error> {
    if let Some(AttributeValue::UnitRef(offset)) = node.entry().attr_value(gimli::DW_AT_type)? {
        if node.entry().offset() != offset {
            let mut tree = unit.entries_tree(Some(offset))?;
            let root = tree.root()?;
            flatten_composite(root, dwarf, unit, parent, chain, variables, groups)?;
        }
    }
    Ok(())
}

fn transform_variable(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    group_id: i32,
) -> Result<SymbolVariable, Error> {
    let mut content = None;

    if let Some(location) = entry.attr_value(gimli::DW_AT_location)? {
        content = Some(VariableExpression::Location(location));
    } else if let Some(location) = entry.attr_value(gimli::DW_AT_data_member_location)? {
        content = Some(VariableExpression::Location(location));
    }

    if content.is_none() {
        if let Some(constant) = entry.attr_value(gimli::DW_AT_const_value)? {
            let bytes = match constant {
                AttributeValue::Block(block) => block.to_slice()?.to_vec(),
                AttributeValue::Data1(b) => vec![b],
                AttributeValue::Data2(b) => b.to_le_bytes().to_vec(),
                AttributeValue::Data4(b) => b.to_le_bytes().to_vec(),
                AttributeValue::Data8(b) => b.to_le_bytes().to_vec(),
                AttributeValue::Sdata(b) => b.to_le_bytes().to_vec(),
                AttributeValue::Udata(b) => b.to_le_bytes().to_vec(),
                AttributeValue::String(b) => b.to_slice()?.to_vec(),
                other => {
                    log::debug!(target: "debugger", "unsupported const form: {other:?}");
                    vec![]
                }
            };
            content = Some(VariableExpression::ConstValue(bytes));
        }
    }

    let name = match entry.attr_value(gimli::DW_AT_name)? {
        Some(name_attr) => Some(clone_string_attribute(dwarf, unit, name_attr)?),
        None => None,
    };

    let ty = match entry.attr_value(gimli::DW_AT_type)? {
        Some(AttributeValue::UnitRef(offset)) => TypeRef::Offset(offset),
        _ => TypeRef::Description("<unknown>".to_string()),
    };

    Ok(SymbolVariable {
        name: name.clone(),
        display_name: name,
        contents: content.into_iter().collect(),
        ty,
        group_id,
        child_group_id: None,
    })
}

fn transform_namespace(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    group_id: i32,
) -> Result<SymbolVariable, Error> {
    let name = match entry.attr_value(gimli::DW_AT_name)? {
        Some(name_attr) => Some(clone_string_attribute(dwarf, unit, name_attr)?),
        None => None,
    };

    Ok(SymbolVariable {
        name: name.clone(),
        display_name: name,
        contents: vec![],
        ty: TypeRef::Description("namespace".to_string()),
        group_id,
        child_group_id: None,
    })
}

/// How a resolved variable is reached at runtime.
pub(super) enum VariableAccess {
    /// Lives directly in a wasm slot, the value is read from the snapshot.
    Register(WasmLoc),
    /// Reached through a pointer held in a wasm slot: the slot value is the
    /// base address the remaining steps apply to.
    RegisterIndirect {
        loc: WasmLoc,
        steps: Vec<VariableLocation>,
    },
    /// Lives in linear memory behind a chain of address steps.
    Memory(Vec<VariableLocation>),
    /// Compile-time constant captured from the DIE.
    Const(Vec<u8>),
}

pub(super) struct ResolvedVariable {
    pub access: VariableAccess,
    pub ty: TypeRef,
}

/// Find a variable by display name and fold its contents into an access plan.
///
/// `->` is rewritten to `.` and a bare `x` also matches `this.x`, so C++
/// member shorthand works from the expression surface.
pub(super) fn resolve_variable(
    variables: &[SymbolVariable],
    name: &str,
    frame_base: FrameBase,
    encoding: gimli::Encoding,
) -> Result<ResolvedVariable, Error> {
    let name = name.replace("->", ".");
    let this_name = format!("this.{name}");

    let var = variables
        .iter()
        .find(|v| {
            v.display_name
                .as_ref()
                .is_some_and(|vname| *vname == name || *vname == this_name)
        })
        .ok_or_else(|| Error::VariableNotFound(name.clone()))?;

    let mut steps = Vec::new();
    let mut const_data = None;
    let mut register = None;

    for content in &var.contents {
        match content {
            VariableExpression::Location(location) => match location {
                AttributeValue::Exprloc(expr) => {
                    if is_wasm_location(location) {
                        register = Some(read_wasm_location(location.clone())?);
                        continue;
                    }
                    let address = evaluate_location_expression(expr.clone(), frame_base, encoding)?;
                    steps.push(VariableLocation::Address(address));
                }
                AttributeValue::Sdata(b) => steps.push(VariableLocation::Offset(*b)),
                AttributeValue::Udata(b) => steps.push(VariableLocation::Offset(*b as i64)),
                AttributeValue::Data1(b) => steps.push(VariableLocation::Offset(*b as i64)),
                AttributeValue::Data2(b) => steps.push(VariableLocation::Offset(*b as i64)),
                AttributeValue::Data4(b) => steps.push(VariableLocation::Offset(*b as i64)),
                AttributeValue::Data8(b) => steps.push(VariableLocation::Offset(*b as i64)),
                other => {
                    log::debug!(target: "debugger", "unsupported location form: {other:?}");
                    return Err(Error::EvalUnsupportedRequire("location form"));
                }
            },
            VariableExpression::ConstValue(bytes) => const_data = Some(bytes.clone()),
            VariableExpression::Pointer => steps.push(VariableLocation::Pointer),
        }
    }

    let access = match (register, const_data) {
        (Some(loc), _) if steps.is_empty() => VariableAccess::Register(loc),
        // a member behind a register-held pointer: the leading dereference is
        // absorbed by reading the slot, the rest of the chain stays
        (Some(loc), _) if steps.first() == Some(&VariableLocation::Pointer) => {
            VariableAccess::RegisterIndirect {
                loc,
                steps: steps.split_off(1),
            }
        }
        (Some(_), _) => return Err(Error::EvalUnsupportedRequire("register-relative member")),
        (None, Some(bytes)) if steps.is_empty() => VariableAccess::Const(bytes),
        (None, _) if steps.is_empty() => return Err(Error::NoVariableLocation),
        (None, _) => VariableAccess::Memory(steps),
    };

    Ok(ResolvedVariable {
        access,
        ty: var.ty.clone(),
    })
}

/// Run a DWARF location expression with the wasm frame-base conventions:
/// `DW_OP_fbreg` resumes with the frame base slot value, relocated addresses
/// resume against the data-section base.
fn evaluate_location_expression(
    expr: gimli::Expression<DwarfReader>,
    frame_base: FrameBase,
    encoding: gimli::Encoding,
) -> Result<u64, Error> {
    let mut evaluation = expr.evaluation(encoding);
    let mut result = evaluation.evaluate()?;

    loop {
        match result {
            gimli::EvaluationResult::Complete => break,
            gimli::EvaluationResult::RequiresFrameBase => {
                let FrameBase::Wasm(base) = frame_base else {
                    return Err(Error::NoFrameBase);
                };
                result = evaluation.resume_with_frame_base(base)?;
            }
            gimli::EvaluationResult::RequiresRelocatedAddress(addr) => {
                let base = match frame_base {
                    FrameBase::Data(base) => base,
                    FrameBase::Wasm(_) => 0,
                };
                result = evaluation.resume_with_relocated_address(addr + base)?;
            }
            ref other => {
                log::debug!(target: "debugger", "unsupported evaluation require: {other:?}");
                return Err(Error::EvalUnsupportedRequire("expression operation"));
            }
        }
    }

    let pieces = evaluation.result();
    let piece = pieces.first().ok_or(Error::NoVariableLocation)?;
    match piece.location {
        gimli::Location::Address { address } => Ok(address),
        ref other => {
            log::debug!(target: "debugger", "unsupported piece location: {other:?}");
            Err(Error::EvalUnsupportedRequire("piece location"))
        }
    }
}
