//! Type resolution and value rendering.
//!
//! A [`TypeView`] is the flattened picture of a DIE type reference: modifiers
//! and typedefs are traversed, what remains is a base type, a pointer, or a
//! composite. Rendering follows the DWARF encoding of the base type; integers
//! wider than 64 bits go through bigints.

use super::utils::clone_string_attribute;
use super::DwarfReader;
use crate::debugger::error::Error;
use gimli::{AttributeValue, UnitOffset};
use num_bigint::{BigInt, BigUint};

/// Flattened view of a concrete type.
pub(super) struct TypeView {
    pub name: String,
    pub byte_size: usize,
    pub encoding: gimli::DwAte,
    pub tag: gimli::DwTag,
    pub members: Vec<String>,
    /// For pointers: DIE offset of the pointee, `None` for `void*`.
    pub pointee: Option<UnitOffset>,
    /// For arrays: DIE offset of the element type.
    pub element: Option<UnitOffset>,
}

/// Resolve a type reference into a [`TypeView`], walking through typedefs and
/// cv-qualifiers.
pub(super) fn type_view(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    offset: UnitOffset,
) -> Result<TypeView, Error> {
    let mut tree = unit.entries_tree(Some(offset))?;
    let node = tree.root()?;
    let entry = node.entry();
    let address_size = unit.header.address_size() as usize;

    match entry.tag() {
        gimli::DW_TAG_base_type => {
            let name = name_or(dwarf, unit, entry, "<no type name>")?;
            let byte_size = entry
                .attr_value(gimli::DW_AT_byte_size)?
                .and_then(|attr| attr.udata_value())
                .unwrap_or(address_size as u64) as usize;
            let encoding = entry
                .attr_value(gimli::DW_AT_encoding)?
                .and_then(|attr| match attr {
                    AttributeValue::Encoding(encoding) => Some(encoding),
                    _ => None,
                })
                .unwrap_or(gimli::DW_ATE_unsigned);

            Ok(TypeView {
                name,
                byte_size,
                encoding,
                tag: gimli::DW_TAG_base_type,
                members: vec![],
                pointee: None,
                element: None,
            })
        }
        gimli::DW_TAG_pointer_type | gimli::DW_TAG_reference_type => {
            let pointee = type_ref(entry)?;
            let pointee_name = match pointee {
                Some(offset) => type_name(dwarf, unit, Some(offset))?,
                None => "void".to_string(),
            };
            Ok(TypeView {
                name: format!("{pointee_name}*"),
                byte_size: address_size,
                encoding: gimli::DW_ATE_address,
                tag: gimli::DW_TAG_pointer_type,
                members: vec![],
                pointee,
                element: None,
            })
        }
        gimli::DW_TAG_class_type | gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type => {
            let tag = entry.tag();
            let name = name_or(dwarf, unit, entry, "<no type name>")?;
            let byte_size = entry
                .attr_value(gimli::DW_AT_byte_size)?
                .and_then(|attr| attr.udata_value())
                .unwrap_or(0) as usize;

            let mut members = vec![];
            let mut children = node.children();
            while let Some(child) = children.next()? {
                if child.entry().tag() != gimli::DW_TAG_member {
                    continue;
                }
                members.push(name_or(dwarf, unit, child.entry(), "<no member name>")?);
            }

            Ok(TypeView {
                name,
                byte_size,
                encoding: gimli::DW_ATE_signed,
                tag,
                members,
                pointee: None,
                element: None,
            })
        }
        gimli::DW_TAG_array_type => {
            let element = type_ref(entry)?;
            let element_name = match element {
                Some(offset) => type_name(dwarf, unit, Some(offset))?,
                None => "<unknown>".to_string(),
            };
            let element_size = match element {
                Some(offset) => type_view(dwarf, unit, offset)?.byte_size,
                None => 0,
            };
            Ok(TypeView {
                name: format!("{element_name}[]"),
                byte_size: element_size,
                encoding: gimli::DW_ATE_unsigned,
                tag: gimli::DW_TAG_array_type,
                members: vec![],
                pointee: None,
                element,
            })
        }
        gimli::DW_TAG_enumeration_type => {
            let name = name_or(dwarf, unit, entry, "<no type name>")?;
            let byte_size = entry
                .attr_value(gimli::DW_AT_byte_size)?
                .and_then(|attr| attr.udata_value())
                .unwrap_or(4) as usize;
            Ok(TypeView {
                name,
                byte_size,
                encoding: gimli::DW_ATE_signed,
                tag: gimli::DW_TAG_base_type,
                members: vec![],
                pointee: None,
                element: None,
            })
        }
        // typedefs and cv-qualifiers are transparent
        _ => match type_ref(entry)? {
            Some(next) if next != offset => type_view(dwarf, unit, next),
            _ => Err(Error::TypeNotFound),
        },
    }
}

fn type_ref(
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
) -> Result<Option<UnitOffset>, Error> {
    match entry.attr_value(gimli::DW_AT_type)? {
        Some(AttributeValue::UnitRef(offset)) => Ok(Some(offset)),
        _ => Ok(None),
    }
}

fn name_or(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    entry: &gimli::DebuggingInformationEntry<DwarfReader>,
    fallback: &str,
) -> Result<String, Error> {
    match entry.attr_value(gimli::DW_AT_name)? {
        Some(attr) => clone_string_attribute(dwarf, unit, attr),
        None => Ok(fallback.to_string()),
    }
}

/// Human-readable name of a type reference, `void` when absent.
pub(super) fn type_name(
    dwarf: &gimli::Dwarf<DwarfReader>,
    unit: &gimli::Unit<DwarfReader>,
    offset: Option<UnitOffset>,
) -> Result<String, Error> {
    let Some(offset) = offset else {
        return Ok("void".to_string());
    };

    let mut tree = unit.entries_tree(Some(offset))?;
    let node = tree.root()?;
    let entry = node.entry();

    if let Some(attr) = entry.attr_value(gimli::DW_AT_name)? {
        return clone_string_attribute(dwarf, unit, attr);
    }

    match entry.tag() {
        gimli::DW_TAG_pointer_type | gimli::DW_TAG_reference_type => {
            let inner = type_name(dwarf, unit, type_ref(entry)?)?;
            Ok(format!("{inner}*"))
        }
        gimli::DW_TAG_array_type => {
            let inner = type_name(dwarf, unit, type_ref(entry)?)?;
            Ok(format!("{inner}[]"))
        }
        _ => match type_ref(entry)? {
            Some(next) if next != offset => type_name(dwarf, unit, Some(next)),
            _ => Ok("<unknown>".to_string()),
        },
    }
}

/// Render fetched bytes according to the type view, `(type)value` style.
pub(super) fn format_value(view: &TypeView, bytes: &[u8]) -> Result<String, Error> {
    let name = &view.name;

    if bytes.len() < view.byte_size {
        return Err(Error::TypeBinaryRepr(name.clone()));
    }
    let bytes = &bytes[..view.byte_size];

    match view.tag {
        gimli::DW_TAG_pointer_type => {
            let mut raw = [0u8; 8];
            raw[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
            Ok(format!("({name})0x{:x}", u64::from_le_bytes(raw)))
        }
        gimli::DW_TAG_base_type => match view.encoding {
            gimli::DW_ATE_signed | gimli::DW_ATE_signed_char => {
                let value = BigInt::from_signed_bytes_le(bytes);
                Ok(format!("({name}){value}"))
            }
            gimli::DW_ATE_unsigned | gimli::DW_ATE_unsigned_char => {
                let value = BigUint::from_bytes_le(bytes);
                Ok(format!("({name}){value}"))
            }
            gimli::DW_ATE_boolean => {
                let value = bytes.first().copied().unwrap_or(0) != 0;
                Ok(format!("({name}){value}"))
            }
            gimli::DW_ATE_address => {
                let mut raw = [0u8; 8];
                raw[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
                Ok(format!("({name})0x{:x}", u64::from_le_bytes(raw)))
            }
            gimli::DW_ATE_float => match view.byte_size {
                4 => {
                    let value = f32::from_le_bytes(bytes.try_into().expect("4 bytes"));
                    Ok(format!("({name}){value}"))
                }
                8 => {
                    let value = f64::from_le_bytes(bytes.try_into().expect("8 bytes"));
                    Ok(format!("({name}){value}"))
                }
                _ => Err(Error::TypeBinaryRepr(name.clone())),
            },
            _ => Err(Error::TypeBinaryRepr(name.clone())),
        },
        gimli::DW_TAG_class_type | gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type => {
            Ok(format!("{name} {{ {} }}", view.members.join(", ")))
        }
        _ => Err(Error::TypeBinaryRepr(name.clone())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_view(name: &str, byte_size: usize, encoding: gimli::DwAte) -> TypeView {
        TypeView {
            name: name.to_string(),
            byte_size,
            encoding,
            tag: gimli::DW_TAG_base_type,
            members: vec![],
            pointee: None,
            element: None,
        }
    }

    #[test]
    fn test_signed_rendering() {
        let view = base_view("int", 4, gimli::DW_ATE_signed);
        assert_eq!(format_value(&view, &(-7i32).to_le_bytes()).unwrap(), "(int)-7");
    }

    #[test]
    fn test_unsigned_and_bool_rendering() {
        let view = base_view("unsigned int", 4, gimli::DW_ATE_unsigned);
        assert_eq!(
            format_value(&view, &3_000_000_000u32.to_le_bytes()).unwrap(),
            "(unsigned int)3000000000"
        );

        let view = base_view("bool", 1, gimli::DW_ATE_boolean);
        assert_eq!(format_value(&view, &[1]).unwrap(), "(bool)true");
        assert_eq!(format_value(&view, &[0]).unwrap(), "(bool)false");
    }

    #[test]
    fn test_float_rendering() {
        let view = base_view("double", 8, gimli::DW_ATE_float);
        assert_eq!(format_value(&view, &2.5f64.to_le_bytes()).unwrap(), "(double)2.5");
    }

    #[test]
    fn test_pointer_rendering() {
        let view = TypeView {
            name: "int*".to_string(),
            byte_size: 4,
            encoding: gimli::DW_ATE_address,
            tag: gimli::DW_TAG_pointer_type,
            members: vec![],
            pointee: None,
            element: None,
        };
        assert_eq!(format_value(&view, &0x1000u32.to_le_bytes()).unwrap(), "(int*)0x1000");
    }

    #[test]
    fn test_struct_rendering() {
        let view = TypeView {
            name: "Point".to_string(),
            byte_size: 8,
            encoding: gimli::DW_ATE_signed,
            tag: gimli::DW_TAG_structure_type,
            members: vec!["x".to_string(), "y".to_string()],
            pointee: None,
            element: None,
        };
        assert_eq!(format_value(&view, &[0; 8]).unwrap(), "Point { x, y }");
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let view = base_view("int", 4, gimli::DW_ATE_signed);
        assert!(format_value(&view, &[1, 2]).is_err());
    }
}
