//! DWARF container behavior over the hand-assembled fixture module.

mod common;

use common::{fixture_module, FIXTURE_ROWS};
use wadbg::debugger::dwarf::DwarfContainer;
use wadbg::debugger::value::{ValueStores, WasmValue};

fn container() -> DwarfContainer {
    DwarfContainer::from_module(&fixture_module()).expect("fixture must parse")
}

/// Frame base (local 0) at 0x1000, pointer `p` (local 1) at 0x2000.
fn stores() -> ValueStores {
    ValueStores {
        stacks: vec![],
        locals: vec![WasmValue::I32(0x1000), WasmValue::I32(0x2000)],
        globals: vec![],
    }
}

#[test]
fn test_address_to_line_mapping() {
    let container = container();
    let base = container.code_base();

    let info = container.find_line_info(base + 0x10).unwrap();
    assert_eq!(info.file, "/build/main.cpp");
    assert_eq!(info.line, Some(4));

    // between rows the preceding row wins
    let info = container.find_line_info(base + 0x15).unwrap();
    assert_eq!(info.line, Some(5));

    // the end_sequence row is an exclusive bound
    assert!(container.find_line_info(base + 0x30).is_none());
}

#[test]
fn test_line_to_address_mapping() {
    let container = container();
    let base = container.code_base();

    assert_eq!(container.find_address("main.cpp", 4), Some(base + 0x10));
    assert_eq!(container.find_address("/build/main.cpp", 4), Some(base + 0x10));
    // no row for line 6, the next line of the file is taken
    assert_eq!(container.find_address("main.cpp", 6), Some(base + 0x20));
    assert_eq!(container.find_address("other.cpp", 4), None);
}

#[test]
fn test_roundtrip_address_line() {
    let container = container();

    for (_, line) in FIXTURE_ROWS {
        let address = container.find_address("main.cpp", *line).unwrap();
        let info = container.find_line_info(address).unwrap();
        assert!(info.line.unwrap() <= *line + 1);
        assert_eq!(info.file, "/build/main.cpp");
    }
}

#[test]
fn test_local_variable_listing() {
    let container = container();
    let base = container.code_base();

    let listing = container.local_variables(base + 0x10).unwrap();
    let roots: Vec<_> = listing.group(None).collect();
    let names: Vec<&str> = roots.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["x", "p", "pt"]);

    let x = roots.iter().find(|v| v.name == "x").unwrap();
    assert_eq!(x.type_name, "int");
    assert!(x.child_group_id.is_none());

    let p = roots.iter().find(|v| v.name == "p").unwrap();
    assert_eq!(p.type_name, "int*");

    // the struct is expandable and its members live in the child group
    let pt = roots.iter().find(|v| v.name == "pt").unwrap();
    assert_eq!(pt.type_name, "Point");
    let members_group = pt.child_group_id.expect("composite must be expandable");

    let members: Vec<_> = listing.group(Some(members_group)).collect();
    let member_names: Vec<&str> = members.iter().map(|v| v.display_name.as_str()).collect();
    assert_eq!(member_names, vec!["pt.x", "pt.y"]);
}

#[test]
fn test_variable_listing_is_stable_across_queries() {
    let container = container();
    let base = container.code_base();

    let triples = |listing: &wadbg::debugger::dwarf::VariableEnumeration| {
        listing
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.type_name.clone(), v.child_group_id))
            .collect::<Vec<_>>()
    };

    let first = container.local_variables(base + 0x10).unwrap();
    let second = container.local_variables(base + 0x10).unwrap();
    assert_eq!(first.root_group, second.root_group);
    assert_eq!(triples(&first), triples(&second));
}

#[test]
fn test_global_variable_listing() {
    let container = container();
    let base = container.code_base();

    let listing = container.global_variables(base + 0x10).unwrap();
    let names: Vec<&str> = listing.group(None).map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"g"));
}

#[test]
fn test_memory_variable_evaluation() {
    let container = container();
    let base = container.code_base();

    // x lives at frame base + 8 = 0x1008
    let mut eval = container.evaluate("x", &stores(), base + 0x10).unwrap();

    let slice = eval.required_slice().expect("x lives in memory");
    assert_eq!(slice.address, 0x1008);

    eval.provide(123i32.to_le_bytes().to_vec()).unwrap();
    assert!(eval.required_slice().is_none());
    assert_eq!(eval.finish().unwrap(), "(int)123");
}

#[test]
fn test_register_variable_evaluation() {
    let container = container();
    let base = container.code_base();

    // p is held directly in local 1, no memory involved
    let mut eval = container.evaluate("p", &stores(), base + 0x10).unwrap();
    assert!(eval.required_slice().is_none());
    assert_eq!(eval.finish().unwrap(), "(int*)0x2000");
}

#[test]
fn test_pointer_dereference_evaluation() {
    let container = container();
    let base = container.code_base();

    // *p: the register value is the address, one slice for the pointee
    let mut eval = container.evaluate("*p", &stores(), base + 0x10).unwrap();

    let slice = eval.required_slice().unwrap();
    assert_eq!(slice.address, 0x2000);

    eval.provide(7i32.to_le_bytes().to_vec()).unwrap();
    assert!(eval.required_slice().is_none());
    assert_eq!(eval.finish().unwrap(), "(int)7");
}

#[test]
fn test_member_access_evaluation() {
    let container = container();
    let base = container.code_base();

    // pt.y = frame base + 16 + member offset 4
    let mut eval = container.evaluate("pt.y", &stores(), base + 0x10).unwrap();

    let slice = eval.required_slice().unwrap();
    assert_eq!(slice.address, 0x1014);

    eval.provide((-5i32).to_le_bytes().to_vec()).unwrap();
    assert_eq!(eval.finish().unwrap(), "(int)-5");
}

#[test]
fn test_global_evaluation_uses_data_base() {
    let container = container();
    let base = container.code_base();

    // g sits at DW_OP_addr 0x40, the fixture has no data-section offset
    let mut eval = container
        .evaluate_global("g", &stores(), base + 0x10)
        .unwrap();

    let slice = eval.required_slice().unwrap();
    assert_eq!(slice.address, 0x40);

    eval.provide(11i32.to_le_bytes().to_vec()).unwrap();
    assert_eq!(eval.finish().unwrap(), "(int)11");
}

#[test]
fn test_unknown_variable_is_rejected() {
    let container = container();
    let base = container.code_base();

    assert!(container.evaluate("nope", &stores(), base + 0x10).is_err());
}
