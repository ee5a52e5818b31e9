//! Shared test support: an in-memory wasm module with hand-written DWARF, a
//! scripted CDP transport and an event-recording hook. No browser and no
//! compiler toolchain are involved, everything the session sees is assembled
//! here byte by byte.

#![allow(dead_code)]

use base64::Engine;
use gimli::write::{
    Address, AttributeValue, DwarfUnit, EndianVec, Expression, LineProgram, LineString, Sections,
};
use gimli::{Encoding, Format, LineEncoding, LittleEndian};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wadbg::cdp::transport::{CdpTransport, TransportError};
use wadbg::cdp::types::CdpEvent;
use wadbg::debugger::{
    DebugSession, EventHook, ResolvedBreakpoint, SourcePlace, StopReason,
};

pub const DW_OP_WASM_LOCATION: u8 = 0xed;
pub const DW_OP_FBREG: u8 = 0x91;
pub const DW_OP_ADDR: u8 = 0x03;

/// Line table description: (address, line) rows of `main.cpp`, one sequence.
pub const FIXTURE_ROWS: &[(u64, u64)] = &[(0x10, 4), (0x12, 4), (0x14, 5), (0x20, 9)];
pub const FIXTURE_END: u64 = 0x30;

/// Build a syntactically valid wasm module that embeds DWARF for one
/// compilation unit `/build/main.cpp` with:
///   * the line rows of [`FIXTURE_ROWS`] (code-section relative addresses);
///   * `main` covering 0x10..0x30, frame base in wasm local 0;
///   * `x: int` at frame base + 8;
///   * `p: int*` held directly in wasm local 1;
///   * `pt: Point { x, y }` at frame base + 16;
///   * a global `g: int` at data address 0x40.
pub fn fixture_module() -> Vec<u8> {
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 4,
    };
    let mut dwarf = DwarfUnit::new(encoding);

    let comp_dir = LineString::String(b"/build".to_vec());
    let comp_file = LineString::String(b"main.cpp".to_vec());
    let mut program = LineProgram::new(
        encoding,
        LineEncoding::default(),
        comp_dir,
        comp_file,
        None,
    );
    let dir_id = program.default_directory();
    let file_id = program.add_file(LineString::String(b"main.cpp".to_vec()), dir_id, None);

    program.begin_sequence(Some(Address::Constant(FIXTURE_ROWS[0].0)));
    for (address, line) in FIXTURE_ROWS {
        program.row().address_offset = address - FIXTURE_ROWS[0].0;
        program.row().file = file_id;
        program.row().line = *line;
        program.row().column = 1;
        program.row().is_statement = true;
        program.generate_row();
    }
    program.end_sequence(FIXTURE_END - FIXTURE_ROWS[0].0);
    dwarf.unit.line_program = program;

    let root = dwarf.unit.root();
    {
        let root_die = dwarf.unit.get_mut(root);
        root_die.set(
            gimli::DW_AT_name,
            AttributeValue::String(b"main.cpp".to_vec()),
        );
        root_die.set(
            gimli::DW_AT_comp_dir,
            AttributeValue::String(b"/build".to_vec()),
        );
        root_die.set(
            gimli::DW_AT_low_pc,
            AttributeValue::Address(Address::Constant(0)),
        );
    }

    let int_type = dwarf.unit.add(root, gimli::DW_TAG_base_type);
    {
        let die = dwarf.unit.get_mut(int_type);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"int".to_vec()));
        die.set(gimli::DW_AT_byte_size, AttributeValue::Data1(4));
        die.set(
            gimli::DW_AT_encoding,
            AttributeValue::Encoding(gimli::DW_ATE_signed),
        );
    }

    let int_ptr_type = dwarf.unit.add(root, gimli::DW_TAG_pointer_type);
    dwarf
        .unit
        .get_mut(int_ptr_type)
        .set(gimli::DW_AT_type, AttributeValue::UnitRef(int_type));

    let point_type = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
    {
        let die = dwarf.unit.get_mut(point_type);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"Point".to_vec()));
        die.set(gimli::DW_AT_byte_size, AttributeValue::Data1(8));
    }
    for (name, offset) in [("x", 0u64), ("y", 4u64)] {
        let member = dwarf.unit.add(point_type, gimli::DW_TAG_member);
        let die = dwarf.unit.get_mut(member);
        die.set(
            gimli::DW_AT_name,
            AttributeValue::String(name.as_bytes().to_vec()),
        );
        die.set(gimli::DW_AT_type, AttributeValue::UnitRef(int_type));
        die.set(
            gimli::DW_AT_data_member_location,
            AttributeValue::Udata(offset),
        );
    }

    let subprogram = dwarf.unit.add(root, gimli::DW_TAG_subprogram);
    {
        let die = dwarf.unit.get_mut(subprogram);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"main".to_vec()));
        die.set(
            gimli::DW_AT_low_pc,
            AttributeValue::Address(Address::Constant(FIXTURE_ROWS[0].0)),
        );
        die.set(
            gimli::DW_AT_high_pc,
            AttributeValue::Udata(FIXTURE_END - FIXTURE_ROWS[0].0),
        );
        die.set(
            gimli::DW_AT_frame_base,
            AttributeValue::Exprloc(Expression::raw(vec![DW_OP_WASM_LOCATION, 0x00, 0x00])),
        );
    }

    // x: int, in memory at frame base + 8
    let var_x = dwarf.unit.add(subprogram, gimli::DW_TAG_variable);
    {
        let die = dwarf.unit.get_mut(var_x);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"x".to_vec()));
        die.set(gimli::DW_AT_type, AttributeValue::UnitRef(int_type));
        die.set(
            gimli::DW_AT_location,
            AttributeValue::Exprloc(Expression::raw(vec![DW_OP_FBREG, 0x08])),
        );
    }

    // p: int*, lives directly in wasm local 1
    let var_p = dwarf.unit.add(subprogram, gimli::DW_TAG_variable);
    {
        let die = dwarf.unit.get_mut(var_p);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"p".to_vec()));
        die.set(gimli::DW_AT_type, AttributeValue::UnitRef(int_ptr_type));
        die.set(
            gimli::DW_AT_location,
            AttributeValue::Exprloc(Expression::raw(vec![DW_OP_WASM_LOCATION, 0x00, 0x01])),
        );
    }

    // pt: Point, in memory at frame base + 16
    let var_pt = dwarf.unit.add(subprogram, gimli::DW_TAG_variable);
    {
        let die = dwarf.unit.get_mut(var_pt);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"pt".to_vec()));
        die.set(gimli::DW_AT_type, AttributeValue::UnitRef(point_type));
        die.set(
            gimli::DW_AT_location,
            AttributeValue::Exprloc(Expression::raw(vec![DW_OP_FBREG, 0x10])),
        );
    }

    // g: int, a global at data address 0x40
    let var_g = dwarf.unit.add(root, gimli::DW_TAG_variable);
    {
        let die = dwarf.unit.get_mut(var_g);
        die.set(gimli::DW_AT_name, AttributeValue::String(b"g".to_vec()));
        die.set(gimli::DW_AT_type, AttributeValue::UnitRef(int_type));
        die.set(
            gimli::DW_AT_location,
            AttributeValue::Exprloc(Expression::raw(vec![
                DW_OP_ADDR,
                0x40,
                0x00,
                0x00,
                0x00,
            ])),
        );
    }

    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).expect("dwarf must serialize");

    let mut custom_sections: Vec<(String, Vec<u8>)> = Vec::new();
    sections
        .for_each(|id, data| {
            if !data.slice().is_empty() {
                custom_sections.push((id.name().to_string(), data.slice().to_vec()));
            }
            Ok::<(), gimli::Error>(())
        })
        .expect("sections must iterate");

    wasm_module(&custom_sections)
}

/// Assemble a minimal valid module: one empty function plus custom sections.
fn wasm_module(custom_sections: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut module = b"\0asm\x01\0\0\0".to_vec();

    // type section: one () -> () signature
    module.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
    // function section: one function of type 0
    module.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    // code section: one empty body
    module.extend_from_slice(&[0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b]);

    for (name, payload) in custom_sections {
        let mut content = Vec::new();
        push_leb128(&mut content, name.len() as u64);
        content.extend_from_slice(name.as_bytes());
        content.extend_from_slice(payload);

        module.push(0x00);
        push_leb128(&mut module, content.len() as u64);
        module.extend_from_slice(&content);
    }
    module
}

fn push_leb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

// ------------------------------ scripted transport -----------------------------------------------

#[derive(Clone, Default)]
pub struct MockState {
    /// Events injected by the test, drained by the I/O thread.
    pub injected: Arc<Mutex<VecDeque<String>>>,
    /// Every command the session sent, in order.
    pub sent: Arc<Mutex<Vec<Value>>>,
}

impl MockState {
    pub fn push_event(&self, session_id: &str, method: &str, params: Value) {
        let mut message = json!({ "method": method, "params": params });
        if !session_id.is_empty() {
            message["sessionId"] = json!(session_id);
        }
        self.injected
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.get("method").and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }

    pub fn count_sent(&self, method: &str) -> usize {
        self.sent_methods().iter().filter(|m| *m == method).count()
    }
}

/// A CDP endpoint played from a script: module bytes for `getScriptSource`,
/// a linear memory image for `evaluateOnCallFrame` reads, canned
/// `getProperties` listings, and auto-acknowledgement for everything else.
pub struct MockTransport {
    state: MockState,
    responses: VecDeque<String>,
    module: Vec<u8>,
    memory: HashMap<u64, Vec<u8>>,
    properties: HashMap<String, Value>,
    next_raw_breakpoint: u64,
}

impl MockTransport {
    pub fn new(module: Vec<u8>) -> (Self, MockState) {
        let state = MockState::default();
        (
            Self {
                state: state.clone(),
                responses: VecDeque::new(),
                module,
                memory: HashMap::new(),
                properties: HashMap::new(),
                next_raw_breakpoint: 0,
            },
            state,
        )
    }

    /// Place bytes at an absolute linear-memory address.
    pub fn with_memory(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.memory.insert(address, bytes);
        self
    }

    /// Canned `Runtime.getProperties` result for an object id.
    pub fn with_properties(mut self, object_id: &str, result: Value) -> Self {
        self.properties.insert(object_id.to_string(), result);
        self
    }

    fn respond(&mut self, id: u64, result: Value) {
        self.responses
            .push_back(json!({ "id": id, "result": result }).to_string());
    }

    fn read_memory(&self, from: u64, to: u64) -> Value {
        let mut bytes = vec![0u8; (to - from) as usize];
        for (base, image) in &self.memory {
            for (i, byte) in image.iter().enumerate() {
                let address = base + i as u64;
                if address >= from && address < to {
                    bytes[(address - from) as usize] = *byte;
                }
            }
        }
        json!(bytes)
    }
}

impl CdpTransport for MockTransport {
    fn poll_message(&mut self) -> Result<Option<String>, TransportError> {
        if let Some(response) = self.responses.pop_front() {
            return Ok(Some(response));
        }
        Ok(self.state.injected.lock().unwrap().pop_front())
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let message: Value = serde_json::from_str(text).expect("commands are json");
        self.state.sent.lock().unwrap().push(message.clone());

        let id = message["id"].as_u64().expect("commands carry an id");
        let method = message["method"].as_str().unwrap_or_default().to_string();
        let params = message.get("params").cloned().unwrap_or(json!({}));

        match method.as_str() {
            "Debugger.getScriptSource" => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.module);
                self.respond(id, json!({ "bytecode": encoded }));
            }
            "Debugger.setBreakpoint" => {
                let raw = format!("raw:{}", self.next_raw_breakpoint);
                self.next_raw_breakpoint += 1;
                self.respond(
                    id,
                    json!({ "breakpointId": raw, "actualLocation": params["location"] }),
                );
            }
            "Debugger.evaluateOnCallFrame" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                let range = expression
                    .split_once("subarray(")
                    .and_then(|(_, rest)| rest.strip_suffix(')'))
                    .and_then(|args| args.split_once(','))
                    .and_then(|(a, b)| {
                        Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?))
                    });
                match range {
                    Some((from, to)) => {
                        let bytes = self.read_memory(from, to);
                        self.respond(id, json!({ "result": { "type": "object", "value": bytes } }));
                    }
                    None => self.respond(id, json!({ "result": { "type": "undefined" } })),
                }
            }
            "Runtime.getProperties" => {
                let object_id = params["objectId"].as_str().unwrap_or_default();
                let result = self
                    .properties
                    .get(object_id)
                    .cloned()
                    .unwrap_or(json!([]));
                self.respond(id, json!({ "result": result }));
            }
            _ => self.respond(id, json!({})),
        }
        Ok(())
    }
}

// ------------------------------ recording hook ---------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    Stopped {
        reason: StopReason,
        thread_id: u32,
        place: Option<SourcePlace>,
    },
    Continued(u32),
    ThreadStarted(u32),
    ThreadExited(u32),
    BreakpointChanged(ResolvedBreakpoint),
    Output(String),
    Terminated,
}

#[derive(Default)]
pub struct RecordingHook {
    events: std::cell::RefCell<Vec<HookEvent>>,
}

impl RecordingHook {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.borrow().clone()
    }

    pub fn stopped_events(&self) -> Vec<HookEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, HookEvent::Stopped { .. }))
            .collect()
    }
}

impl EventHook for RecordingHook {
    fn on_stopped(
        &self,
        reason: StopReason,
        thread_id: u32,
        place: Option<&SourcePlace>,
    ) -> anyhow::Result<()> {
        self.events.borrow_mut().push(HookEvent::Stopped {
            reason,
            thread_id,
            place: place.cloned(),
        });
        Ok(())
    }

    fn on_continued(&self, thread_id: u32) {
        self.events.borrow_mut().push(HookEvent::Continued(thread_id));
    }

    fn on_thread_started(&self, thread_id: u32) {
        self.events
            .borrow_mut()
            .push(HookEvent::ThreadStarted(thread_id));
    }

    fn on_thread_exited(&self, thread_id: u32) {
        self.events
            .borrow_mut()
            .push(HookEvent::ThreadExited(thread_id));
    }

    fn on_breakpoint_changed(&self, breakpoint: &ResolvedBreakpoint) {
        self.events
            .borrow_mut()
            .push(HookEvent::BreakpointChanged(breakpoint.clone()));
    }

    fn on_output(&self, text: &str) {
        self.events.borrow_mut().push(HookEvent::Output(text.to_string()));
    }

    fn on_terminated(&self) {
        self.events.borrow_mut().push(HookEvent::Terminated);
    }
}

// ------------------------------ session driving --------------------------------------------------

/// Feed queued CDP events into the session until the connection goes quiet.
pub fn drain(session: &mut DebugSession<RecordingHook>, events: &Receiver<CdpEvent>) {
    while let Ok(event) = events.recv_timeout(Duration::from_millis(300)) {
        session.handle_event(event);
    }
}

/// A `Debugger.paused` payload with one wasm frame at a module byte offset.
pub fn paused_params(script_id: &str, byte_offset: u64, hit_breakpoints: Vec<String>) -> Value {
    paused_params_with_scopes(script_id, byte_offset, hit_breakpoints, json!([]))
}

pub fn paused_params_with_scopes(
    script_id: &str,
    byte_offset: u64,
    hit_breakpoints: Vec<String>,
    scope_chain: Value,
) -> Value {
    json!({
        "callFrames": [{
            "callFrameId": "frame:0",
            "functionName": "main",
            "location": {
                "scriptId": script_id,
                "lineNumber": 0,
                "columnNumber": byte_offset,
            },
            "scopeChain": scope_chain,
        }],
        "reason": "other",
        "hitBreakpoints": hit_breakpoints,
    })
}

pub fn script_parsed_params(script_id: &str, url: &str, wasm: bool) -> Value {
    let mut params = json!({ "scriptId": script_id, "url": url });
    if wasm {
        params["scriptLanguage"] = json!("WebAssembly");
    }
    params
}
