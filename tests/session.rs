//! Coordinator scenarios over a scripted CDP endpoint.

mod common;

use common::{
    drain, fixture_module, paused_params, script_parsed_params, HookEvent, MockTransport,
    RecordingHook,
};
use serde_json::json;
use std::rc::Rc;
use wadbg::cdp::CdpClient;
use wadbg::cdp::types::CdpEvent;
use wadbg::debugger::{DebugSession, FileLocation, StopReason};

/// Spin up a session over the fixture module. Returns the session, the mock
/// state handle and the event queue feeding the session loop.
fn session() -> (
    DebugSession<RecordingHook>,
    common::MockState,
    std::sync::mpsc::Receiver<CdpEvent>,
) {
    let (transport, state) = MockTransport::new(fixture_module());
    let (client, events) = CdpClient::start(Box::new(transport));
    let session = DebugSession::new(Rc::new(client), RecordingHook::default(), None);
    (session, state, events)
}

/// Module byte offset of a code-section relative address in the fixture.
fn module_offset(address: u64) -> u64 {
    let container =
        wadbg::debugger::dwarf::DwarfContainer::from_module(&fixture_module()).unwrap();
    container.code_base() + address
}

#[test]
fn test_breakpoint_before_module_load() {
    let (mut session, state, events) = session();

    let bp = session.set_break_point(FileLocation::new("main.cpp", 4));
    assert_eq!(bp.id, 0);
    assert!(!bp.verified);

    // the module arrives afterwards
    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    drain(&mut session, &events);

    let listed = session.break_points_list(Some(&FileLocation::new("main.cpp", 4)));
    assert_eq!(listed.len(), 1);
    assert!(listed[0].verified);
    assert_eq!(listed[0].id, 0);
    assert!(listed[0].raw_id.is_some());

    let changed = session
        .hook()
        .events()
        .into_iter()
        .any(|e| matches!(e, HookEvent::BreakpointChanged(bp) if bp.verified && bp.id == 0));
    assert!(changed, "a BreakpointChanged event must be emitted");

    assert_eq!(state.count_sent("Debugger.setBreakpoint"), 1);
}

#[test]
fn test_breakpoint_ids_are_monotonic_and_independent() {
    let (mut session, _state, _events) = session();

    let first = session.set_break_point(FileLocation::new("main.cpp", 4));
    let second = session.set_break_point(FileLocation::new("main.cpp", 4));
    assert_eq!(first.id, 0);
    assert_eq!(second.id, 1);

    session.remove_break_point(first.id).unwrap();
    let left = session.break_points_list(None);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, 1);
    session.remove_break_point(second.id).unwrap();
    assert!(session.break_points_list(None).is_empty());
}

#[test]
fn test_step_over_deduplication() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    // byte 0x10 and 0x12 both map to main.cpp:4, 0x14 maps to line 5
    state.push_event("", "Debugger.paused", paused_params("42", module_offset(0x10), vec![]));
    drain(&mut session, &events);

    assert_eq!(session.hook().stopped_events().len(), 1);

    session.step_over(None).unwrap();
    assert_eq!(state.count_sent("Debugger.stepOver"), 1);

    // still the same source line: the step is re-issued, nothing surfaces
    state.push_event("", "Debugger.paused", paused_params("42", module_offset(0x12), vec![]));
    drain(&mut session, &events);
    assert_eq!(session.hook().stopped_events().len(), 1);
    assert_eq!(state.count_sent("Debugger.stepOver"), 2);

    // next line: exactly one new stop surfaces
    state.push_event("", "Debugger.paused", paused_params("42", module_offset(0x14), vec![]));
    drain(&mut session, &events);

    let stops = session.hook().stopped_events();
    assert_eq!(stops.len(), 2);
    let HookEvent::Stopped { reason, place, .. } = stops.last().unwrap().clone() else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::Step);
    let place = place.unwrap();
    assert_eq!(place.file, "/build/main.cpp");
    assert_eq!(place.line, Some(5));
}

#[test]
fn test_breakpoint_stop_reason_and_frame_instruction() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    let offset = module_offset(0x10);
    state.push_event(
        "",
        "Debugger.paused",
        paused_params("42", offset, vec!["raw:0".to_string()]),
    );
    drain(&mut session, &events);

    let stops = session.hook().stopped_events();
    let HookEvent::Stopped { reason, .. } = stops[0].clone() else {
        unreachable!()
    };
    assert_eq!(reason, StopReason::Breakpoint);

    let frames = session.get_stack_frames(None).unwrap();
    assert!(!frames.is_empty());
    assert_eq!(frames[0].instruction, offset);
    assert_eq!(frames[0].function_name, "main");
}

#[test]
fn test_instrumentation_pause_resumes_silently() {
    let (mut session, state, events) = session();

    let mut params = paused_params("42", 0, vec![]);
    params["reason"] = json!("instrumentation");
    state.push_event("", "Debugger.paused", params);
    drain(&mut session, &events);

    assert!(session.hook().stopped_events().is_empty());
    assert_eq!(state.count_sent("Debugger.resume"), 1);
    assert!(session.get_stack_frames(None).is_err());
}

#[test]
fn test_worker_attach_and_detach() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Target.attachedToTarget",
        json!({
            "sessionId": "worker-session",
            "targetInfo": { "targetId": "t1", "type": "worker", "url": "http://localhost/worker.js" },
            "waitingForDebugger": true,
        }),
    );
    drain(&mut session, &events);

    assert_eq!(session.get_thread_list(), vec![0, 1]);
    assert!(session
        .hook()
        .events()
        .contains(&HookEvent::ThreadStarted(1)));

    // both sessions parse their copy of the module
    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    state.push_event(
        "worker-session",
        "Debugger.scriptParsed",
        script_parsed_params("43", "http://localhost/app.wasm", true),
    );
    drain(&mut session, &events);

    // a breakpoint reconciles in both threads
    session.set_break_point(FileLocation::new("main.cpp", 4));
    assert_eq!(state.count_sent("Debugger.setBreakpoint"), 2);

    // and removal releases both raw breakpoints
    session.remove_break_point(0).unwrap();
    assert_eq!(state.count_sent("Debugger.removeBreakpoint"), 2);

    state.push_event(
        "",
        "Target.detachedFromTarget",
        json!({ "sessionId": "worker-session" }),
    );
    drain(&mut session, &events);

    assert_eq!(session.get_thread_list(), vec![0]);
    assert!(session.hook().events().contains(&HookEvent::ThreadExited(1)));
}

#[test]
fn test_page_navigation_preserves_breakpoint_intent() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    drain(&mut session, &events);

    session.set_break_point(FileLocation::new("main.cpp", 4));
    session.set_break_point(FileLocation::new("main.cpp", 5));
    session.set_break_point(FileLocation::new("main.cpp", 9));
    assert!(session.break_points_list(None).iter().all(|bp| bp.verified));

    state.push_event("", "Page.loadEventFired", json!({}));
    drain(&mut session, &events);

    // exactly the default thread remains, intent survives unverified
    assert_eq!(session.get_thread_list(), vec![0]);
    let listed = session.break_points_list(None);
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|bp| !bp.verified));

    // the reloaded page parses the module again under a fresh script id
    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("57", "http://localhost/app.wasm", true),
    );
    drain(&mut session, &events);

    let listed = session.break_points_list(None);
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|bp| bp.verified));
}

#[test]
fn test_non_wasm_frame_keeps_url_and_one_based_line() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("7", "http://localhost/app.js", false),
    );
    state.push_event(
        "",
        "Debugger.paused",
        json!({
            "callFrames": [{
                "callFrameId": "frame:0",
                "functionName": "tick",
                "location": { "scriptId": "7", "lineNumber": 7, "columnNumber": 2 },
                "scopeChain": [],
            }],
            "reason": "other",
            "hitBreakpoints": [],
        }),
    );
    drain(&mut session, &events);

    let frames = session.get_stack_frames(None).unwrap();
    assert_eq!(frames[0].file.as_deref(), Some("http://localhost/app.js"));
    assert_eq!(frames[0].line, Some(8));
}

#[test]
fn test_resume_clears_paused_state() {
    let (mut session, state, events) = session();

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    state.push_event("", "Debugger.paused", paused_params("42", module_offset(0x10), vec![]));
    drain(&mut session, &events);
    assert!(session.get_stack_frames(None).is_ok());

    session.continue_execution(None).unwrap();
    assert_eq!(state.count_sent("Debugger.resume"), 1);
    assert!(session.get_stack_frames(None).is_err());
    assert!(session
        .hook()
        .events()
        .contains(&HookEvent::Continued(0)));
}

#[test]
fn test_pointer_dump_reads_memory_once() {
    // locals: slot 0 is the frame base (0x1000), slot 1 is `p` (0x2000)
    let locals = json!([
        { "name": "0", "value": { "type": "number", "value": 0x1000 } },
        { "name": "1", "value": { "type": "number", "value": 0x2000 } },
    ]);
    let (transport, state) = MockTransport::new(fixture_module());
    let transport = transport
        .with_memory(0x2000, 7i32.to_le_bytes().to_vec())
        .with_properties("locals-obj", locals);

    let (client, events) = wadbg::cdp::CdpClient::start(Box::new(transport));
    let mut session = DebugSession::new(Rc::new(client), RecordingHook::default(), None);

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    state.push_event(
        "",
        "Debugger.paused",
        common::paused_params_with_scopes(
            "42",
            module_offset(0x10),
            vec![],
            json!([{ "type": "local", "object": { "type": "object", "objectId": "locals-obj" } }]),
        ),
    );
    drain(&mut session, &events);

    // the pointer itself is a register scalar, no memory involved
    assert_eq!(session.dump_variable("p", None).unwrap(), "(int*)0x2000");
    assert_eq!(state.count_sent("Debugger.evaluateOnCallFrame"), 0);

    // dereferencing fetches the pointee through one evaluate call
    assert_eq!(session.dump_variable("*p", None).unwrap(), "(int)7");
    assert_eq!(state.count_sent("Debugger.evaluateOnCallFrame"), 1);

    // a repeated dereference before resume is served from the cache
    assert_eq!(session.dump_variable("*p", None).unwrap(), "(int)7");
    assert_eq!(state.count_sent("Debugger.evaluateOnCallFrame"), 1);
}

#[test]
fn test_path_remap_applies_to_frames() {
    let (transport, state) = MockTransport::new(fixture_module());
    let (client, events) = CdpClient::start(Box::new(transport));
    let mut session = DebugSession::new(
        Rc::new(client),
        RecordingHook::default(),
        Some(wadbg::debugger::PathRemap {
            server_root: "/build".to_string(),
            web_root: "webpack:///src".to_string(),
        }),
    );

    state.push_event(
        "",
        "Debugger.scriptParsed",
        script_parsed_params("42", "http://localhost/app.wasm", true),
    );
    state.push_event("", "Debugger.paused", paused_params("42", module_offset(0x10), vec![]));
    drain(&mut session, &events);

    let frames = session.get_stack_frames(None).unwrap();
    assert_eq!(frames[0].file.as_deref(), Some("webpack:///src/main.cpp"));
}
