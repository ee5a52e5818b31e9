//! Per-target execution state machine.
//!
//! One `Thread` exists per CDP execution session: the default session of the
//! page plus one per attached worker. It classifies pause events, mirrors the
//! breakpoint registry with per-target resolution state and owns the paused
//! snapshot every inspection command works on.

use super::breakpoint::{BreakpointRegistry, ResolvedBreakpoint};
use super::dwarf::{VariableEvaluation, VariableName};
use super::frame::{FrameSnapshot, StackFrame};
use super::memory::MemoryEvaluator;
use super::registry::{FileRegistry, SourcePlace, WebAssemblyFile};
use super::{EventHook, StopReason};
use crate::cdp::types::{PausedParams, ScriptParsedParams};
use crate::cdp::SessionCdp;
use crate::debugger::error::Error;
use crate::weak_error;

const MAX_POINTER_HOPS: usize = 20;
/// Pointer hops plus the final value fetch.
const MAX_MEMORY_REQUESTS: usize = MAX_POINTER_HOPS + 1;

/// Rendered value of a failed evaluation, the UI stays responsive and shows
/// the failure inline.
pub const EVALUATION_FAILURE: &str = "<failure>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    Into,
    Out,
}

enum ThreadState {
    Running,
    Paused(PausedState),
}

struct PausedState {
    frames: Vec<FrameSnapshot>,
    focused_frame: usize,
    memory: MemoryEvaluator,
}

pub struct Thread {
    id: u32,
    cdp: SessionCdp,
    state: ThreadState,
    mirror: Vec<ResolvedBreakpoint>,
    /// Last source place surfaced to the user, for step de-duplication.
    last_place: Option<SourcePlace>,
    step_in_progress: Option<StepKind>,
}

impl Thread {
    pub fn new(id: u32, cdp: SessionCdp) -> Self {
        Self {
            id,
            cdp,
            state: ThreadState::Running,
            mirror: Vec::new(),
            last_place: None,
            step_in_progress: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cdp(&self) -> &SessionCdp {
        &self.cdp
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, ThreadState::Paused(_))
    }

    /// Enable the debugging domains on the target and let it run. The
    /// instrumentation breakpoint guarantees a pause before the first
    /// instruction of every freshly parsed module, giving breakpoint
    /// reconciliation a chance to attach first.
    pub fn activate(&self) -> Result<(), Error> {
        self.cdp.enable_debugger()?;
        self.cdp.enable_runtime()?;
        self.cdp.set_instrumentation_breakpoint()?;
        self.cdp.run_if_waiting_for_debugger()?;
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<(), Error> {
        self.state = ThreadState::Running;
        self.cdp.disable_debugger()
    }

    /// Forget per-target resolution state, keeping user intent in the shared
    /// registry. Raw breakpoint ids die with the page the modules belonged to.
    pub fn reset_resolutions(&mut self) {
        self.state = ThreadState::Running;
        self.last_place = None;
        self.step_in_progress = None;
        for bp in &mut self.mirror {
            bp.raw_id = None;
            bp.verified = false;
        }
    }

    pub fn mirror(&self) -> &[ResolvedBreakpoint] {
        &self.mirror
    }

    // ------------------------------ event handling -----------------------------------------------

    pub fn handle_script_parsed<H: EventHook>(
        &mut self,
        params: &ScriptParsedParams,
        registry: &mut FileRegistry,
        breakpoints: &BreakpointRegistry,
        hook: &H,
    ) {
        if !params.is_wasm() {
            if !params.url.is_empty() {
                registry.register_url(&params.script_id, &params.url);
            }
            return;
        }

        if registry.file(&params.script_id).is_none() {
            match self.load_module(params) {
                Ok(file) => {
                    _ = registry.load(file);
                }
                Err(e) => {
                    log::warn!(target: "debugger", "no symbols for {}: {e:#}", params.url);
                    registry.register_url(&params.script_id, &params.url);
                    return;
                }
            }
        }

        self.update_breakpoints(registry, breakpoints, hook);
    }

    fn load_module(&self, params: &ScriptParsedParams) -> Result<WebAssemblyFile, Error> {
        let bytes = self.cdp.get_script_source(&params.script_id)?;
        let container = super::dwarf::DwarfContainer::from_module(&bytes)?;
        Ok(WebAssemblyFile {
            script_id: params.script_id.clone(),
            url: params.url.clone(),
            container,
        })
    }

    pub fn handle_paused<H: EventHook>(
        &mut self,
        params: PausedParams,
        registry: &FileRegistry,
        hook: &H,
    ) -> Result<(), Error> {
        // an instrumentation pause only exists so that module loading and
        // breakpoint reconciliation finish before the first instruction runs;
        // by the time it is processed here the preceding scriptParsed events
        // are already handled, so the debuggee can resume at once
        if params.reason == "instrumentation" || params.reason == "Break on start" {
            return self.cdp.resume();
        }

        if params.call_frames.is_empty() {
            self.state = ThreadState::Running;
            return Err(Error::ProtocolViolation("pause without call frames"));
        }

        let frames: Vec<FrameSnapshot> = params
            .call_frames
            .into_iter()
            .enumerate()
            .map(|(index, raw)| FrameSnapshot::new(index, raw, registry))
            .collect();

        let place = frames[0].resolved.file.as_ref().map(|file| SourcePlace {
            file: file.clone(),
            line: frames[0].resolved.line,
        });

        // Chrome may pause several times inside one source line while a step
        // is in flight; those intermediate stops are invisible to the user,
        // the same step is transparently re-issued
        if let Some(step) = self.step_in_progress {
            if matches!(step, StepKind::Over | StepKind::Into)
                && place.is_some()
                && place == self.last_place
            {
                return match step {
                    StepKind::Over => self.cdp.step_over(),
                    StepKind::Into => self.cdp.step_into(),
                    StepKind::Out => unreachable!(),
                };
            }
        }

        let reason = if !params.hit_breakpoints.is_empty() {
            StopReason::Breakpoint
        } else if self.step_in_progress.is_some() {
            StopReason::Step
        } else {
            StopReason::Pause
        };

        self.step_in_progress = None;
        self.last_place = place.clone();
        self.state = ThreadState::Paused(PausedState {
            frames,
            focused_frame: 0,
            memory: MemoryEvaluator::default(),
        });

        weak_error!(hook.on_stopped(reason, self.id, place.as_ref()));
        Ok(())
    }

    pub fn handle_resumed<H: EventHook>(&mut self, hook: &H) {
        if self.is_paused() {
            self.state = ThreadState::Running;
            hook.on_continued(self.id);
        }
    }

    // ------------------------------ breakpoint reconciliation ------------------------------------

    /// Bring the per-target mirror in sync with the shared registry:
    /// adopt new requests, drop removed ones (releasing their raw
    /// breakpoints), and try to realize every still-unverified entry against
    /// the modules currently loaded. Idempotent and edge-triggered by registry
    /// changes and by new modules.
    pub fn update_breakpoints<H: EventHook>(
        &mut self,
        registry: &FileRegistry,
        breakpoints: &BreakpointRegistry,
        hook: &H,
    ) {
        for request in breakpoints.list() {
            if !self.mirror.iter().any(|bp| bp.id == request.id) {
                self.mirror.push(ResolvedBreakpoint::unverified(&request));
            }
        }

        let mut removed = Vec::new();
        self.mirror.retain(|bp| {
            if breakpoints.contains(bp.id) {
                return true;
            }
            if let Some(raw_id) = &bp.raw_id {
                removed.push(raw_id.clone());
            }
            false
        });
        for raw_id in removed {
            weak_error!(self.cdp.remove_breakpoint(&raw_id), "remove breakpoint:");
        }

        for bp in &mut self.mirror {
            if bp.verified {
                continue;
            }

            // module may not be loaded yet, the entry stays unverified
            let Some(address) = registry
                .find_address_from_file_location(&bp.location.file, bp.location.line)
            else {
                continue;
            };

            let resolved = match self
                .cdp
                .set_breakpoint(&address.script_id, 0, address.byte_offset)
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    log::warn!(target: "debugger", "set breakpoint {}: {e:#}", bp.location);
                    continue;
                }
            };

            if let Some(place) = registry.normalize_location(&address) {
                bp.location.file = place.file;
                if let Some(line) = place.line {
                    bp.location.line = line;
                }
            }
            bp.raw_id = Some(resolved.breakpoint_id);
            bp.verified = true;
            hook.on_breakpoint_changed(bp);
        }
    }

    // ------------------------------ workflow commands --------------------------------------------

    pub fn step_over<H: EventHook>(&mut self, hook: &H) -> Result<(), Error> {
        self.step(StepKind::Over, hook)
    }

    pub fn step_into<H: EventHook>(&mut self, hook: &H) -> Result<(), Error> {
        self.step(StepKind::Into, hook)
    }

    pub fn step_out<H: EventHook>(&mut self, hook: &H) -> Result<(), Error> {
        self.step(StepKind::Out, hook)
    }

    fn step<H: EventHook>(&mut self, kind: StepKind, hook: &H) -> Result<(), Error> {
        if !self.is_paused() {
            return Err(Error::NotPaused);
        }

        match kind {
            StepKind::Over => self.cdp.step_over()?,
            StepKind::Into => self.cdp.step_into()?,
            StepKind::Out => self.cdp.step_out()?,
        }

        self.step_in_progress = Some(kind);
        self.state = ThreadState::Running;
        hook.on_continued(self.id);
        Ok(())
    }

    pub fn continue_execution<H: EventHook>(&mut self, hook: &H) -> Result<(), Error> {
        if !self.is_paused() {
            return Err(Error::NotPaused);
        }

        self.cdp.resume()?;
        self.step_in_progress = None;
        self.state = ThreadState::Running;
        hook.on_continued(self.id);
        Ok(())
    }

    // ------------------------------ paused-state inspection --------------------------------------

    pub fn stack_frames(&self) -> Result<Vec<StackFrame>, Error> {
        let paused = self.paused()?;
        Ok(paused.frames.iter().map(|f| f.resolved.clone()).collect())
    }

    pub fn set_focused_frame(&mut self, index: usize) -> Result<(), Error> {
        let paused = self.paused_mut()?;
        if index >= paused.frames.len() {
            return Err(Error::FrameNotFound(index));
        }
        paused.focused_frame = index;
        Ok(())
    }

    pub fn focused_frame(&self) -> Result<&StackFrame, Error> {
        let paused = self.paused()?;
        Ok(&paused.frames[paused.focused_frame].resolved)
    }

    /// Variables of the focused frame's function scope, one expansion group
    /// at a time.
    pub fn list_variable(
        &self,
        registry: &FileRegistry,
        group_id: Option<i32>,
    ) -> Result<Vec<VariableName>, Error> {
        let paused = self.paused()?;
        let frame = &paused.frames[paused.focused_frame];
        let file = self.wasm_file(registry, frame)?;

        let enumeration = file.container.local_variables(frame.resolved.instruction)?;
        Ok(enumeration.group(group_id).cloned().collect())
    }

    /// Global variables across every loaded module.
    pub fn list_global_variable(
        &self,
        registry: &FileRegistry,
        group_id: Option<i32>,
    ) -> Result<Vec<VariableName>, Error> {
        let paused = self.paused()?;
        let frame = &paused.frames[paused.focused_frame];

        let mut result = Vec::new();
        for file in registry.files() {
            let enumerations = if file.script_id == frame.raw.location.script_id {
                vec![file.container.global_variables(frame.resolved.instruction)?]
            } else {
                file.container.all_global_variables()?
            };
            for enumeration in enumerations {
                result.extend(enumeration.group(group_id).cloned());
            }
        }
        Ok(result)
    }

    /// Evaluate a variable expression on the focused frame. Locals are tried
    /// first, then the module's globals. Failures render as the
    /// [`EVALUATION_FAILURE`] sentinel instead of erroring, so variable views
    /// stay responsive.
    pub fn dump_variable(&mut self, registry: &FileRegistry, expr: &str) -> Result<String, Error> {
        match self.try_dump_variable(registry, expr) {
            Ok(rendered) => Ok(rendered),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::debug!(target: "debugger", "dump `{expr}`: {e:#}");
                Ok(format!("{EVALUATION_FAILURE}: {e}"))
            }
        }
    }

    fn try_dump_variable(&mut self, registry: &FileRegistry, expr: &str) -> Result<String, Error> {
        let paused = match &mut self.state {
            ThreadState::Paused(paused) => paused,
            ThreadState::Running => return Err(Error::NotPaused),
        };
        let frame = &paused.frames[paused.focused_frame];
        let file = registry
            .file(&frame.raw.location.script_id)
            .ok_or_else(|| Error::NoDebugInformation(frame.raw.location.script_id.clone()))?;

        let stores = frame.stores(&self.cdp)?;
        let instruction = frame.resolved.instruction;

        let evaluation = match file.container.evaluate(expr, stores, instruction) {
            Err(Error::VariableNotFound(_)) => {
                file.container.evaluate_global(expr, stores, instruction)?
            }
            other => other?,
        };

        drive_evaluation(
            evaluation,
            &mut paused.memory,
            &self.cdp,
            &frame.raw.call_frame_id,
        )
    }

    fn wasm_file<'a>(
        &self,
        registry: &'a FileRegistry,
        frame: &FrameSnapshot,
    ) -> Result<&'a WebAssemblyFile, Error> {
        registry
            .file(&frame.raw.location.script_id)
            .ok_or_else(|| Error::NoDebugInformation(frame.raw.location.script_id.clone()))
    }

    fn paused(&self) -> Result<&PausedState, Error> {
        match &self.state {
            ThreadState::Paused(paused) => Ok(paused),
            ThreadState::Running => Err(Error::NotPaused),
        }
    }

    fn paused_mut(&mut self) -> Result<&mut PausedState, Error> {
        match &mut self.state {
            ThreadState::Paused(paused) => Ok(paused),
            ThreadState::Running => Err(Error::NotPaused),
        }
    }
}

/// Replay the evaluation's memory requests against the debuggee until the
/// value is complete. Bounded by the pointer-hop ceiling so cyclic data
/// cannot spin the session.
fn drive_evaluation(
    mut evaluation: VariableEvaluation,
    memory: &mut MemoryEvaluator,
    cdp: &SessionCdp,
    call_frame_id: &str,
) -> Result<String, Error> {
    let mut fetches = 0;
    while let Some(slice) = evaluation.required_slice() {
        if fetches >= MAX_MEMORY_REQUESTS {
            return Err(Error::HopLimitExceeded);
        }
        fetches += 1;

        let bytes = memory.read(cdp, call_frame_id, slice.address, slice.byte_size)?;
        evaluation.provide(bytes)?;
    }
    evaluation.finish()
}
