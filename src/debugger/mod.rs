//! Debugger core: the session coordinator over a CDP connection.
//!
//! A [`DebugSession`] owns the script registry, the breakpoint registry and
//! one [`Thread`] per attached execution target. CDP events are handed in by
//! the front-end's main loop through [`DebugSession::handle_event`]; user
//! commands arrive through the uniform command surface and are routed to the
//! focused thread. All state lives on the calling thread, every CDP
//! round-trip is a natural suspension point behind which further events queue.

pub mod breakpoint;
pub mod dwarf;
pub mod error;
pub mod frame;
pub mod memory;
pub mod registry;
pub mod thread;
pub mod value;

pub use breakpoint::{BreakpointRegistry, BreakpointRequest, FileLocation, ResolvedBreakpoint};
pub use dwarf::VariableName;
pub use error::Error;
pub use frame::StackFrame;
pub use registry::{FileRegistry, SourcePlace};
pub use thread::{Thread, EVALUATION_FAILURE};

use crate::cdp::types::{
    AttachedToTargetParams, CdpEvent, ConsoleMessageParams, DetachedFromTargetParams, PausedParams,
    ScriptParsedParams,
};
use crate::cdp::{CdpClient, SessionCdp};
use crate::weak_error;
use std::rc::Rc;

/// Why a thread surfaced a stop to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
}

/// Event surface towards the outer adapter (console, DAP, tests).
pub trait EventHook {
    fn on_stopped(
        &self,
        reason: StopReason,
        thread_id: u32,
        place: Option<&SourcePlace>,
    ) -> anyhow::Result<()>;
    fn on_continued(&self, thread_id: u32);
    fn on_thread_started(&self, thread_id: u32);
    fn on_thread_exited(&self, thread_id: u32);
    /// A previously unverified breakpoint was realized against a module.
    fn on_breakpoint_changed(&self, breakpoint: &ResolvedBreakpoint);
    fn on_output(&self, text: &str);
    fn on_terminated(&self);
}

/// serverRoot -> webRoot prefix replacement applied to every path handed out.
pub struct PathRemap {
    pub server_root: String,
    pub web_root: String,
}

impl PathRemap {
    fn apply(&self, path: &str) -> String {
        match path.strip_prefix(&self.server_root) {
            Some(rest) => format!("{}{rest}", self.web_root),
            None => path.to_string(),
        }
    }
}

const DEFAULT_THREAD_ID: u32 = 0;

pub struct DebugSession<H: EventHook> {
    client: Rc<CdpClient>,
    hook: H,
    registry: FileRegistry,
    breakpoints: BreakpointRegistry,
    threads: Vec<Thread>,
    next_thread_id: u32,
    focused_thread: u32,
    remap: Option<PathRemap>,
}

impl<H: EventHook> DebugSession<H> {
    pub fn new(client: Rc<CdpClient>, hook: H, remap: Option<PathRemap>) -> Self {
        let default_cdp = SessionCdp::new(Rc::clone(&client), "");
        Self {
            client,
            hook,
            registry: FileRegistry::default(),
            breakpoints: BreakpointRegistry::default(),
            threads: vec![Thread::new(DEFAULT_THREAD_ID, default_cdp)],
            next_thread_id: DEFAULT_THREAD_ID + 1,
            focused_thread: DEFAULT_THREAD_ID,
            remap,
        }
    }

    pub fn client(&self) -> &Rc<CdpClient> {
        &self.client
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// Enable debugging on the top-level target and start discovering
    /// workers. Auto-attached targets start suspended, their threads resume
    /// them after reconciliation.
    pub fn activate(&mut self) -> Result<(), Error> {
        let default = &self.threads[0];
        default.cdp().set_discover_targets()?;
        default.cdp().set_auto_attach()?;
        default.cdp().enable_page()?;
        weak_error!(default.cdp().enable_console(), "console domain:");
        default.activate()
    }

    pub fn deactivate(&mut self) -> Result<(), Error> {
        for thread in &mut self.threads {
            weak_error!(thread.deactivate(), "deactivate thread:");
        }
        Ok(())
    }

    // ------------------------------ event dispatch -----------------------------------------------

    /// Process one CDP event. Events must be handed in connection order.
    pub fn handle_event(&mut self, event: CdpEvent) {
        match event.method.as_str() {
            "Debugger.scriptParsed" => {
                let Some(params) = event.parse_params::<ScriptParsedParams>() else {
                    return;
                };
                let Some(thread) = find_thread(&mut self.threads, &event.session_id) else {
                    return;
                };
                thread.handle_script_parsed(
                    &params,
                    &mut self.registry,
                    &self.breakpoints,
                    &self.hook,
                );
            }
            "Debugger.paused" => {
                let Some(params) = event.parse_params::<PausedParams>() else {
                    return;
                };
                let Some(thread) = find_thread(&mut self.threads, &event.session_id) else {
                    return;
                };
                weak_error!(thread.handle_paused(params, &self.registry, &self.hook));
            }
            "Debugger.resumed" => {
                if let Some(thread) = find_thread(&mut self.threads, &event.session_id) {
                    thread.handle_resumed(&self.hook);
                }
            }
            "Target.attachedToTarget" => {
                let Some(params) = event.parse_params::<AttachedToTargetParams>() else {
                    return;
                };
                self.attach_thread(params);
            }
            "Target.detachedFromTarget" => {
                let Some(params) = event.parse_params::<DetachedFromTargetParams>() else {
                    return;
                };
                self.detach_thread(&params.session_id);
            }
            "Page.loadEventFired" => self.reset_on_navigation(),
            "Console.messageAdded" => {
                if let Some(params) = event.parse_params::<ConsoleMessageParams>() {
                    self.hook.on_output(&params.message.text);
                }
            }
            other => log::trace!(target: "debugger", "unhandled event {other}"),
        }
    }

    fn attach_thread(&mut self, params: AttachedToTargetParams) {
        log::info!(
            target: "debugger",
            "attached to {} ({})",
            params.target_info.url,
            params.target_info.target_type
        );

        let id = self.next_thread_id;
        self.next_thread_id += 1;

        let cdp = SessionCdp::new(Rc::clone(&self.client), params.session_id);
        let mut thread = Thread::new(id, cdp);
        weak_error!(thread.activate(), "activate thread:");
        thread.update_breakpoints(&self.registry, &self.breakpoints, &self.hook);

        self.threads.push(thread);
        self.hook.on_thread_started(id);
    }

    fn detach_thread(&mut self, session_id: &str) {
        let Some(position) = self
            .threads
            .iter()
            .position(|t| t.cdp().session_id() == session_id && t.id() != DEFAULT_THREAD_ID)
        else {
            return;
        };

        let thread = self.threads.remove(position);
        if self.focused_thread == thread.id() {
            self.focused_thread = DEFAULT_THREAD_ID;
        }
        self.hook.on_thread_exited(thread.id());
    }

    /// A page navigation tears down every script and worker, only the default
    /// thread survives. Breakpoint intent is kept and re-resolves as the new
    /// page's modules parse.
    fn reset_on_navigation(&mut self) {
        let exited: Vec<u32> = self
            .threads
            .iter()
            .filter(|t| t.id() != DEFAULT_THREAD_ID)
            .map(|t| t.id())
            .collect();
        self.threads.retain(|t| t.id() == DEFAULT_THREAD_ID);
        for id in exited {
            self.hook.on_thread_exited(id);
        }

        self.threads[0].reset_resolutions();
        self.registry.clear();
        self.focused_thread = DEFAULT_THREAD_ID;
    }

    // ------------------------------ workflow commands --------------------------------------------

    pub fn step_over(&mut self, thread_id: Option<u32>) -> Result<(), Error> {
        let (thread, hook) = self.thread_with_hook(thread_id)?;
        thread.step_over(hook)
    }

    pub fn step_in(&mut self, thread_id: Option<u32>) -> Result<(), Error> {
        let (thread, hook) = self.thread_with_hook(thread_id)?;
        thread.step_into(hook)
    }

    pub fn step_out(&mut self, thread_id: Option<u32>) -> Result<(), Error> {
        let (thread, hook) = self.thread_with_hook(thread_id)?;
        thread.step_out(hook)
    }

    pub fn continue_execution(&mut self, thread_id: Option<u32>) -> Result<(), Error> {
        let (thread, hook) = self.thread_with_hook(thread_id)?;
        thread.continue_execution(hook)
    }

    fn thread_with_hook(&mut self, thread_id: Option<u32>) -> Result<(&mut Thread, &H), Error> {
        let id = thread_id.unwrap_or(self.focused_thread);
        let thread = self
            .threads
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(Error::ThreadNotFound(id))?;
        Ok((thread, &self.hook))
    }

    // ------------------------------ inspection commands ------------------------------------------

    pub fn get_stack_frames(&self, thread_id: Option<u32>) -> Result<Vec<StackFrame>, Error> {
        let thread = self.target_thread_ref(thread_id)?;
        let mut frames = thread.stack_frames()?;
        if let Some(remap) = &self.remap {
            for frame in &mut frames {
                if let Some(file) = &frame.file {
                    frame.file = Some(remap.apply(file));
                }
            }
        }
        Ok(frames)
    }

    pub fn set_focused_frame(
        &mut self,
        index: usize,
        thread_id: Option<u32>,
    ) -> Result<(), Error> {
        self.target_thread(thread_id)?.set_focused_frame(index)
    }

    /// Source position of the focused frame, for the `l` command.
    pub fn show_line(&self, thread_id: Option<u32>) -> Result<SourcePlace, Error> {
        let thread = self.target_thread_ref(thread_id)?;
        let frame = thread.focused_frame()?;
        let file = frame
            .file
            .clone()
            .ok_or(Error::PlaceNotFound(frame.instruction))?;
        let file = match &self.remap {
            Some(remap) => remap.apply(&file),
            None => file,
        };
        Ok(SourcePlace {
            file,
            line: frame.line,
        })
    }

    pub fn list_variable(
        &self,
        group_id: Option<i32>,
        thread_id: Option<u32>,
    ) -> Result<Vec<VariableName>, Error> {
        let thread = self.target_thread_ref(thread_id)?;
        thread.list_variable(&self.registry, group_id)
    }

    pub fn list_global_variable(
        &self,
        group_id: Option<i32>,
        thread_id: Option<u32>,
    ) -> Result<Vec<VariableName>, Error> {
        let thread = self.target_thread_ref(thread_id)?;
        thread.list_global_variable(&self.registry, group_id)
    }

    pub fn dump_variable(&mut self, expr: &str, thread_id: Option<u32>) -> Result<String, Error> {
        let id = thread_id.unwrap_or(self.focused_thread);
        let registry = &self.registry;
        let thread = self
            .threads
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(Error::ThreadNotFound(id))?;
        thread.dump_variable(registry, expr)
    }

    // ------------------------------ breakpoint commands ------------------------------------------

    /// Register a breakpoint and reconcile it in every thread. The returned
    /// state reflects whether any thread realized it immediately; when the
    /// module is not loaded yet it comes back unverified and a later
    /// `BreakpointChanged` event reports the verification.
    pub fn set_break_point(&mut self, location: FileLocation) -> ResolvedBreakpoint {
        let request = self.breakpoints.insert(location);
        self.reconcile_all();
        self.resolved_view(&request)
    }

    pub fn remove_break_point(&mut self, id: u32) -> Result<(), Error> {
        self.breakpoints
            .remove(id)
            .ok_or(Error::BreakpointNotFound(id))?;
        self.reconcile_all();
        Ok(())
    }

    pub fn remove_all_break_points(&mut self, path: &str) {
        self.breakpoints.remove_all_for_file(path);
        self.reconcile_all();
    }

    /// All breakpoints, optionally filtered to the ones matching a location.
    pub fn break_points_list(&self, location: Option<&FileLocation>) -> Vec<ResolvedBreakpoint> {
        self.breakpoints
            .list()
            .iter()
            .map(|request| self.resolved_view(request))
            .filter(|bp| match location {
                Some(filter) => breakpoint_matches(bp, filter),
                None => true,
            })
            .collect()
    }

    fn reconcile_all(&mut self) {
        for thread in &mut self.threads {
            thread.update_breakpoints(&self.registry, &self.breakpoints, &self.hook);
        }
    }

    /// Merge the per-thread mirrors into one outward view of a request: the
    /// breakpoint counts as verified when any thread realized it.
    fn resolved_view(&self, request: &BreakpointRequest) -> ResolvedBreakpoint {
        self.threads
            .iter()
            .filter_map(|t| t.mirror().iter().find(|bp| bp.id == request.id))
            .find(|bp| bp.verified)
            .cloned()
            .unwrap_or_else(|| ResolvedBreakpoint::unverified(request))
    }

    // ------------------------------ navigation and lifecycle -------------------------------------

    pub fn jump_to_page(&self, url: &str) -> Result<(), Error> {
        self.threads[0].cdp().navigate(url)
    }

    pub fn set_focused_thread(&mut self, thread_id: u32) -> Result<(), Error> {
        if !self.threads.iter().any(|t| t.id() == thread_id) {
            return Err(Error::ThreadNotFound(thread_id));
        }
        self.focused_thread = thread_id;
        Ok(())
    }

    pub fn get_thread_list(&self) -> Vec<u32> {
        self.threads.iter().map(|t| t.id()).collect()
    }

    pub fn focused_thread(&self) -> u32 {
        self.focused_thread
    }

    /// Source files known across all loaded modules, for CLI completion.
    pub fn known_files(&self) -> Vec<String> {
        self.registry
            .known_files()
            .map(|f| f.to_string())
            .collect()
    }

    fn target_thread(&mut self, thread_id: Option<u32>) -> Result<&mut Thread, Error> {
        let id = thread_id.unwrap_or(self.focused_thread);
        self.threads
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(Error::ThreadNotFound(id))
    }

    fn target_thread_ref(&self, thread_id: Option<u32>) -> Result<&Thread, Error> {
        let id = thread_id.unwrap_or(self.focused_thread);
        self.threads
            .iter()
            .find(|t| t.id() == id)
            .ok_or(Error::ThreadNotFound(id))
    }
}

fn find_thread<'a>(threads: &'a mut [Thread], session_id: &str) -> Option<&'a mut Thread> {
    threads.iter_mut().find(|t| t.cdp().session_id() == session_id)
}

fn breakpoint_matches(breakpoint: &ResolvedBreakpoint, filter: &FileLocation) -> bool {
    let file_matches = |candidate: &str| {
        candidate == filter.file
            || candidate.ends_with(&format!("/{}", filter.file))
            || filter.file.ends_with(&format!("/{candidate}"))
    };
    file_matches(&breakpoint.location.file) && breakpoint.location.line == filter.line
}
