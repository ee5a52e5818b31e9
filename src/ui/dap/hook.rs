use std::io::Stdout;
use std::sync::{Arc, Mutex};

use dap::events::{ContinuedEventBody, Event, OutputEventBody, StoppedEventBody, ThreadEventBody};
use dap::server::ServerOutput;
use dap::types::{OutputEventCategory, StoppedEventReason};

use crate::debugger::{EventHook, ResolvedBreakpoint, SourcePlace, StopReason};

pub struct DapHook {
    output: Arc<Mutex<ServerOutput<Stdout>>>,
}

impl DapHook {
    pub fn new(output: Arc<Mutex<ServerOutput<Stdout>>>) -> DapHook {
        DapHook { output }
    }

    fn send(&self, event: Event) {
        let mut output = self.output.lock().unwrap();
        if let Err(e) = output.send_event(event) {
            log::warn!(target: "debugger", "dap event: {e:?}");
        }
    }
}

impl EventHook for DapHook {
    fn on_stopped(
        &self,
        reason: StopReason,
        thread_id: u32,
        _place: Option<&SourcePlace>,
    ) -> anyhow::Result<()> {
        let reason = match reason {
            StopReason::Breakpoint => StoppedEventReason::Breakpoint,
            StopReason::Step => StoppedEventReason::Step,
            StopReason::Pause => StoppedEventReason::Pause,
        };

        self.send(Event::Stopped(StoppedEventBody {
            reason,
            description: None,
            thread_id: Some(thread_id as i64),
            preserve_focus_hint: None,
            text: None,
            all_threads_stopped: Some(false),
            hit_breakpoint_ids: None,
        }));
        Ok(())
    }

    fn on_continued(&self, thread_id: u32) {
        self.send(Event::Continued(ContinuedEventBody {
            thread_id: thread_id as i64,
            all_threads_continued: Some(false),
        }));
    }

    fn on_thread_started(&self, thread_id: u32) {
        self.send(Event::Thread(ThreadEventBody {
            reason: dap::types::ThreadEventReason::Started,
            thread_id: thread_id as i64,
        }));
    }

    fn on_thread_exited(&self, thread_id: u32) {
        self.send(Event::Thread(ThreadEventBody {
            reason: dap::types::ThreadEventReason::Exited,
            thread_id: thread_id as i64,
        }));
    }

    fn on_breakpoint_changed(&self, breakpoint: &ResolvedBreakpoint) {
        self.send(Event::Breakpoint(dap::events::BreakpointEventBody {
            reason: dap::types::BreakpointEventReason::Changed,
            breakpoint: dap::types::Breakpoint {
                id: Some(breakpoint.id as i64),
                verified: breakpoint.verified,
                line: Some(breakpoint.location.line as i64),
                source: Some(dap::types::Source {
                    path: Some(breakpoint.location.file.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }));
    }

    fn on_output(&self, text: &str) {
        self.send(Event::Output(OutputEventBody {
            category: Some(OutputEventCategory::Console),
            output: format!("{text}\n"),
            ..Default::default()
        }));
    }

    fn on_terminated(&self) {
        self.send(Event::Terminated(None));
    }
}
