//! Terminal rendering of core events.

use super::file::FileView;
use crate::debugger::{EventHook, ResolvedBreakpoint, SourcePlace, StopReason};
use crossterm::style::Stylize;
use rustyline::ExternalPrinter;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

pub struct TerminalHook {
    printer: RefCell<Box<dyn ExternalPrinter>>,
    file_view: Rc<FileView>,
}

impl TerminalHook {
    pub fn new(printer: Box<dyn ExternalPrinter>, file_view: Rc<FileView>) -> Self {
        Self {
            printer: RefCell::new(printer),
            file_view,
        }
    }

    fn print(&self, message: impl Into<String>) {
        let message = message.into();
        if self.printer.borrow_mut().print(message.clone()).is_err() {
            println!("{message}");
        }
    }
}

impl EventHook for TerminalHook {
    fn on_stopped(
        &self,
        reason: StopReason,
        thread_id: u32,
        place: Option<&SourcePlace>,
    ) -> anyhow::Result<()> {
        let location = match place {
            Some(SourcePlace {
                file,
                line: Some(line),
            }) => format!("{file}:{line}"),
            Some(SourcePlace { file, line: None }) => file.clone(),
            None => "<unknown location>".to_string(),
        };

        let headline = match reason {
            StopReason::Breakpoint => format!("Hit breakpoint at {location}"),
            StopReason::Step => location.clone(),
            StopReason::Pause => format!("Stopped at {location}"),
        };
        self.print(format!("{} (thread {thread_id})", headline.green()));

        if let Some(SourcePlace {
            file,
            line: Some(line),
        }) = place
        {
            if let Ok(rendered) = self.file_view.render_around(Path::new(file), *line) {
                self.print(rendered);
            }
        }
        Ok(())
    }

    fn on_continued(&self, _thread_id: u32) {}

    fn on_thread_started(&self, thread_id: u32) {
        self.print(format!("thread {thread_id} started"));
    }

    fn on_thread_exited(&self, thread_id: u32) {
        self.print(format!("thread {thread_id} exited"));
    }

    fn on_breakpoint_changed(&self, breakpoint: &ResolvedBreakpoint) {
        self.print(format!(
            "breakpoint {} resolved to {}",
            breakpoint.id, breakpoint.location
        ));
    }

    fn on_output(&self, text: &str) {
        self.print(text.to_string());
    }

    fn on_terminated(&self) {
        self.print("debuggee terminated".bold().to_string());
    }
}
