//! Interactive line-oriented console over the debugger core.
//!
//! Two auxiliary threads feed one message queue: the rustyline editor thread
//! sends user input, a forwarder moves CDP events over from the connection.
//! The main loop is the single executor every piece of core state runs on.

pub mod file;
pub mod hook;

use crate::cdp::types::CdpEvent;
use crate::cdp::{discover_ws_url, CdpClient, WebSocketTransport};
use crate::debugger::{DebugSession, EventHook, PathRemap, EVALUATION_FAILURE};
use crate::ui::command::{parser, Command, CommandError};
use crate::ui::supervisor::ControlFlow;
use crate::weak_error;
use crossterm::style::Stylize;
use file::FileView;
use hook::TerminalHook;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, ExternalPrinter};
use std::rc::Rc;
use std::sync::mpsc;

const WELCOME_TEXT: &str = "wadbg greets";
const PROMT: &str = "(wadbg) ";

enum UserAction {
    /// New command from user received
    Cmd(String),
    /// Terminate application
    Terminate,
}

enum LoopMessage {
    User(UserAction),
    Event(CdpEvent),
    ConnectionClosed,
}

pub struct AppBuilder {
    host: String,
    port: u16,
    start_url: Option<String>,
    remap: Option<PathRemap>,
}

impl AppBuilder {
    pub fn new(
        host: String,
        port: u16,
        start_url: Option<String>,
        remap: Option<PathRemap>,
    ) -> Self {
        Self {
            host,
            port,
            start_url,
            remap,
        }
    }

    pub fn build(self) -> anyhow::Result<TerminalApplication> {
        let ws_url = discover_ws_url(&self.host, self.port)?;
        log::info!(target: "debugger", "attach to {ws_url}");
        let transport = WebSocketTransport::connect(&ws_url)?;
        let (client, events) = CdpClient::start(Box::new(transport));

        let mut editor = DefaultEditor::new()?;
        let hook_printer = editor.create_external_printer()?;
        let app_printer = editor.create_external_printer()?;

        let file_view = Rc::new(FileView::new());
        let hook = TerminalHook::new(Box::new(hook_printer), file_view.clone());
        let session = DebugSession::new(Rc::new(client), hook, self.remap);

        Ok(TerminalApplication {
            session,
            editor: Some(editor),
            printer: Box::new(app_printer),
            file_view,
            events: Some(events),
            start_url: self.start_url,
        })
    }
}

pub struct TerminalApplication {
    session: DebugSession<TerminalHook>,
    editor: Option<DefaultEditor>,
    printer: Box<dyn ExternalPrinter>,
    file_view: Rc<FileView>,
    events: Option<mpsc::Receiver<CdpEvent>>,
    start_url: Option<String>,
}

impl TerminalApplication {
    pub fn run(mut self) -> anyhow::Result<ControlFlow> {
        let (message_tx, message_rx) = mpsc::channel::<LoopMessage>();

        let mut editor = self.editor.take().expect("editor must exists");
        let editor_tx = message_tx.clone();
        std::thread::spawn(move || loop {
            match editor.readline(PROMT) {
                Ok(line) => {
                    _ = editor.add_history_entry(&line);
                    if editor_tx.send(LoopMessage::User(UserAction::Cmd(line))).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    _ = editor_tx.send(LoopMessage::User(UserAction::Terminate));
                    break;
                }
                Err(e) => {
                    log::error!(target: "debugger", "readline: {e}");
                    _ = editor_tx.send(LoopMessage::User(UserAction::Terminate));
                    break;
                }
            }
        });

        let events = self.events.take().expect("events must exists");
        std::thread::spawn(move || {
            for event in events {
                if message_tx.send(LoopMessage::Event(event)).is_err() {
                    return;
                }
            }
            _ = message_tx.send(LoopMessage::ConnectionClosed);
        });

        self.print(WELCOME_TEXT.to_string());
        self.session.activate()?;
        if let Some(url) = self.start_url.take() {
            weak_error!(self.session.jump_to_page(&url), "navigate:");
        }

        for message in message_rx {
            match message {
                LoopMessage::User(UserAction::Cmd(line)) => {
                    if let Some(flow) = self.handle_input(&line) {
                        return Ok(flow);
                    }
                }
                LoopMessage::User(UserAction::Terminate) => return Ok(ControlFlow::Exit),
                LoopMessage::Event(event) => self.session.handle_event(event),
                LoopMessage::ConnectionClosed => {
                    self.session.hook().on_terminated();
                    return Ok(ControlFlow::ConnectionLost);
                }
            }
        }

        Ok(ControlFlow::Exit)
    }

    fn print(&mut self, message: String) {
        if self.printer.print(message.clone()).is_err() {
            println!("{message}");
        }
    }

    /// Execute one input line, `Some` stops the application.
    fn handle_input(&mut self, line: &str) -> Option<ControlFlow> {
        let command = match parser::parse(line) {
            Ok(command) => command,
            Err(e) => {
                self.print(format!("{}", e.to_string().red()));
                return None;
            }
        };

        match self.handle_command(command) {
            Ok(true) => None,
            Ok(false) => Some(ControlFlow::Exit),
            Err(CommandError::Handle(e)) if e.is_fatal() => {
                self.print(format!("{}", e.to_string().red()));
                Some(ControlFlow::ConnectionLost)
            }
            Err(e) => {
                self.print(format!("{}", e.to_string().red()));
                None
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<bool, CommandError> {
        match command {
            Command::SkipInput => {}
            Command::Quit => return Ok(false),
            Command::JumpToPage(url) => self.session.jump_to_page(&url)?,
            Command::Breakpoint(location) => {
                let bp = self.session.set_break_point(location);
                let state = if bp.verified { "verified" } else { "pending" };
                self.print(format!("breakpoint {} at {} ({state})", bp.id, bp.location));
            }
            Command::RemoveBreakpoint(id) => {
                self.session.remove_break_point(id)?;
                self.print(format!("breakpoint {id} removed"));
            }
            Command::StepOver => self.session.step_over(None)?,
            Command::StepInto => self.session.step_in(None)?,
            Command::StepOut => self.session.step_out(None)?,
            Command::Continue => self.session.continue_execution(None)?,
            Command::ShowLine => {
                let place = self.session.show_line(None)?;
                match place.line {
                    Some(line) => {
                        let rendered = self
                            .file_view
                            .render_around(std::path::Path::new(&place.file), line)
                            .unwrap_or_else(|e| format!("{e:#}\n"));
                        self.print(rendered);
                    }
                    None => self.print(place.file),
                }
            }
            Command::ListLocals(group) => {
                let variables = self.session.list_variable(group, None)?;
                self.print_variables(variables);
            }
            Command::ListGlobals(group) => {
                let variables = self.session.list_global_variable(group, None)?;
                self.print_variables(variables);
            }
            Command::Print(expr) => {
                let rendered = self.session.dump_variable(&expr, None)?;
                if rendered.starts_with(EVALUATION_FAILURE) {
                    self.print(format!("{}", rendered.red()));
                } else {
                    self.print(rendered);
                }
            }
        }
        Ok(true)
    }

    fn print_variables(&mut self, variables: Vec<crate::debugger::VariableName>) {
        if variables.is_empty() {
            self.print("no variables in scope".to_string());
            return;
        }
        for variable in variables {
            let expandable = match variable.child_group_id {
                Some(group) => format!(" [{group}]"),
                None => String::new(),
            };
            self.print(format!(
                "{}: {}{expandable}",
                variable.display_name, variable.type_name
            ));
        }
    }
}
