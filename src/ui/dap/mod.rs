//! Debug Adapter Protocol front-end.
//!
//! The DAP server loop runs on the calling thread; the debugger core and its
//! CDP connection live on a dedicated core thread and are reached through a
//! task exchanger, so all core state stays on one executor. Core-originated
//! events flow back to the IDE through the shared server output.

mod hook;
mod logger;
mod server;
mod variable;

use crate::cdp::types::CdpEvent;
use crate::cdp::{discover_ws_url, CdpClient, WebSocketTransport};
use crate::debugger::{DebugSession, Error, EventHook, FileLocation, PathRemap};
use crate::ui::dap::hook::DapHook;
use crate::ui::dap::server::DapServer;
use crate::ui::dap::variable::{ReferenceRegistry, VarRef, VarScope};
use crate::ui::supervisor::ControlFlow;
use crate::weak_error;
use dap::events::Event;
use dap::requests::{Command, Request};
use dap::responses::{
    ContinueResponse, EvaluateResponse, ResponseBody, ScopesResponse, SetBreakpointsResponse,
    StackTraceResponse, ThreadsResponse, VariablesResponse,
};
use dap::types::{
    Breakpoint, Capabilities, Scope, Source, StackFrame, Thread, Variable,
};
use itertools::Itertools;
use serde::Deserialize;
use std::any::Any;
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

type CoreTask = Box<dyn FnOnce(&mut DebugSession<DapHook>) -> Box<dyn Any + Send> + Send>;

enum CoreMessage {
    Task(CoreTask),
    Event(CdpEvent),
    ConnectionClosed,
    Exit,
}

/// Client half of the core-thread exchanger.
struct CoreHandle {
    message_tx: Sender<CoreMessage>,
    response_rx: Receiver<Box<dyn Any + Send>>,
}

impl CoreHandle {
    /// Send a task to the core thread and wait for its result.
    fn request<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DebugSession<DapHook>) -> T + Send + 'static,
    {
        let task: CoreTask = Box::new(move |session| Box::new(f(session)));
        self.message_tx
            .send(CoreMessage::Task(task))
            .map_err(|_| anyhow::anyhow!("debugger core is gone"))?;
        let response = self
            .response_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("debugger core is gone"))?;
        Ok(*response.downcast::<T>().expect("response type must match"))
    }

    fn exit(&self) {
        _ = self.message_tx.send(CoreMessage::Exit);
    }
}

/// Launch/attach arguments carried in the request's extra fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LaunchArgs {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    server_root: Option<String>,
    web_root: Option<String>,
}

fn start_core(
    output: Arc<Mutex<dap::server::ServerOutput<std::io::Stdout>>>,
    args: LaunchArgs,
) -> anyhow::Result<CoreHandle> {
    let (message_tx, message_rx) = channel::<CoreMessage>();
    let (response_tx, response_rx) = channel::<Box<dyn Any + Send>>();
    let (boot_tx, boot_rx) = channel::<Result<(), String>>();

    let event_tx = message_tx.clone();
    std::thread::spawn(move || {
        let host = args.host.as_deref().unwrap_or("127.0.0.1");
        let port = args.port.unwrap_or(9222);

        let connect = || -> Result<_, Error> {
            let ws_url = discover_ws_url(host, port)?;
            let transport = WebSocketTransport::connect(&ws_url)?;
            Ok(CdpClient::start(Box::new(transport)))
        };
        let (client, events) = match connect() {
            Ok(parts) => parts,
            Err(e) => {
                _ = boot_tx.send(Err(format!("{e:#}")));
                return;
            }
        };

        let remap = match (args.server_root, args.web_root) {
            (Some(server_root), Some(web_root)) => Some(PathRemap {
                server_root,
                web_root,
            }),
            _ => None,
        };
        let mut session = DebugSession::new(Rc::new(client), DapHook::new(output), remap);
        if let Err(e) = session.activate() {
            _ = boot_tx.send(Err(format!("{e:#}")));
            return;
        }
        if let Some(url) = args.url {
            weak_error!(session.jump_to_page(&url), "navigate:");
        }

        std::thread::spawn(move || {
            for event in events {
                if event_tx.send(CoreMessage::Event(event)).is_err() {
                    return;
                }
            }
            _ = event_tx.send(CoreMessage::ConnectionClosed);
        });

        _ = boot_tx.send(Ok(()));

        for message in message_rx {
            match message {
                CoreMessage::Task(task) => {
                    _ = response_tx.send(task(&mut session));
                }
                CoreMessage::Event(event) => session.handle_event(event),
                CoreMessage::ConnectionClosed => {
                    session.hook().on_terminated();
                    break;
                }
                CoreMessage::Exit => {
                    weak_error!(session.deactivate(), "deactivate:");
                    break;
                }
            }
        }
    });

    boot_rx
        .recv()
        .map_err(|_| anyhow::anyhow!("debugger core died during startup"))?
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(CoreHandle {
        message_tx,
        response_rx,
    })
}

pub struct DapApplication {
    server: DapServer,
    session: Option<CoreHandle>,
    var_refs: ReferenceRegistry,
}

impl DapApplication {
    pub fn new() -> DapApplication {
        DapApplication {
            server: DapServer::new(),
            session: None,
            var_refs: ReferenceRegistry::default(),
        }
    }

    pub fn run(mut self) -> anyhow::Result<ControlFlow> {
        let dap_logger = logger::DapLogger::new(self.server.output());
        let filter = dap_logger.filter();
        crate::log::LOGGER_SWITCHER.switch(dap_logger, filter);

        loop {
            let req = match self.server.poll_request() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    log::warn!("Unexpected end of input stream");
                    break;
                }
                Err(e) => {
                    log::error!("{e:?}");
                    continue;
                }
            };

            match self.handle_request(req) {
                Ok(true) => { /* Success */ }
                Ok(false) => break,
                Err(e) => {
                    log::error!("{e:#}");
                }
            }
        }

        if let Some(session) = &self.session {
            session.exit();
        }
        Ok(ControlFlow::Exit)
    }

    fn handle_request(&mut self, req: Request) -> anyhow::Result<bool> {
        macro_rules! session_or_fail {
            () => {{
                let Some(session) = &self.session else {
                    self.server.respond_error(req.seq, "No running session")?;
                    anyhow::bail!("No running session");
                };
                session
            }};
        }

        match req.command {
            Command::Initialize(_args) => {
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Initialize(Capabilities {
                        supports_configuration_done_request: Some(true),
                        supports_single_thread_execution_requests: Some(true),
                        ..Default::default()
                    }),
                )?;
                self.server.send_event(Event::Initialized)?;
            }
            Command::Launch(args) => {
                let launch_args: LaunchArgs = args
                    .additional_data
                    .as_ref()
                    .and_then(|data| serde_json::from_value(data.clone()).ok())
                    .unwrap_or_default();

                match start_core(self.server.output(), launch_args) {
                    Ok(handle) => {
                        self.session = Some(handle);
                        self.server.respond_success(req.seq, ResponseBody::Launch)?;
                    }
                    Err(e) => {
                        self.server.respond_error(req.seq, format!("{e:#}"))?;
                    }
                }
            }
            Command::SetBreakpoints(args) => {
                let session = session_or_fail!();

                let Some(path) = args.source.path.clone() else {
                    self.server.respond_error(req.seq, "Source path required")?;
                    anyhow::bail!("Source path required");
                };
                let lines: Vec<i64> = args
                    .breakpoints
                    .iter()
                    .flatten()
                    .map(|bp| bp.line)
                    .collect();

                let request_path = path.clone();
                let resolved = session.request(move |session| {
                    session.remove_all_break_points(&request_path);
                    lines
                        .into_iter()
                        .map(|line| {
                            session.set_break_point(FileLocation::new(
                                request_path.clone(),
                                line as u64,
                            ))
                        })
                        .collect_vec()
                })?;

                self.server.respond_success(
                    req.seq,
                    ResponseBody::SetBreakpoints(SetBreakpointsResponse {
                        breakpoints: resolved
                            .into_iter()
                            .map(|bp| Breakpoint {
                                id: Some(bp.id as i64),
                                verified: bp.verified,
                                line: Some(bp.location.line as i64),
                                source: Some(args.source.clone()),
                                ..Default::default()
                            })
                            .collect_vec(),
                    }),
                )?;
            }
            Command::ConfigurationDone => {
                self.server
                    .respond_success(req.seq, ResponseBody::ConfigurationDone)?;
            }
            Command::Threads => {
                let session = session_or_fail!();

                let threads = session.request(|session| session.get_thread_list())?;
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Threads(ThreadsResponse {
                        threads: threads
                            .into_iter()
                            .map(|id| Thread {
                                id: id as i64,
                                name: format!("Thread #{id}"),
                            })
                            .collect_vec(),
                    }),
                )?;
            }
            Command::StackTrace(args) => {
                let session = session_or_fail!();

                let thread_id = args.thread_id as u32;
                let frames =
                    session.request(move |session| session.get_stack_frames(Some(thread_id)))?;

                match frames {
                    Ok(frames) => {
                        let stack_frames = frames
                            .into_iter()
                            .map(|frame| StackFrame {
                                id: frame.index as i64,
                                name: frame.function_name,
                                source: frame.file.map(|path| Source {
                                    path: Some(path),
                                    ..Default::default()
                                }),
                                line: frame.line.unwrap_or(0) as i64,
                                column: 0,
                                ..Default::default()
                            })
                            .collect_vec();

                        self.server.respond_success(
                            req.seq,
                            ResponseBody::StackTrace(StackTraceResponse {
                                total_frames: Some(stack_frames.len() as i64),
                                stack_frames,
                            }),
                        )?;
                    }
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Scopes(args) => {
                let session = session_or_fail!();

                let frame = args.frame_id as usize;
                let focused = session.request(move |session| {
                    session
                        .set_focused_frame(frame, None)
                        .map(|_| session.focused_thread())
                })?;

                match focused {
                    Ok(thread_id) => {
                        let locals = self.var_refs.insert(VarRef {
                            thread_id,
                            scope: VarScope::Locals,
                            group: None,
                        });
                        let globals = self.var_refs.insert(VarRef {
                            thread_id,
                            scope: VarScope::Globals,
                            group: None,
                        });

                        self.server.respond_success(
                            req.seq,
                            ResponseBody::Scopes(ScopesResponse {
                                scopes: vec![
                                    Scope {
                                        name: "Locals".to_owned(),
                                        variables_reference: locals,
                                        expensive: false,
                                        ..Default::default()
                                    },
                                    Scope {
                                        name: "Globals".to_owned(),
                                        variables_reference: globals,
                                        expensive: true,
                                        ..Default::default()
                                    },
                                ],
                            }),
                        )?;
                    }
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Variables(args) => {
                let session = session_or_fail!();

                let Some(var_ref) = self.var_refs.get(args.variables_reference) else {
                    self.server
                        .respond_error(req.seq, "Unknown variables reference")?;
                    anyhow::bail!("Unknown variables reference");
                };

                let listing = session.request(move |session| {
                    let names = match var_ref.scope {
                        VarScope::Locals => {
                            session.list_variable(var_ref.group, Some(var_ref.thread_id))
                        }
                        VarScope::Globals => {
                            session.list_global_variable(var_ref.group, Some(var_ref.thread_id))
                        }
                    }?;

                    // leaves render their value, composites expand lazily
                    let rendered = names
                        .into_iter()
                        .map(|name| {
                            let value = if name.child_group_id.is_none() {
                                session
                                    .dump_variable(&name.display_name, Some(var_ref.thread_id))
                                    .unwrap_or_else(|e| e.to_string())
                            } else {
                                name.type_name.clone()
                            };
                            (name, value)
                        })
                        .collect_vec();
                    Ok::<_, Error>(rendered)
                })?;

                match listing {
                    Ok(rendered) => {
                        let variables = rendered
                            .into_iter()
                            .map(|(name, value)| Variable {
                                name: name.name,
                                value,
                                type_field: Some(name.type_name),
                                variables_reference: name
                                    .child_group_id
                                    .map(|group| {
                                        self.var_refs.insert(VarRef {
                                            thread_id: var_ref.thread_id,
                                            scope: var_ref.scope,
                                            group: Some(group),
                                        })
                                    })
                                    .unwrap_or(0),
                                ..Default::default()
                            })
                            .collect_vec();

                        self.server.respond_success(
                            req.seq,
                            ResponseBody::Variables(VariablesResponse { variables }),
                        )?;
                    }
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Continue(args) => {
                let session = session_or_fail!();

                let thread_id = args.thread_id as u32;
                let result = session
                    .request(move |session| session.continue_execution(Some(thread_id)))?;
                self.var_refs.reset();

                match result {
                    Ok(()) => self.server.respond_success(
                        req.seq,
                        ResponseBody::Continue(ContinueResponse {
                            all_threads_continued: Some(false),
                        }),
                    )?,
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Next(args) => {
                let session = session_or_fail!();
                let thread_id = args.thread_id as u32;
                let result = session.request(move |session| session.step_over(Some(thread_id)))?;
                self.var_refs.reset();
                match result {
                    Ok(()) => self
                        .server
                        .respond_success(req.seq, ResponseBody::Next)?,
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::StepIn(args) => {
                let session = session_or_fail!();
                let thread_id = args.thread_id as u32;
                let result = session.request(move |session| session.step_in(Some(thread_id)))?;
                self.var_refs.reset();
                match result {
                    Ok(()) => self
                        .server
                        .respond_success(req.seq, ResponseBody::StepIn)?,
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::StepOut(args) => {
                let session = session_or_fail!();
                let thread_id = args.thread_id as u32;
                let result = session.request(move |session| session.step_out(Some(thread_id)))?;
                self.var_refs.reset();
                match result {
                    Ok(()) => self
                        .server
                        .respond_success(req.seq, ResponseBody::StepOut)?,
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Evaluate(args) => {
                let session = session_or_fail!();

                let expression = args.expression.clone();
                let result =
                    session.request(move |session| session.dump_variable(&expression, None))?;

                match result {
                    Ok(rendered) => self.server.respond_success(
                        req.seq,
                        ResponseBody::Evaluate(EvaluateResponse {
                            result: rendered,
                            variables_reference: 0,
                            ..Default::default()
                        }),
                    )?,
                    Err(e) => self.server.respond_error(req.seq, e.to_string())?,
                }
            }
            Command::Disconnect(_args) => {
                if let Some(session) = self.session.take() {
                    session.exit();
                }
                self.server
                    .respond_success(req.seq, ResponseBody::Disconnect)?;
                return Ok(false);
            }
            unsupported => {
                log::debug!("unsupported request: {unsupported:?}");
                self.server.respond_error(req.seq, "Unsupported request")?;
            }
        }

        Ok(true)
    }
}

impl Default for DapApplication {
    fn default() -> Self {
        Self::new()
    }
}
