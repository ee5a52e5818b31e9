//! Front-end selection and process lifetime.

use crate::debugger::PathRemap;
use crate::ui::console;
use crate::ui::dap::DapApplication;
use anyhow::Context;

/// Interface type.
pub enum Interface {
    /// Interactive line-oriented console.
    Console {
        host: String,
        port: u16,
        url: Option<String>,
        remap: Option<PathRemap>,
    },
    /// Debug Adapter Protocol server on stdio, connection parameters come
    /// with the launch request.
    Dap,
}

/// How the application finished.
pub enum ControlFlow {
    /// Regular exit requested by the user.
    Exit,
    /// The CDP connection died underneath the session.
    ConnectionLost,
}

impl ControlFlow {
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlFlow::Exit => 0,
            ControlFlow::ConnectionLost => 1,
        }
    }
}

pub fn run(interface: Interface) -> anyhow::Result<ControlFlow> {
    match interface {
        Interface::Console {
            host,
            port,
            url,
            remap,
        } => {
            let app = console::AppBuilder::new(host, port, url, remap)
                .build()
                .context("Console application instantiation")?;
            app.run()
        }
        Interface::Dap => DapApplication::new().run(),
    }
}
