use clap::Parser;
use log::LevelFilter;
use std::process::exit;
use wadbg::debugger::PathRemap;
use wadbg::log::{StderrLogger, LOGGER_SWITCHER};
use wadbg::ui::supervisor::{self, Interface};

#[derive(Parser, Debug)]
#[command(author, version, about = "Source-level debugger for WebAssembly over CDP")]
struct Args {
    /// Page URL to open once attached.
    url: Option<String>,

    /// Host of the CDP endpoint.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the CDP endpoint (the browser's --remote-debugging-port).
    #[clap(long, default_value_t = 9222)]
    port: u16,

    /// Run as a Debug Adapter Protocol server on stdio.
    #[clap(long)]
    dap: bool,

    /// Path prefix of served sources on the debuggee side, remapped to
    /// --web-root in every reported location.
    #[clap(long, requires = "web_root")]
    server_root: Option<String>,

    /// Replacement prefix for --server-root.
    #[clap(long, requires = "server_root")]
    web_root: Option<String>,

    /// Verbose logging (repeat for more).
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let interface = if args.dap {
        // the DAP logger takes over inside the application, stderr would
        // corrupt the protocol stream
        Interface::Dap
    } else {
        let filter = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        };
        LOGGER_SWITCHER.switch(StderrLogger::new(filter), filter);

        let remap = match (args.server_root, args.web_root) {
            (Some(server_root), Some(web_root)) => Some(PathRemap {
                server_root,
                web_root,
            }),
            _ => None,
        };
        Interface::Console {
            host: args.host,
            port: args.port,
            url: args.url,
            remap,
        }
    };

    match supervisor::run(interface) {
        Ok(control_flow) => exit(control_flow.exit_code()),
        Err(e) => {
            eprintln!("error: {e:#}");
            exit(1);
        }
    }
}
