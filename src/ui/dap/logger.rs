//! Log records rendered as DAP `Output` events, stdout belongs to the
//! protocol stream.

use std::fmt::Write as _;
use std::io::Stdout;
use std::sync::{Arc, Mutex};

use dap::events::{Event, OutputEventBody};
use dap::server::ServerOutput;
use dap::types::OutputEventCategory;
use log::LevelFilter;

pub struct DapLogger {
    inner: env_logger::Logger,
    output: Arc<Mutex<ServerOutput<Stdout>>>,
}

impl DapLogger {
    pub fn new(output: Arc<Mutex<ServerOutput<Stdout>>>) -> Self {
        Self {
            inner: env_logger::Logger::from_default_env(),
            output,
        }
    }

    pub fn filter(&self) -> LevelFilter {
        self.inner.filter()
    }
}

impl log::Log for DapLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut output = String::new();
        write!(output, "[{}] ", record.level()).unwrap();
        if let Some(module) = record.module_path() {
            write!(output, "{module} ").unwrap();
        }
        writeln!(output, "{}", record.args()).unwrap();

        _ = self
            .output
            .lock()
            .unwrap()
            .send_event(Event::Output(OutputEventBody {
                category: Some(OutputEventCategory::Console),
                output,
                ..Default::default()
            }));
    }

    fn flush(&self) {}
}
