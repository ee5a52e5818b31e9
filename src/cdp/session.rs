//! Session-tagged facade over the multiplexed CDP client.
//!
//! CDP routes commands to attached targets by a session identifier parameter.
//! A [`SessionCdp`] embeds the shared client together with one session id and
//! stamps it on every call, so per-target code never sees the multiplexing.

use super::types::{
    EvaluateResult, GetPropertiesResult, GetScriptSourceResult, PropertyDescriptor, RemoteObject,
    SetBreakpointResult,
};
use super::CdpClient;
use crate::debugger::error::Error;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::rc::Rc;

#[derive(Clone)]
pub struct SessionCdp {
    client: Rc<CdpClient>,
    session_id: String,
}

impl SessionCdp {
    /// Create a facade for one attached target.
    ///
    /// # Arguments
    ///
    /// * `client`: shared connection client
    /// * `session_id`: target session id, empty for the root (top-level page) session
    pub fn new(client: Rc<CdpClient>, session_id: impl Into<String>) -> Self {
        Self {
            client,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
        self.client
            .call(&self.session_id, method, params)
            .map_err(|e| match e {
                Error::CommandFailed { message, .. } => Error::CommandFailed {
                    method: method.to_string(),
                    message,
                },
                other => other,
            })
    }

    fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, Error> {
        let result = self.call(method, params)?;
        serde_json::from_value(result).map_err(|e| {
            log::debug!(target: "debugger", "{method} result decode: {e}");
            Error::ProtocolViolation("command result has unexpected shape")
        })
    }

    // ------------------------------ lifecycle ----------------------------------------------------

    pub fn enable_debugger(&self) -> Result<(), Error> {
        self.call("Debugger.enable", json!({}))?;
        Ok(())
    }

    pub fn disable_debugger(&self) -> Result<(), Error> {
        self.call("Debugger.disable", json!({}))?;
        Ok(())
    }

    pub fn enable_runtime(&self) -> Result<(), Error> {
        self.call("Runtime.enable", json!({}))?;
        Ok(())
    }

    pub fn enable_page(&self) -> Result<(), Error> {
        self.call("Page.enable", json!({}))?;
        Ok(())
    }

    pub fn enable_console(&self) -> Result<(), Error> {
        self.call("Console.enable", json!({}))?;
        Ok(())
    }

    pub fn run_if_waiting_for_debugger(&self) -> Result<(), Error> {
        self.call("Runtime.runIfWaitingForDebugger", json!({}))?;
        Ok(())
    }

    /// Pause every target before its first script runs, so breakpoints set in
    /// advance can be attached to freshly parsed modules.
    pub fn set_instrumentation_breakpoint(&self) -> Result<(), Error> {
        self.call(
            "Debugger.setInstrumentationBreakpoint",
            json!({ "instrumentation": "beforeScriptExecution" }),
        )?;
        Ok(())
    }

    pub fn set_discover_targets(&self) -> Result<(), Error> {
        self.call("Target.setDiscoverTargets", json!({ "discover": true }))?;
        Ok(())
    }

    pub fn set_auto_attach(&self) -> Result<(), Error> {
        self.call(
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true }),
        )?;
        Ok(())
    }

    pub fn navigate(&self, url: &str) -> Result<(), Error> {
        self.call("Page.navigate", json!({ "url": url }))?;
        Ok(())
    }

    // ------------------------------ execution control --------------------------------------------

    pub fn resume(&self) -> Result<(), Error> {
        self.call("Debugger.resume", json!({}))?;
        Ok(())
    }

    pub fn step_over(&self) -> Result<(), Error> {
        self.call("Debugger.stepOver", json!({}))?;
        Ok(())
    }

    pub fn step_into(&self) -> Result<(), Error> {
        self.call("Debugger.stepInto", json!({}))?;
        Ok(())
    }

    pub fn step_out(&self) -> Result<(), Error> {
        self.call("Debugger.stepOut", json!({}))?;
        Ok(())
    }

    // ------------------------------ breakpoints --------------------------------------------------

    pub fn set_breakpoint(
        &self,
        script_id: &str,
        line_number: u64,
        column_number: u64,
    ) -> Result<SetBreakpointResult, Error> {
        self.call_typed(
            "Debugger.setBreakpoint",
            json!({
                "location": {
                    "scriptId": script_id,
                    "lineNumber": line_number,
                    "columnNumber": column_number,
                }
            }),
        )
    }

    pub fn remove_breakpoint(&self, raw_id: &str) -> Result<(), Error> {
        self.call("Debugger.removeBreakpoint", json!({ "breakpointId": raw_id }))?;
        Ok(())
    }

    // ------------------------------ inspection ---------------------------------------------------

    /// Fetch the module bytes of a WebAssembly script.
    pub fn get_script_source(&self, script_id: &str) -> Result<Vec<u8>, Error> {
        let result: GetScriptSourceResult =
            self.call_typed("Debugger.getScriptSource", json!({ "scriptId": script_id }))?;

        let encoded = result
            .bytecode
            .or(result.script_source)
            .ok_or(Error::ProtocolViolation("script source without bytecode"))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    pub fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>, Error> {
        let result: GetPropertiesResult = self.call_typed(
            "Runtime.getProperties",
            json!({ "objectId": object_id, "ownProperties": true }),
        )?;
        Ok(result.result)
    }

    pub fn evaluate_on_call_frame(
        &self,
        call_frame_id: &str,
        expression: &str,
    ) -> Result<RemoteObject, Error> {
        let result: EvaluateResult = self.call_typed(
            "Debugger.evaluateOnCallFrame",
            json!({
                "callFrameId": call_frame_id,
                "expression": expression,
                "returnByValue": true,
            }),
        )?;
        Ok(result.result)
    }
}
