//! Call-frame snapshots taken on pause.

use super::registry::FileRegistry;
use super::value::{values_from_properties, ValueStores};
use crate::cdp::types::CallFrame;
use crate::cdp::SessionCdp;
use crate::debugger::error::Error;
use once_cell::unsync::OnceCell;

/// A resolved stack entry as handed to front-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub index: usize,
    pub function_name: String,
    pub file: Option<String>,
    pub line: Option<u64>,
    /// Byte offset of the frame's instruction inside its module (the CDP
    /// column number, whatever the script language).
    pub instruction: u64,
}

/// One CDP call frame plus its resolved place and the lazily built typed
/// value stores. The stores are built at most once per snapshot: the first
/// use pays the `Runtime.getProperties` round-trips, later uses reuse the
/// memoized result.
pub struct FrameSnapshot {
    pub raw: CallFrame,
    pub resolved: StackFrame,
    stores: OnceCell<ValueStores>,
}

impl FrameSnapshot {
    pub fn new(index: usize, raw: CallFrame, registry: &FileRegistry) -> Self {
        let place = registry.find_file_from_location(
            &raw.location.script_id,
            raw.location.line_number,
            raw.location.column_number,
        );

        let resolved = StackFrame {
            index,
            function_name: raw.function_name.clone(),
            file: place.as_ref().map(|p| p.file.clone()),
            line: place.as_ref().and_then(|p| p.line),
            instruction: raw.location.column_number.unwrap_or(0),
        };

        Self {
            raw,
            resolved,
            stores: OnceCell::new(),
        }
    }

    /// Typed value stores of this frame, built from the scope chain on first
    /// use.
    pub fn stores(&self, cdp: &SessionCdp) -> Result<&ValueStores, Error> {
        self.stores.get_or_try_init(|| build_stores(cdp, &self.raw))
    }
}

fn build_stores(cdp: &SessionCdp, frame: &CallFrame) -> Result<ValueStores, Error> {
    let mut stores = ValueStores::default();

    for scope in &frame.scope_chain {
        let Some(object_id) = scope.object.object_id.as_deref() else {
            continue;
        };

        match scope.scope_type.as_str() {
            "local" => {
                let properties = cdp.get_properties(object_id)?;
                stores.locals = values_from_properties(cdp, properties)?;
            }
            "module" => {
                // globals hide behind the module scope's `globals` member
                let properties = cdp.get_properties(object_id)?;
                for property in properties {
                    if property.name != "globals" {
                        continue;
                    }
                    if let Some(id) = property.value.and_then(|o| o.object_id) {
                        let globals = cdp.get_properties(&id)?;
                        stores.globals = values_from_properties(cdp, globals)?;
                    }
                }
            }
            "wasm-expression-stack" => {
                let properties = cdp.get_properties(object_id)?;
                stores.stacks = values_from_properties(cdp, properties)?;
            }
            _ => continue,
        }
    }

    Ok(stores)
}
