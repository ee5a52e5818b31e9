//! Registry of scripts known to the session.
//!
//! WebAssembly scripts own a DWARF container; every other script keeps its URL
//! so non-wasm frames in a stack trace still display a sensible file name.

use super::dwarf::DwarfContainer;
use crate::debugger::error::Error;
use indexmap::IndexMap;
use std::collections::HashMap;

pub struct WebAssemblyFile {
    pub script_id: String,
    pub url: String,
    pub container: DwarfContainer,
}

/// A source position resolved from a CDP location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlace {
    pub file: String,
    pub line: Option<u64>,
}

/// A CDP location resolved from a source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAddress {
    pub script_id: String,
    /// Byte offset into the module, the CDP column number.
    pub byte_offset: u64,
}

#[derive(Default)]
pub struct FileRegistry {
    files: IndexMap<String, WebAssemblyFile>,
    urls: HashMap<String, String>,
}

impl FileRegistry {
    /// Register a loaded wasm module. Loading is idempotent: a script id that
    /// is already present keeps its original container.
    pub fn load(&mut self, file: WebAssemblyFile) -> Result<(), Error> {
        if self.files.contains_key(&file.script_id) {
            log::debug!(target: "debugger", "script {} already loaded", file.script_id);
            return Ok(());
        }
        self.urls.insert(file.script_id.clone(), file.url.clone());
        self.files.insert(file.script_id.clone(), file);
        Ok(())
    }

    /// Remember the URL of a non-wasm script.
    pub fn register_url(&mut self, script_id: &str, url: &str) {
        self.urls
            .entry(script_id.to_string())
            .or_insert_with(|| url.to_string());
    }

    pub fn file(&self, script_id: &str) -> Option<&WebAssemblyFile> {
        self.files.get(script_id)
    }

    pub fn files(&self) -> impl Iterator<Item = &WebAssemblyFile> {
        self.files.values()
    }

    /// Resolve a CDP location into a source place. Wasm scripts go through
    /// their DWARF container; for anything else the URL stands in for the
    /// file and the line is the 1-based CDP line.
    pub fn find_file_from_location(
        &self,
        script_id: &str,
        line_number: u64,
        column_number: Option<u64>,
    ) -> Option<SourcePlace> {
        if let Some(file) = self.files.get(script_id) {
            if let Some(info) = file.container.find_line_info(column_number.unwrap_or(0)) {
                return Some(SourcePlace {
                    file: info.file,
                    line: info.line,
                });
            }
        }

        self.urls.get(script_id).map(|url| SourcePlace {
            file: url.clone(),
            line: Some(line_number + 1),
        })
    }

    /// Resolve a source position into a module address, first loaded module
    /// that knows the file wins.
    pub fn find_address_from_file_location(&self, file: &str, line: u64) -> Option<ScriptAddress> {
        self.files.values().find_map(|wasm_file| {
            wasm_file
                .container
                .find_address(file, line)
                .map(|byte_offset| ScriptAddress {
                    script_id: wasm_file.script_id.clone(),
                    byte_offset,
                })
        })
    }

    /// Canonical (file, line) of a module address, used to normalize
    /// breakpoint locations after resolution.
    pub fn normalize_location(&self, address: &ScriptAddress) -> Option<SourcePlace> {
        let file = self.files.get(&address.script_id)?;
        let info = file.container.find_line_info(address.byte_offset)?;
        Some(SourcePlace {
            file: info.file,
            line: info.line,
        })
    }

    /// All source files across loaded modules, for completion.
    pub fn known_files(&self) -> impl Iterator<Item = &str> {
        self.files.values().flat_map(|f| f.container.files())
    }

    /// Forget everything, used on page navigation.
    pub fn clear(&mut self) {
        self.files.clear();
        self.urls.clear();
    }
}
