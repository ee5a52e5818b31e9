use crate::cdp::TransportError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    FromUtf8(#[from] FromUtf8Error),

    // --------------------------------- module parsing errors -------------------------------------
    #[error("no symbols for {0}")]
    NoDebugInformation(String),
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("wasm module parsing error: {0}")]
    WasmParsing(#[from] wasmparser::BinaryReaderError),
    #[error("bytecode decode error: {0}")]
    BytecodeDecode(#[from] base64::DecodeError),

    // --------------------------------- debugger entity not found ---------------------------------
    #[error("source place not found at instruction 0x{0:x}")]
    PlaceNotFound(u64),
    #[error("no address matches {0}:{1}")]
    AddressUnresolved(String, u64),
    #[error("function not found at instruction 0x{0:x}")]
    FunctionNotFound(u64),
    #[error("frame number {0} not found")]
    FrameNotFound(usize),
    #[error("thread {0} not found")]
    ThreadNotFound(u32),
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(u32),
    #[error("unknown script identifier {0}")]
    ScriptNotFound(String),

    // --------------------------------- transport errors ------------------------------------------
    #[error("cdp transport: {0}")]
    Transport(#[from] TransportError),
    #[error("cdp command `{method}` failed: {message}")]
    CommandFailed { method: String, message: String },

    // --------------------------------- protocol shape errors -------------------------------------
    #[error("malformed cdp payload: {0}")]
    ProtocolViolation(&'static str),
    #[error("unexpected value type `{0}` in scope chain")]
    UnexpectedValueType(String),

    // --------------------------------- evaluation errors -----------------------------------------
    #[error("`{0}` is not a valid variable name")]
    VariableNotFound(String),
    #[error("variable has no location and no constant value")]
    NoVariableLocation,
    #[error("dwarf expression evaluation: unsupported require ({0})")]
    EvalUnsupportedRequire(&'static str),
    #[error("no frame base for current function")]
    NoFrameBase,
    #[error("frame base register {0} is out of range")]
    FrameBaseOutOfRange(u64),
    #[error("memory hop limit exceeded")]
    HopLimitExceeded,
    #[error("invalid binary representation of type `{0}`")]
    TypeBinaryRepr(String),
    #[error("type not found")]
    TypeNotFound,

    // --------------------------------- command errors --------------------------------------------
    #[error("command is available only when the debuggee is paused")]
    NotPaused,
    #[error("debug session already active")]
    AlreadyActive,
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole process.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::Utf8(_) => false,
            Error::FromUtf8(_) => false,
            Error::NoDebugInformation(_) => false,
            Error::DwarfParsing(_) => false,
            Error::ObjParsing(_) => false,
            Error::WasmParsing(_) => false,
            Error::BytecodeDecode(_) => false,
            Error::PlaceNotFound(_) => false,
            Error::AddressUnresolved(_, _) => false,
            Error::FunctionNotFound(_) => false,
            Error::FrameNotFound(_) => false,
            Error::ThreadNotFound(_) => false,
            Error::BreakpointNotFound(_) => false,
            Error::ScriptNotFound(_) => false,
            Error::CommandFailed { .. } => false,
            Error::ProtocolViolation(_) => false,
            Error::UnexpectedValueType(_) => false,
            Error::VariableNotFound(_) => false,
            Error::NoVariableLocation => false,
            Error::EvalUnsupportedRequire(_) => false,
            Error::NoFrameBase => false,
            Error::FrameBaseOutOfRange(_) => false,
            Error::HopLimitExceeded => false,
            Error::TypeBinaryRepr(_) => false,
            Error::TypeNotFound => false,
            Error::NotPaused => false,
            Error::AlreadyActive => false,

            // a dead connection means a dead session
            Error::Transport(_) => true,
        }
    }
}
