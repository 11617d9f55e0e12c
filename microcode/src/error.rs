use thiserror::Error;

use crate::bits::BitMask;

#[derive(Debug, Error, PartialEq)]
#[error("Error on line {line_number}: {message}")]
pub(crate) struct ParseError {
    line_number: usize,
    message: String,
}

impl ParseError {
    pub(crate) fn new(line_number: usize, message: &str) -> Self {
        ParseError {
            line_number,
            message: message.to_string(),
        }
    }
}

/// Violations of a BitField's index range.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum BitError {
    #[error("Bit index {index} is out of range for a {width}-bit field")]
    IndexOutOfRange { index: usize, width: usize },

    #[error("Bit mask {mask} does not fit in a {bits}-bit integer")]
    MaskTooWide { mask: BitMask, bits: u32 },

    #[error("Invalid bit character '{0}'")]
    InvalidDigit(char),
}

/// Errors raised while inlining macro references.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ExpansionError {
    #[error("Macro '{name}' referenced on line {line} does not exist")]
    UndefinedMacro { name: String, line: usize },

    #[error("Symbol '{name}' referenced on line {line} is a sequence, not a macro")]
    NotAMacro { name: String, line: usize },

    #[error("Macro reference on line {line} provides {given} arguments, while macro '{name}' has {expected} parameters")]
    ArgumentCount {
        name: String,
        line: usize,
        given: usize,
        expected: usize,
    },

    #[error("Caught recursive macro self-reference to '{name}' on line {line}")]
    SelfReference { name: String, line: usize },

    #[error("Caught recursive macro expansion {cycle} on line {line}")]
    RecursiveExpansion { cycle: String, line: usize },

    #[error("Could not create expansion scope '{scope}' for the macro reference on line {line}")]
    Scope { scope: String, line: usize },
}

/// Errors raised while placing sequences and resolving symbols.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum LinkError {
    #[error("No fetch entrypoint is defined")]
    MissingFetch,

    #[error("Entrypoint '{name}' does not name a sequence")]
    NotASequence { name: String },

    #[error("Entrypoint '{name}' is a macro (macros cannot be bound to entrypoints)")]
    MacroEntrypoint { name: String },

    #[error("Microprogram needs {needed} words but only {available} are available ({overflow} words over)")]
    Overflow {
        needed: usize,
        available: usize,
        overflow: usize,
    },

    #[error("Encountered unexpanded macro on line {line}")]
    UnexpandedMacro { line: usize },

    #[error("Symbol '{symbol}' referenced by assertion on line {line} is not defined")]
    UndefinedSymbol { symbol: String, line: usize },

    #[error("Symbol '{symbol}' referenced by assertion on line {line} does not resolve to a value")]
    NotAValue { symbol: String, line: usize },

    #[error("No empty assertion is defined")]
    MissingEmptyAssertion,
}

/// Errors raised while rendering the ROM image.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum WriteError {
    #[error("Unexpanded macro found on line {line}")]
    UnexpandedMacro { line: usize },

    #[error("Invalid/unresolved symbol '{symbol}' in assertion on line {line}")]
    Unresolved { symbol: String, line: usize },

    #[error("Symbol '{symbol}' bound to entrypoint {opcode} does not exist")]
    UndefinedEntrypoint { symbol: String, opcode: u64 },

    #[error("Symbol '{symbol}' bound to entrypoint {opcode} is a macro (macros cannot be bound to entrypoints)")]
    MacroEntrypoint { symbol: String, opcode: u64 },

    #[error("Sequence '{name}' was never placed")]
    Unplaced { name: String },

    #[error("Assertion on line {line} does not fit the control word: {source}")]
    Bits { line: usize, source: BitError },
}

/// Any failure of a compilation run.
#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Error expanding microprogram: {0}")]
    Expansion(#[from] ExpansionError),

    #[error("Error linking microprogram: {0}")]
    Link(#[from] LinkError),

    #[error("Error writing microprogram: {0}")]
    Write(#[from] WriteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
