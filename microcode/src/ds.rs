use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::warn;

use crate::{bits::BitMask, error::ParseError, symbols::SymbolTree};

/// A named signal: its bit range within a control word and its bank
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ControlWordLabel {
    pub(crate) name: String,
    pub(crate) mask: BitMask,
    pub(crate) bank: u64,
}

/// An integer literal or a symbol resolved at link time
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Integer(i64),
    Symbol(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{}", value),
            Value::Symbol(name) => f.write_str(name),
        }
    }
}

/// A position inside a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequenceLabel {
    pub(crate) local_address: usize,
    pub(crate) base_address: usize,
}

impl SequenceLabel {
    pub(crate) fn new(local_address: usize) -> Self {
        SequenceLabel {
            local_address,
            base_address: 0,
        }
    }

    pub(crate) fn absolute_address(&self) -> usize {
        self.base_address + self.local_address
    }
}

/// One control word's worth of asserted signals, all on the same bank
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assertion {
    pub(crate) line: usize,
    pub(crate) bank: u64,
    pub(crate) signals: Vec<(ControlWordLabel, Value)>,
}

impl Assertion {
    pub(crate) fn new(line: usize) -> Self {
        Assertion {
            line,
            bank: 0,
            signals: Vec::new(),
        }
    }

    /// Adds a signal, fixing the assertion's bank on the first one.
    ///
    /// Signals whose bit ranges overlap a previously added signal only warn.
    pub(crate) fn add_signal(
        &mut self,
        label: &ControlWordLabel,
        value: Value,
    ) -> Result<(), ParseError> {
        if !self.signals.is_empty() && self.bank != label.bank {
            return Err(ParseError::new(
                self.line,
                &format!(
                    "Assertion attempts to assert signal '{}' on bank {} while already on bank {}",
                    label.name, label.bank, self.bank
                ),
            ));
        }
        if self.signals.iter().any(|(signal, _)| signal.name == label.name) {
            return Err(ParseError::new(
                self.line,
                &format!("Signal '{}' asserted more than once", label.name),
            ));
        }
        for (signal, _) in &self.signals {
            if signal.mask.overlaps_with(&label.mask) {
                warn!(
                    "Assertion on line {} contains overlapping signals: {} ({}), {} ({})",
                    self.line, signal.name, signal.mask, label.name, label.mask
                );
            }
        }
        self.bank = label.bank;
        self.signals.push((label.clone(), value));
        Ok(())
    }
}

/// An inline invocation of a macro
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MacroReference {
    pub(crate) line: usize,
    pub(crate) symbol: String,
    pub(crate) arguments: Vec<Value>,
    /// Instance name of the expansion this reference was copied out of, empty
    /// at top level.
    pub(crate) parent_reference: String,
    /// Macros whose expansion produced this reference, outermost first.
    pub(crate) callers: Vec<String>,
}

impl MacroReference {
    pub(crate) fn new(line: usize, symbol: &str, arguments: Vec<Value>) -> Self {
        MacroReference {
            line,
            symbol: symbol.to_string(),
            arguments,
            parent_reference: String::new(),
            callers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SequenceStep {
    Assertion(Assertion),
    MacroReference(MacroReference),
}

impl SequenceStep {
    pub(crate) fn line(&self) -> usize {
        match self {
            SequenceStep::Assertion(assertion) => assertion.line,
            SequenceStep::MacroReference(reference) => reference.line,
        }
    }
}

/// An ordered list of steps, either placed in the ROM or used as a macro body
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sequence {
    pub(crate) steps: Vec<SequenceStep>,
    pub(crate) parameters: Vec<String>,
    pub(crate) address: usize,
    pub(crate) is_macro: bool,
    /// Labels and expansion scopes local to this sequence
    pub(crate) symbols: SymbolTree,
}

impl Sequence {
    pub(crate) fn new(is_macro: bool) -> Self {
        Sequence {
            steps: Vec::new(),
            parameters: Vec::new(),
            address: 0,
            is_macro,
            symbols: SymbolTree::new(),
        }
    }

    /// Position of the first macro reference step, if any
    pub(crate) fn first_macro_reference(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| matches!(step, SequenceStep::MacroReference(_)))
    }

    pub(crate) fn is_unexpanded(&self) -> bool {
        self.first_macro_reference().is_some()
    }

    pub(crate) fn name(&self) -> String {
        self.symbols.fully_qualified_name()
    }
}

/// The whole program: configuration, signal layout and the global symbol tree
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Microprogram {
    pub(crate) control_word_width: usize,
    pub(crate) opcode_width: usize,
    pub(crate) microprogram_length: usize,
    /// Low bits of every control word selecting the bank
    pub(crate) bank_selector_mask: BitMask,
    pub(crate) control_word_labels: HashMap<String, ControlWordLabel>,
    pub(crate) instruction_entrypoints: BTreeMap<u64, String>,
    pub(crate) fetch_entrypoint: Option<String>,
    pub(crate) interrupt_entrypoint: Option<String>,
    pub(crate) empty_assertion: Option<Assertion>,
    pub(crate) symbols: SymbolTree,
}

impl Microprogram {
    pub(crate) fn new() -> Self {
        Microprogram {
            control_word_width: 0,
            opcode_width: 0,
            microprogram_length: 0,
            bank_selector_mask: BitMask::single(0),
            control_word_labels: HashMap::new(),
            instruction_entrypoints: BTreeMap::new(),
            fetch_entrypoint: None,
            interrupt_entrypoint: None,
            empty_assertion: None,
            symbols: SymbolTree::new(),
        }
    }

    /// Highest bank number the bank selector can encode
    pub(crate) fn max_bank(&self) -> u64 {
        self.bank_selector_mask.max_value()
    }

    /// Number of entries in the entrypoint table
    pub(crate) fn opcode_count(&self) -> u64 {
        1u64.checked_shl(self.opcode_width as u32).unwrap_or(u64::MAX)
    }

    /// Bit length of an entrypoint address
    pub(crate) fn address_width(&self) -> usize {
        let highest = self.microprogram_length.saturating_sub(1);
        (usize::BITS - highest.leading_zeros()).max(1) as usize
    }

    /// Checks the configuration and signal layout for consistency.
    pub(crate) fn validate(&self, line_number: usize) -> Result<(), ParseError> {
        let fail = |message: String| Err(ParseError::new(line_number, &message));
        if self.microprogram_length == 0 {
            return fail("The microprogram length must be greater than zero".to_string());
        }
        if self.opcode_width == 0 {
            return fail("The opcode width must be greater than zero".to_string());
        }
        if self.opcode_width >= 32 {
            return fail("The opcode width must be less than 32".to_string());
        }
        if self.control_word_width == 0 {
            return fail("The control word width must be greater than zero".to_string());
        }
        let bank_width = self.bank_selector_mask.length();
        if bank_width + 1 >= self.control_word_width {
            return fail(format!(
                "Control word width of {} is invalid, as the bank selector has a width of {}",
                self.control_word_width, bank_width
            ));
        }
        let mut labels: Vec<_> = self.control_word_labels.values().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        for label in labels {
            if label.mask.upper_bound() + bank_width >= self.control_word_width {
                return fail(format!(
                    "Control word label '{}' exceeds the maximum control word width of {}",
                    label.name,
                    self.control_word_width - bank_width
                ));
            }
            if label.bank > self.max_bank() {
                return fail(format!(
                    "Control word label '{}' is on bank {}, but the bank selector only encodes banks up to {}",
                    label.name,
                    label.bank,
                    self.max_bank()
                ));
            }
        }
        if let Some(&opcode) = self.instruction_entrypoints.keys().next_back() {
            if opcode >= self.opcode_count() {
                return fail(format!(
                    "Entrypoint {} does not fit the opcode width of {}",
                    opcode, self.opcode_width
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(name: &str, bank: u64, msb: usize, lsb: usize) -> ControlWordLabel {
        ControlWordLabel {
            name: name.to_string(),
            mask: BitMask::new(msb, lsb),
            bank,
        }
    }

    #[test]
    fn test_assertion_takes_bank_of_first_signal() {
        let mut assertion = Assertion::new(4);
        assertion
            .add_signal(&signal("alu", 2, 3, 1), Value::Integer(5))
            .unwrap();
        assertion
            .add_signal(&signal("ld", 2, 4, 4), Value::Symbol("one".to_string()))
            .unwrap();
        assert_eq!(assertion.bank, 2);
        assert_eq!(assertion.signals.len(), 2);
    }

    #[test]
    fn test_error_assertion_mixes_banks() {
        let mut assertion = Assertion::new(7);
        assertion
            .add_signal(&signal("a", 0, 1, 1), Value::Integer(1))
            .unwrap();
        let err = assertion
            .add_signal(&signal("b", 1, 2, 2), Value::Integer(1))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 7: Assertion attempts to assert signal 'b' on bank 1 while already on bank 0"
        );
    }

    #[test]
    fn test_error_signal_asserted_twice() {
        let mut assertion = Assertion::new(2);
        let a = signal("a", 0, 1, 1);
        assertion.add_signal(&a, Value::Integer(1)).unwrap();
        let err = assertion.add_signal(&a, Value::Integer(0)).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 2: Signal 'a' asserted more than once");
    }

    #[test]
    fn test_overlapping_signals_are_accepted() {
        let mut assertion = Assertion::new(1);
        assertion
            .add_signal(&signal("a", 0, 3, 0), Value::Integer(1))
            .unwrap();
        assertion
            .add_signal(&signal("b", 0, 5, 3), Value::Integer(1))
            .unwrap();
        assert_eq!(assertion.signals.len(), 2);
    }

    #[test]
    fn test_sequence_expansion_state() {
        let mut sequence = Sequence::new(false);
        assert!(!sequence.is_unexpanded());
        sequence.steps.push(SequenceStep::Assertion(Assertion::new(1)));
        sequence
            .steps
            .push(SequenceStep::MacroReference(MacroReference::new(2, "m", vec![])));
        assert!(sequence.is_unexpanded());
        assert_eq!(sequence.first_macro_reference(), Some(1));
        assert_eq!(sequence.steps[1].line(), 2);
    }

    #[test]
    fn test_address_width() {
        let mut program = Microprogram::new();
        for (length, width) in [(1, 1), (2, 1), (4, 2), (5, 3), (256, 8), (257, 9)] {
            program.microprogram_length = length;
            assert_eq!(program.address_width(), width, "length {}", length);
        }
    }

    #[test]
    fn test_validate_rejects_oversized_label() {
        let mut program = Microprogram::new();
        program.control_word_width = 8;
        program.opcode_width = 2;
        program.microprogram_length = 4;
        program
            .control_word_labels
            .insert("wide".to_string(), signal("wide", 0, 7, 4));
        assert_eq!(
            program.validate(9).unwrap_err().to_string(),
            "Error on line 9: Control word label 'wide' exceeds the maximum control word width of 7"
        );
        program
            .control_word_labels
            .insert("wide".to_string(), signal("wide", 0, 6, 4));
        assert!(program.validate(9).is_ok());
    }

    #[test]
    fn test_validate_rejects_bank_outside_selector() {
        let mut program = Microprogram::new();
        program.control_word_width = 8;
        program.opcode_width = 2;
        program.microprogram_length = 4;
        program
            .control_word_labels
            .insert("b".to_string(), signal("b", 2, 3, 3));
        assert_eq!(
            program.validate(3).unwrap_err().to_string(),
            "Error on line 3: Control word label 'b' is on bank 2, but the bank selector only encodes banks up to 1"
        );
    }

    #[test]
    fn test_validate_rejects_unreachable_entrypoint() {
        let mut program = Microprogram::new();
        program.control_word_width = 8;
        program.opcode_width = 2;
        program.microprogram_length = 4;
        program.instruction_entrypoints.insert(4, "add".to_string());
        assert_eq!(
            program.validate(5).unwrap_err().to_string(),
            "Error on line 5: Entrypoint 4 does not fit the opcode width of 2"
        );
    }

    #[test]
    fn test_validate_rejects_wide_bank_selector() {
        let mut program = Microprogram::new();
        program.control_word_width = 4;
        program.opcode_width = 2;
        program.microprogram_length = 4;
        program.bank_selector_mask = BitMask::new(2, 0);
        assert_eq!(
            program.validate(1).unwrap_err().to_string(),
            "Error on line 1: Control word width of 4 is invalid, as the bank selector has a width of 3"
        );
    }
}
