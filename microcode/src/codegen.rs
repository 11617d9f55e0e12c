use log::warn;

use crate::{
    bits::BitField,
    ds::{Assertion, Microprogram, Sequence, SequenceStep, Value},
    error::WriteError,
    symbols::Symbol,
};

/// The two rendered output files
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RomImage {
    /// One MSB-first control word per line
    pub(crate) microprogram: String,
    /// One zero-padded entry address per opcode
    pub(crate) entrypoints: String,
}

pub(crate) struct CodeGenerator<'a> {
    program: &'a Microprogram,
    debug: bool,
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(program: &'a Microprogram, debug: bool) -> Self {
        CodeGenerator { program, debug }
    }

    /// Renders a linked program. `layout` lists placed sequences in ROM order.
    pub(crate) fn generate(&self, layout: &[String]) -> Result<RomImage, WriteError> {
        Ok(RomImage {
            microprogram: self.microprogram_text(layout)?,
            entrypoints: self.entrypoints_text()?,
        })
    }

    fn placed_sequence(&self, name: &str) -> Result<&'a Sequence, WriteError> {
        match self.program.symbols.get(name) {
            Some(Symbol::Sequence(sequence)) if !sequence.is_macro => Ok(sequence),
            _ => Err(WriteError::Unplaced {
                name: name.to_string(),
            }),
        }
    }

    fn encode_step(&self, step: &SequenceStep) -> Result<BitField, WriteError> {
        match step {
            SequenceStep::Assertion(assertion) => self.encode_assertion(assertion),
            SequenceStep::MacroReference(reference) => Err(WriteError::UnexpandedMacro {
                line: reference.line,
            }),
        }
    }

    /// Bank selector in the low bits, every signal shifted above it.
    fn encode_assertion(&self, assertion: &Assertion) -> Result<BitField, WriteError> {
        let bits_error = |source| WriteError::Bits {
            line: assertion.line,
            source,
        };
        let selector = self.program.bank_selector_mask;
        let mut word = BitField::new(self.program.control_word_width);
        word.set_masked(selector, 0, assertion.bank)
            .map_err(bits_error)?;

        for (signal, value) in &assertion.signals {
            let value = match value {
                Value::Integer(value) => *value,
                Value::Symbol(symbol) => {
                    return Err(WriteError::Unresolved {
                        symbol: symbol.clone(),
                        line: assertion.line,
                    })
                }
            };
            let max_value = signal.mask.max_value();
            if value < 0 || value as u64 > max_value {
                warn!(
                    "Asserted signal {} on line {} has a maximum value of {} (actual assertion of {} will be truncated)",
                    signal.name, assertion.line, max_value, value
                );
            }
            word.set_masked(signal.mask, selector.length(), value as u64)
                .map_err(bits_error)?;
        }
        Ok(word)
    }

    /// Labels bound to `local_address` within a sequence, as ` ::name:: |`
    /// markers; labels inside expansion instances carry their dotted path.
    fn label_markers(sequence: &Sequence, local_address: usize) -> String {
        sequence
            .symbols
            .labels()
            .into_iter()
            .filter(|(_, label)| label.local_address == local_address)
            .map(|(name, _)| format!(" ::{}:: |", name))
            .collect()
    }

    fn microprogram_text(&self, layout: &[String]) -> Result<String, WriteError> {
        let mut text = String::new();
        let mut filled = 0;
        for name in layout {
            let sequence = self.placed_sequence(name)?;
            if self.debug {
                text.push_str(&format!(
                    "//Sequence '{}' at address {}\n",
                    sequence.name(),
                    sequence.address
                ));
            }
            for (index, step) in sequence.steps.iter().enumerate() {
                text.push_str(&self.encode_step(step)?.to_string());
                if self.debug {
                    let labels = Self::label_markers(sequence, index);
                    if !labels.is_empty() {
                        text.push_str(&format!(
                            "   //{} (address {})",
                            labels,
                            sequence.address + index
                        ));
                    }
                }
                text.push('\n');
            }
            filled += sequence.steps.len();
            if self.debug {
                text.push('\n');
            }
        }

        let unused = self.program.microprogram_length.saturating_sub(filled);
        if self.debug {
            text.push_str(&format!("//Empty space ({} unused addresses)\n", unused));
        }
        if unused > 0 {
            let empty = match &self.program.empty_assertion {
                Some(assertion) => self.encode_assertion(assertion)?.to_string(),
                None => BitField::new(self.program.control_word_width).to_string(),
            };
            for _ in 0..unused {
                text.push_str(&empty);
                text.push('\n');
            }
        }
        Ok(text)
    }

    fn entrypoints_text(&self) -> Result<String, WriteError> {
        let width = self.program.address_width();
        let mut text = String::new();
        for opcode in 0..self.program.opcode_count() {
            let Some(symbol) = self.program.instruction_entrypoints.get(&opcode) else {
                text.push_str(&"0".repeat(width));
                if self.debug {
                    text.push_str(&format!(" //Instruction entrypoint {} is unused", opcode));
                }
                text.push('\n');
                continue;
            };
            let sequence = match self.program.symbols.get(symbol) {
                Some(Symbol::Sequence(sequence)) if sequence.is_macro => {
                    return Err(WriteError::MacroEntrypoint {
                        symbol: symbol.clone(),
                        opcode,
                    })
                }
                Some(Symbol::Sequence(sequence)) => sequence,
                _ => {
                    return Err(WriteError::UndefinedEntrypoint {
                        symbol: symbol.clone(),
                        opcode,
                    })
                }
            };
            text.push_str(&format!("{:0width$b}", sequence.address, width = width));
            if self.debug {
                text.push_str(&format!(
                    " //Instruction entrypoint {} at sequence {} (address {})",
                    opcode, symbol, sequence.address
                ));
            }
            text.push('\n');
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bits::BitMask, ds::ControlWordLabel, error::BitError, expander::expand_microprogram,
        linker::link_microprogram, parser::ParserState,
    };
    use std::io::Cursor;

    fn generate(input: &str, debug: bool) -> Result<RomImage, WriteError> {
        let mut parser = ParserState::new();
        parser.parse(Cursor::new(input)).expect("Parsing failed");
        let mut program = parser.into_microprogram();
        expand_microprogram(&mut program).expect("Expansion failed");
        let layout = link_microprogram(&mut program).expect("Linking failed");
        CodeGenerator::new(&program, debug).generate(&layout)
    }

    fn program_with_signal(msb: usize, lsb: usize) -> Microprogram {
        let mut program = Microprogram::new();
        program.control_word_width = 8;
        program.opcode_width = 1;
        program.microprogram_length = 2;
        program.control_word_labels.insert(
            "x".to_string(),
            ControlWordLabel {
                name: "x".to_string(),
                mask: BitMask::new(msb, lsb),
                bank: 1,
            },
        );
        program
    }

    fn assertion_of(program: &Microprogram, value: Value) -> Assertion {
        let mut assertion = Assertion::new(3);
        assertion
            .add_signal(&program.control_word_labels["x"], value)
            .unwrap();
        assertion
    }

    #[test]
    fn test_encode_shifts_signals_above_bank_selector() {
        let program = program_with_signal(3, 2);
        let generator = CodeGenerator::new(&program, false);
        let word = generator
            .encode_assertion(&assertion_of(&program, Value::Integer(2)))
            .unwrap();
        assert_eq!(word.to_string(), "00010001");
    }

    #[test]
    fn test_encode_truncates_oversized_value() {
        let program = program_with_signal(2, 1);
        let generator = CodeGenerator::new(&program, false);
        let word = generator
            .encode_assertion(&assertion_of(&program, Value::Integer(7)))
            .unwrap();
        assert_eq!(word.to_string(), "00001101");
    }

    #[test]
    fn test_error_unresolved_value() {
        let program = program_with_signal(2, 1);
        let generator = CodeGenerator::new(&program, false);
        let err = generator
            .encode_assertion(&assertion_of(&program, Value::Symbol("later".to_string())))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid/unresolved symbol 'later' in assertion on line 3"
        );
    }

    #[test]
    fn test_error_signal_outside_word() {
        let program = program_with_signal(9, 8);
        let generator = CodeGenerator::new(&program, false);
        let err = generator
            .encode_assertion(&assertion_of(&program, Value::Integer(1)))
            .unwrap_err();
        assert_eq!(
            err,
            WriteError::Bits {
                line: 3,
                source: BitError::IndexOutOfRange {
                    index: 10,
                    width: 8
                }
            }
        );
    }

    const SOURCE: &str = "config { controlwordwidth 8 microprogramlength 6 opwidth 2 bankmask 0 }
control x 0 1:0
control y 1 6:3
macro twice(v) { assert { x: v } ::second:: assert { x: v } }
sequence add { ::top:: twice(1) assert { y: top } }
sequence fetch { assert { x: 3 } }
empty { x: 0 }
entrypoints { fetch: fetch, 2: add, 3: fetch }
";

    #[test]
    fn test_rom_and_entrypoint_text() {
        let image = generate(SOURCE, false).unwrap();
        assert_eq!(
            image.microprogram,
            "00000110\n00000010\n00000010\n00010001\n00000000\n00000000\n"
        );
        assert_eq!(image.entrypoints, "000\n000\n001\n000\n");
    }

    #[test]
    fn test_debug_comments() {
        let image = generate(SOURCE, true).unwrap();
        let expected = "//Sequence 'fetch' at address 0
00000110

//Sequence 'add' at address 1
00000010   // ::top:: | (address 1)
00000010   // ::_twice_0.second:: | (address 2)
00010001

//Empty space (2 unused addresses)
00000000
00000000
";
        assert_eq!(image.microprogram, expected);
        assert_eq!(
            image.entrypoints,
            "000 //Instruction entrypoint 0 is unused
000 //Instruction entrypoint 1 is unused
001 //Instruction entrypoint 2 at sequence add (address 1)
000 //Instruction entrypoint 3 at sequence fetch (address 0)
"
        );
    }

    #[test]
    fn test_error_entrypoint_is_macro() {
        let source = SOURCE.replace("3: fetch", "3: twice");
        let err = generate(&source, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Symbol 'twice' bound to entrypoint 3 is a macro (macros cannot be bound to entrypoints)"
        );
    }

    #[test]
    fn test_error_entrypoint_undefined() {
        let source = SOURCE.replace("3: fetch", "3: nothing");
        let err = generate(&source, false).unwrap_err();
        assert_eq!(
            err,
            WriteError::UndefinedEntrypoint {
                symbol: "nothing".to_string(),
                opcode: 3
            }
        );
    }

    #[test]
    fn test_error_unexpanded_step() {
        let program = program_with_signal(2, 1);
        let generator = CodeGenerator::new(&program, false);
        let step = SequenceStep::MacroReference(crate::ds::MacroReference::new(12, "m", vec![]));
        let err = generator.encode_step(&step).unwrap_err();
        assert_eq!(err.to_string(), "Unexpanded macro found on line 12");
    }
}
