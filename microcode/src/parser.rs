use crate::{
    bits::BitMask,
    ds::{
        Assertion, ControlWordLabel, MacroReference, Microprogram, Sequence, SequenceLabel,
        SequenceStep, Value,
    },
    error::ParseError,
    symbols::Symbol,
    tokenizer::{tokenize, Token, TokenKind},
};
use log::{info, warn};
use std::io::{BufRead, Read};

#[derive(Debug)]
pub(crate) struct ParserState {
    line_number: usize,
    tokens: Vec<Token>,
    position: usize,
    bank_mask_defined: bool,
    microprogram: Microprogram,
}

impl ParserState {
    pub(crate) fn new() -> Self {
        ParserState {
            line_number: 1,
            tokens: Vec::new(),
            position: 0,
            bank_mask_defined: false,
            microprogram: Microprogram::new(),
        }
    }

    /// Helper method to create a ParseError with the current line number
    fn parse_error(&self, message: &str) -> ParseError {
        ParseError::new(self.line_number, message)
    }

    fn unexpected(&self, token: &Token, message: &str) -> ParseError {
        ParseError::new(
            token.line,
            &format!("{}, found '{}'", message, token.describe()),
        )
    }

    pub(crate) fn into_microprogram(self) -> Microprogram {
        self.microprogram
    }
}

impl ParserState {
    pub(crate) fn parse<R: BufRead>(&mut self, mut reader: R) -> Result<(), ParseError> {
        let mut source = String::new();
        reader
            .read_to_string(&mut source)
            .map_err(|e| self.parse_error(&format!("Failed to read input: {}", e)))?;
        self.tokens = tokenize(&source)?;
        self.position = 0;

        while let Some(token) = self.next_token() {
            let keyword = match &token.kind {
                TokenKind::Word(word) => word.to_lowercase(),
                _ => return Err(self.unexpected(&token, "Keyword expected")),
            };
            match keyword.as_str() {
                "config" => self.parse_config()?,
                "const" => self.parse_constant()?,
                "control" => self.parse_control_word_label()?,
                "sequence" => self.parse_sequence(false)?,
                "macro" => self.parse_sequence(true)?,
                "empty" => self.parse_empty()?,
                "entrypoints" => self.parse_entrypoints()?,
                _ => return Err(self.unexpected(&token, "Keyword expected")),
            }
        }

        if !self.bank_mask_defined {
            return Err(self.parse_error("Missing config 'bankmask'"));
        }
        self.microprogram.validate(self.line_number)
    }
}

impl ParserState {
    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position)?.clone();
        self.position += 1;
        self.line_number = token.line;
        Some(token)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.position).map(|token| &token.kind)
    }

    fn expect_token(&mut self, what: &str) -> Result<Token, ParseError> {
        self.next_token()
            .ok_or_else(|| self.parse_error(&format!("{} expected, found end of input", what)))
    }

    fn expect_word(&mut self) -> Result<String, ParseError> {
        let token = self.expect_token("Word")?;
        match token.kind {
            TokenKind::Word(word) => Ok(word),
            _ => Err(self.unexpected(&token, "Word expected")),
        }
    }

    fn expect_integer(&mut self) -> Result<i64, ParseError> {
        let token = self.expect_token("Integer")?;
        match token.kind {
            TokenKind::Integer(value) => Ok(value),
            _ => Err(self.unexpected(&token, "Integer expected")),
        }
    }

    fn expect_unsigned(&mut self) -> Result<u64, ParseError> {
        let value = self.expect_integer()?;
        u64::try_from(value)
            .map_err(|_| self.parse_error(&format!("Value '{}' must not be negative", value)))
    }

    fn expect_open_block(&mut self) -> Result<(), ParseError> {
        let token = self.expect_token("'{'")?;
        match token.kind {
            TokenKind::OpenBlock => Ok(()),
            _ => Err(self.unexpected(&token, "'{' expected")),
        }
    }

    fn symbol_name(&self, name: &str) -> Result<(), ParseError> {
        if name.contains('.') {
            return Err(self.parse_error(&format!("Symbol name '{}' cannot contain '.'", name)));
        }
        Ok(())
    }

    /// Binds a top-level symbol; redefinitions override with a warning.
    fn define_symbol(&mut self, name: &str, symbol: Symbol) -> Result<(), ParseError> {
        self.symbol_name(name)?;
        if self.microprogram.symbols.contains_local(name) {
            warn!(
                "Duplicate symbol '{}' defined on line {}, previous definition will be overridden",
                name, self.line_number
            );
        }
        if !self.microprogram.symbols.set(name, symbol) {
            return Err(self.parse_error(&format!("Cannot define symbol '{}'", name)));
        }
        Ok(())
    }
}

impl ParserState {
    fn parse_config(&mut self) -> Result<(), ParseError> {
        self.expect_open_block()?;
        loop {
            let token = self.expect_token("Config name or '}'")?;
            let name = match &token.kind {
                TokenKind::CloseBlock => return Ok(()),
                TokenKind::Word(word) => word.to_lowercase(),
                _ => return Err(self.unexpected(&token, "Config name expected")),
            };
            match name.as_str() {
                "controlwordwidth" => {
                    let width = self.expect_unsigned()? as usize;
                    self.microprogram.control_word_width = width;
                    info!("Set control word width to {}", width);
                }
                "microprogramlength" => {
                    let length = self.expect_unsigned()? as usize;
                    self.microprogram.microprogram_length = length;
                    info!("Set microprogram length to {}", length);
                }
                "opwidth" => {
                    let width = self.expect_unsigned()? as usize;
                    self.microprogram.opcode_width = width;
                    info!("Set opcode width to {}", width);
                }
                "bankmask" => {
                    let msb = self.expect_unsigned()? as usize;
                    self.microprogram.bank_selector_mask = BitMask::new(msb, 0);
                    self.bank_mask_defined = true;
                    info!(
                        "Set control word bank select mask to {}",
                        self.microprogram.bank_selector_mask
                    );
                }
                _ => return Err(self.unexpected(&token, "Config name expected")),
            }
        }
    }

    fn parse_constant(&mut self) -> Result<(), ParseError> {
        let name = self.expect_word()?;
        let value = self.expect_integer()?;
        self.define_symbol(&name, Symbol::Constant(value))
    }

    fn parse_control_word_label(&mut self) -> Result<(), ParseError> {
        let name = self.expect_word()?;
        let bank = self.expect_unsigned()?;
        let token = self.expect_token("Number or Number:Number pair")?;
        let mask = match token.kind {
            TokenKind::Integer(bit) if bit >= 0 => BitMask::single(bit as usize),
            TokenKind::Pair(Value::Integer(msb), Value::Integer(lsb)) if msb >= 0 && lsb >= 0 => {
                BitMask::new(msb as usize, lsb as usize)
            }
            _ => return Err(self.unexpected(&token, "Number or Number:Number pair expected")),
        };
        if self.microprogram.control_word_labels.contains_key(&name) {
            return Err(self.parse_error(&format!(
                "Control word label '{}' defined more than once",
                name
            )));
        }
        info!(
            "Added new control word label '{}' on bank {} at {}",
            name, bank, mask
        );
        self.microprogram
            .control_word_labels
            .insert(name.clone(), ControlWordLabel { name, mask, bank });
        Ok(())
    }
}

impl ParserState {
    /// Parses a `sequence` or `macro` definition
    fn parse_sequence(&mut self, is_macro: bool) -> Result<(), ParseError> {
        let name = self.expect_word()?;
        let mut sequence = Sequence::new(is_macro);

        if let Some(TokenKind::ParenList(_)) = self.peek_kind() {
            let token = self.expect_token("Parameter list")?;
            if !is_macro {
                return Err(self.parse_error("Only macros can define a parameter list"));
            }
            if let TokenKind::ParenList(parameters) = token.kind {
                for parameter in parameters {
                    match parameter {
                        Value::Symbol(parameter) => sequence.parameters.push(parameter),
                        Value::Integer(_) => {
                            return Err(self.parse_error(
                                "Parameter definitions may only contain words",
                            ))
                        }
                    }
                }
            }
        }

        self.expect_open_block()?;
        loop {
            let token = self.expect_token("Statement or '}'")?;
            let word = match token.kind {
                TokenKind::CloseBlock => break,
                TokenKind::Word(ref word) => word.clone(),
                _ => return Err(self.unexpected(&token, "Statement expected")),
            };
            if let Some(label) = word
                .strip_prefix("::")
                .and_then(|rest| rest.strip_suffix("::"))
                .filter(|label| !label.is_empty())
            {
                self.symbol_name(label)?;
                if sequence.symbols.contains_local(label) {
                    return Err(self.parse_error(&format!(
                        "Label '{}' defined more than once in '{}'",
                        label, name
                    )));
                }
                let here = SequenceLabel::new(sequence.steps.len());
                if !sequence.symbols.set(label, Symbol::Label(here)) {
                    return Err(self.parse_error(&format!("Cannot define label '{}'", label)));
                }
            } else if let Some(TokenKind::ParenList(_)) = self.peek_kind() {
                let arguments = match self.expect_token("Argument list")?.kind {
                    TokenKind::ParenList(arguments) => arguments,
                    _ => unreachable!(),
                };
                let reference = MacroReference::new(token.line, &word, arguments);
                sequence.steps.push(SequenceStep::MacroReference(reference));
            } else if word.eq_ignore_ascii_case("assert") {
                let assertion = self.parse_assertion()?;
                sequence.steps.push(SequenceStep::Assertion(assertion));
            } else {
                return Err(self.unexpected(&token, "Statement expected"));
            }
        }

        self.define_symbol(&name, Symbol::Sequence(sequence))?;
        if is_macro {
            info!("Processed macro '{}'", name);
        } else {
            info!("Processed sequence '{}'", name);
        }
        Ok(())
    }

    fn parse_assertion(&mut self) -> Result<Assertion, ParseError> {
        self.expect_open_block()?;
        let mut assertion = Assertion::new(self.line_number);
        loop {
            let token = self.expect_token("Signal assertion or '}'")?;
            match token.kind {
                TokenKind::CloseBlock => break,
                TokenKind::Comma => continue,
                TokenKind::Pair(Value::Symbol(ref name), ref value) => {
                    let label = self
                        .microprogram
                        .control_word_labels
                        .get(name)
                        .ok_or_else(|| {
                            self.parse_error(&format!("Nonexistent control word label '{}'", name))
                        })?;
                    assertion.add_signal(label, value.clone())?;
                }
                _ => return Err(self.unexpected(&token, "Signal assertion expected")),
            }
        }
        Ok(assertion)
    }

    fn parse_empty(&mut self) -> Result<(), ParseError> {
        let assertion = self.parse_assertion()?;
        if self.microprogram.empty_assertion.is_some() {
            warn!(
                "Duplicate empty assertion on line {}, previous definition will be overridden",
                assertion.line
            );
        }
        self.microprogram.empty_assertion = Some(assertion);
        Ok(())
    }

    fn parse_entrypoints(&mut self) -> Result<(), ParseError> {
        self.expect_open_block()?;
        loop {
            let token = self.expect_token("Entrypoint or '}'")?;
            let (key, symbol) = match token.kind {
                TokenKind::CloseBlock => return Ok(()),
                TokenKind::Comma => continue,
                TokenKind::Pair(ref key, Value::Symbol(ref symbol)) => (key, symbol.clone()),
                TokenKind::Pair(..) => {
                    return Err(self.unexpected(&token, "Entrypoint pair value must be a symbol"))
                }
                _ => return Err(self.unexpected(&token, "Entrypoint expected")),
            };
            match key {
                Value::Symbol(name) if name.eq_ignore_ascii_case("fetch") => {
                    self.microprogram.fetch_entrypoint = Some(symbol);
                }
                Value::Symbol(name) if name.eq_ignore_ascii_case("interrupt") => {
                    self.microprogram.interrupt_entrypoint = Some(symbol);
                }
                Value::Integer(opcode) if *opcode >= 0 => {
                    let previous = self
                        .microprogram
                        .instruction_entrypoints
                        .insert(*opcode as u64, symbol);
                    if previous.is_some() {
                        warn!(
                            "Duplicate entrypoint definition on line {}, previous value overridden",
                            token.line
                        );
                    }
                }
                _ => return Err(self.unexpected(&token, "Invalid entrypoint")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = r#"
        config {
            controlwordwidth 16
            microprogramlength 32
            opwidth 2
            bankmask 0
        }
        control alu 0 3:1
        control ld 0 4
        control pc 1 5:4
    "#;

    /// Helper function to create a ParserState and parse the given input
    fn parse_input(input: &str) -> Result<Microprogram, ParseError> {
        let mut parser = ParserState::new();
        let reader = Cursor::new(input);
        parser.parse(reader)?;
        Ok(parser.into_microprogram())
    }

    fn with_header(body: &str) -> String {
        format!("{}{}", HEADER, body)
    }

    fn sequence<'a>(program: &'a Microprogram, name: &str) -> &'a Sequence {
        match program.symbols.get(name) {
            Some(Symbol::Sequence(sequence)) => sequence,
            other => panic!("'{}' is not a sequence: {:?}", name, other),
        }
    }

    #[test]
    fn test_valid_input_all_keywords() {
        let input = with_header(
            r#"
            const three 3
            macro inc(amount) {
                assert { alu: amount }
            }
            sequence fetch {
                assert { alu: three, ld: 1 }
                ::again::
                inc(2)
                assert { pc: again }
            }
            empty { alu: 0 }
            entrypoints { fetch: fetch, interrupt: fetch, 1: fetch }
            "#,
        );
        let program = parse_input(&input).expect("Parsing failed");

        assert_eq!(program.control_word_width, 16);
        assert_eq!(program.microprogram_length, 32);
        assert_eq!(program.opcode_width, 2);
        assert_eq!(program.bank_selector_mask, BitMask::new(0, 0));
        assert_eq!(program.control_word_labels.len(), 3);
        assert_eq!(program.symbols.get("three"), Some(&Symbol::Constant(3)));
        assert_eq!(program.fetch_entrypoint.as_deref(), Some("fetch"));
        assert_eq!(program.interrupt_entrypoint.as_deref(), Some("fetch"));
        assert_eq!(program.instruction_entrypoints.get(&1).map(String::as_str), Some("fetch"));
        assert!(program.empty_assertion.is_some());

        let inc = sequence(&program, "inc");
        assert!(inc.is_macro);
        assert_eq!(inc.parameters, ["amount"]);

        let fetch = sequence(&program, "fetch");
        assert!(!fetch.is_macro);
        assert_eq!(fetch.steps.len(), 3);
        assert_eq!(
            fetch.symbols.get("again"),
            Some(&Symbol::Label(SequenceLabel::new(1)))
        );
        match &fetch.steps[1] {
            SequenceStep::MacroReference(reference) => {
                assert_eq!(reference.symbol, "inc");
                assert_eq!(reference.arguments, [Value::Integer(2)]);
                assert!(reference.parent_reference.is_empty());
            }
            other => panic!("expected a macro reference, got {:?}", other),
        }
        match &fetch.steps[2] {
            SequenceStep::Assertion(assertion) => {
                assert_eq!(assertion.bank, 1);
                assert_eq!(assertion.signals[0].1, Value::Symbol("again".to_string()));
            }
            other => panic!("expected an assertion, got {:?}", other),
        }
    }

    #[test]
    fn test_sequences_keep_declaration_order() {
        let input = with_header("sequence b {}\nconst k 1\nmacro a {}\nsequence c {}");
        let program = parse_input(&input).expect("Parsing failed");
        let names: Vec<_> = program.symbols.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "k", "a", "c"]);
    }

    #[test]
    fn test_duplicate_symbol_overrides() {
        let input = with_header("const k 1\nconst k 2");
        let program = parse_input(&input).expect("Parsing failed");
        assert_eq!(program.symbols.get("k"), Some(&Symbol::Constant(2)));
    }

    #[test]
    fn test_error_keyword_expected() {
        let err = parse_input("42").unwrap_err();
        assert_eq!(err.to_string(), "Error on line 1: Keyword expected, found '42'");
        let err = parse_input("\nfrobnicate").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Keyword expected, found 'frobnicate'"
        );
    }

    #[test]
    fn test_error_unknown_config() {
        let err = parse_input("config {\n speed 3 }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Config name expected, found 'speed'"
        );
    }

    #[test]
    fn test_error_missing_bankmask() {
        let input = "config { controlwordwidth 8 microprogramlength 4 opwidth 1 }";
        let err = parse_input(input).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 1: Missing config 'bankmask'");
    }

    #[test]
    fn test_error_zero_microprogram_length() {
        let input = "config {\n controlwordwidth 8\n opwidth 1\n bankmask 0\n}";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 5: The microprogram length must be greater than zero"
        );
    }

    #[test]
    fn test_error_duplicate_control_line() {
        let input = with_header("control alu 0 7");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Control word label 'alu' defined more than once"
        );
    }

    #[test]
    fn test_error_control_line_mask() {
        let input = with_header("control bad 0 foo");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Number or Number:Number pair expected, found 'foo'"
        );
    }

    #[test]
    fn test_error_parameters_on_sequence() {
        let input = with_header("sequence s(a) {}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Only macros can define a parameter list"
        );
    }

    #[test]
    fn test_error_integer_parameter() {
        let input = with_header("macro m(a, 3) {}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Parameter definitions may only contain words"
        );
    }

    #[test]
    fn test_error_nonexistent_signal() {
        let input = with_header("sequence s {\n assert { nope: 1 }\n}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 12: Nonexistent control word label 'nope'"
        );
    }

    #[test]
    fn test_error_mixed_banks() {
        let input = with_header("sequence s {\n assert { alu: 1, pc: 2 }\n}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 12: Assertion attempts to assert signal 'pc' on bank 1 while already on bank 0"
        );
    }

    #[test]
    fn test_error_duplicate_label() {
        let input = with_header("sequence s {\n ::a::\n ::a::\n}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 13: Label 'a' defined more than once in 's'"
        );
    }

    #[test]
    fn test_error_bad_statement() {
        let input = with_header("sequence s {\n jump\n}");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 12: Statement expected, found 'jump'"
        );
    }

    #[test]
    fn test_error_unfinished_sequence() {
        let input = with_header("sequence s {\n assert { alu: 1 }");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 12: Statement or '}' expected, found end of input"
        );
    }

    #[test]
    fn test_error_invalid_entrypoint() {
        let input = with_header("entrypoints { reset: s }");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Invalid entrypoint, found 'reset:s'"
        );
        let input = with_header("entrypoints { 1: 2 }");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Entrypoint pair value must be a symbol, found '1:2'"
        );
    }

    #[test]
    fn test_error_dotted_symbol_name() {
        let input = with_header("const a.b 1");
        let err = parse_input(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 11: Symbol name 'a.b' cannot contain '.'"
        );
    }
}
