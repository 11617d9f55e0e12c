use log::debug;

use crate::{
    ds::{Assertion, Microprogram, SequenceLabel, SequenceStep, Value},
    error::LinkError,
    symbols::{Symbol, SymbolTree},
};

/// Places every sequence and resolves every symbolic value to an integer.
///
/// Returns the placed sequence names in ROM order.
pub(crate) fn link_microprogram(program: &mut Microprogram) -> Result<Vec<String>, LinkError> {
    let layout = place_sequences(program)?;
    for name in &layout {
        resolve_sequence(program, name)?;
    }
    resolve_empty_assertion(program)?;
    Ok(layout)
}

fn check_entrypoint(symbols: &SymbolTree, name: &str) -> Result<(), LinkError> {
    match symbols.get(name) {
        Some(Symbol::Sequence(sequence)) if sequence.is_macro => Err(LinkError::MacroEntrypoint {
            name: name.to_string(),
        }),
        Some(Symbol::Sequence(_)) => Ok(()),
        _ => Err(LinkError::NotASequence {
            name: name.to_string(),
        }),
    }
}

/// Assigns addresses, fetch first and then declaration order.
fn place_sequences(program: &mut Microprogram) -> Result<Vec<String>, LinkError> {
    let fetch = program
        .fetch_entrypoint
        .clone()
        .ok_or(LinkError::MissingFetch)?;
    check_entrypoint(&program.symbols, &fetch)?;
    if let Some(interrupt) = &program.interrupt_entrypoint {
        check_entrypoint(&program.symbols, interrupt)?;
    }

    let mut layout = vec![fetch.clone()];
    layout.extend(
        program
            .symbols
            .iter()
            .filter(|(name, symbol)| {
                *name != fetch && matches!(symbol, Symbol::Sequence(s) if !s.is_macro)
            })
            .map(|(name, _)| name.to_string()),
    );

    let mut next_address = 0;
    for name in &layout {
        let Some(Symbol::Sequence(sequence)) = program.symbols.get_mut(name) else {
            continue;
        };
        if let Some(SequenceStep::MacroReference(reference)) = sequence
            .first_macro_reference()
            .map(|position| &sequence.steps[position])
        {
            return Err(LinkError::UnexpandedMacro {
                line: reference.line,
            });
        }
        let base = next_address;
        sequence.address = base;
        sequence
            .symbols
            .for_each_label_mut(&mut |label: &mut SequenceLabel| label.base_address = base);
        debug!(
            "Placed sequence '{}' at address {} ({} words)",
            name,
            base,
            sequence.steps.len()
        );
        next_address += sequence.steps.len();
    }

    let available = program.microprogram_length;
    if next_address > available {
        return Err(LinkError::Overflow {
            needed: next_address,
            available,
            overflow: next_address - available,
        });
    }
    Ok(layout)
}

fn lookup(symbol: &str, line: usize, scopes: &[&SymbolTree]) -> Result<i64, LinkError> {
    let found = scopes
        .iter()
        .find_map(|scope| scope.get(symbol))
        .ok_or_else(|| LinkError::UndefinedSymbol {
            symbol: symbol.to_string(),
            line,
        })?;
    found.resolve().ok_or_else(|| LinkError::NotAValue {
        symbol: symbol.to_string(),
        line,
    })
}

/// Collects `(signal index, value)` for every symbolic value of an assertion.
fn resolve_assertion(
    assertion: &Assertion,
    scopes: &[&SymbolTree],
) -> Result<Vec<(usize, i64)>, LinkError> {
    let mut resolved = Vec::new();
    for (index, (_, value)) in assertion.signals.iter().enumerate() {
        if let Value::Symbol(symbol) = value {
            resolved.push((index, lookup(symbol, assertion.line, scopes)?));
        }
    }
    Ok(resolved)
}

fn apply(assertion: &mut Assertion, resolved: Vec<(usize, i64)>) {
    for (index, value) in resolved {
        assertion.signals[index].1 = Value::Integer(value);
    }
}

fn resolve_sequence(program: &mut Microprogram, name: &str) -> Result<(), LinkError> {
    let Some(Symbol::Sequence(sequence)) = program.symbols.get(name) else {
        return Ok(());
    };
    let scopes = [&sequence.symbols, &program.symbols];
    let mut resolved = Vec::new();
    for (index, step) in sequence.steps.iter().enumerate() {
        match step {
            SequenceStep::Assertion(assertion) => {
                resolved.push((index, resolve_assertion(assertion, &scopes)?));
            }
            SequenceStep::MacroReference(reference) => {
                return Err(LinkError::UnexpandedMacro {
                    line: reference.line,
                })
            }
        }
    }

    let Some(Symbol::Sequence(sequence)) = program.symbols.get_mut(name) else {
        return Ok(());
    };
    for (index, values) in resolved {
        if let SequenceStep::Assertion(assertion) = &mut sequence.steps[index] {
            apply(assertion, values);
        }
    }
    Ok(())
}

fn resolve_empty_assertion(program: &mut Microprogram) -> Result<(), LinkError> {
    let empty = program
        .empty_assertion
        .as_ref()
        .ok_or(LinkError::MissingEmptyAssertion)?;
    let resolved = resolve_assertion(empty, &[&program.symbols])?;
    if let Some(empty) = program.empty_assertion.as_mut() {
        apply(empty, resolved);
    }
    Ok(())
}
