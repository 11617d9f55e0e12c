use log::debug;

use crate::{
    ds::{MacroReference, Microprogram, Sequence, SequenceLabel, SequenceStep, Value},
    error::ExpansionError,
    symbols::Symbol,
};

/// Inlines every macro reference in every placeable sequence.
///
/// Each pass expands the first reference of the first sequence that still has
/// one, so references copied out of a macro body are picked up by a later
/// pass. Returns the number of references expanded.
pub(crate) fn expand_microprogram(program: &mut Microprogram) -> Result<usize, ExpansionError> {
    let mut expansions = 0;
    while let Some(host) = next_candidate(program) {
        expand_first_reference(program, &host)?;
        expansions += 1;
    }
    if expansions > 0 {
        debug!("Expanded {} macro references", expansions);
    }
    Ok(expansions)
}

fn next_candidate(program: &Microprogram) -> Option<String> {
    program.symbols.iter().find_map(|(name, symbol)| match symbol {
        Symbol::Sequence(sequence) if !sequence.is_macro && sequence.is_unexpanded() => {
            Some(name.to_string())
        }
        _ => None,
    })
}

fn host_sequence<'a>(program: &'a Microprogram, name: &str) -> Option<&'a Sequence> {
    match program.symbols.get(name) {
        Some(Symbol::Sequence(sequence)) => Some(sequence),
        _ => None,
    }
}

fn expand_first_reference(
    program: &mut Microprogram,
    host_name: &str,
) -> Result<(), ExpansionError> {
    let (position, reference) = match host_sequence(program, host_name).and_then(|host| {
        let position = host.first_macro_reference()?;
        match &host.steps[position] {
            SequenceStep::MacroReference(reference) => Some((position, reference.clone())),
            SequenceStep::Assertion(_) => None,
        }
    }) {
        Some(found) => found,
        None => return Ok(()),
    };

    let body = match program.symbols.get(&reference.symbol) {
        Some(Symbol::Sequence(sequence)) if sequence.is_macro => sequence.clone(),
        Some(Symbol::Sequence(_)) => {
            return Err(ExpansionError::NotAMacro {
                name: reference.symbol,
                line: reference.line,
            })
        }
        _ => {
            return Err(ExpansionError::UndefinedMacro {
                name: reference.symbol,
                line: reference.line,
            })
        }
    };
    if body.parameters.len() > reference.arguments.len() {
        return Err(ExpansionError::ArgumentCount {
            name: reference.symbol,
            line: reference.line,
            given: reference.arguments.len(),
            expected: body.parameters.len(),
        });
    }

    let Some(Symbol::Sequence(host)) = program.symbols.get_mut(host_name) else {
        return Ok(());
    };

    let instance = instance_name(host, &reference);
    let expansion = Expansion {
        instance: &instance,
        reference: &reference,
        body: &body,
    };
    let steps = body
        .steps
        .iter()
        .map(|step| expansion.copy_step(step))
        .collect::<Result<Vec<_>, _>>()?;

    // Labels past the reference move by the size difference of the splice
    let shift = body.steps.len() as isize - 1;
    host.symbols.for_each_label_mut(&mut |label: &mut SequenceLabel| {
        if label.local_address > position {
            label.local_address = label.local_address.saturating_add_signed(shift);
        }
    });

    let mut scope = body.symbols.clone();
    scope.for_each_label_mut(&mut |label: &mut SequenceLabel| label.local_address += position);
    if !host.symbols.set(&instance, Symbol::Scope(scope)) {
        return Err(ExpansionError::Scope {
            scope: instance,
            line: reference.line,
        });
    }

    debug!(
        "Expanded macro '{}' on line {} into '{}' as '{}' ({} steps)",
        reference.symbol,
        reference.line,
        host_name,
        instance,
        steps.len()
    );
    host.steps.splice(position..=position, steps);
    Ok(())
}

/// Picks the first `_macro_N` name not yet used in the host, nested under the
/// expansion the reference was copied from.
fn instance_name(host: &Sequence, reference: &MacroReference) -> String {
    let prefix = if reference.parent_reference.is_empty() {
        "_".to_string()
    } else {
        format!("{}._", reference.parent_reference)
    };
    let mut count = 0;
    loop {
        let name = format!("{}{}_{}", prefix, reference.symbol, count);
        if host.symbols.get(&name).is_none() {
            return name;
        }
        count += 1;
    }
}

struct Expansion<'a> {
    instance: &'a str,
    reference: &'a MacroReference,
    body: &'a Sequence,
}

impl Expansion<'_> {
    fn copy_step(&self, step: &SequenceStep) -> Result<SequenceStep, ExpansionError> {
        match step {
            SequenceStep::Assertion(assertion) => {
                let mut assertion = assertion.clone();
                for (_, value) in &mut assertion.signals {
                    *value = self.substitute(value);
                }
                Ok(SequenceStep::Assertion(assertion))
            }
            SequenceStep::MacroReference(nested) => {
                let name = &self.reference.symbol;
                if nested.symbol == *name {
                    return Err(ExpansionError::SelfReference {
                        name: name.clone(),
                        line: nested.line,
                    });
                }
                if let Some(start) = self
                    .reference
                    .callers
                    .iter()
                    .position(|caller| *caller == nested.symbol)
                {
                    let mut cycle = self.reference.callers[start..].to_vec();
                    cycle.push(name.clone());
                    cycle.push(nested.symbol.clone());
                    return Err(ExpansionError::RecursiveExpansion {
                        cycle: cycle.join(" -> "),
                        line: nested.line,
                    });
                }

                let mut nested = nested.clone();
                nested.parent_reference = self.instance.to_string();
                nested.callers = self.reference.callers.clone();
                nested.callers.push(name.clone());
                nested.arguments = nested
                    .arguments
                    .iter()
                    .map(|argument| self.substitute(argument))
                    .collect();
                Ok(SequenceStep::MacroReference(nested))
            }
        }
    }

    /// Parameters become the matching argument and the macro's own labels are
    /// rebound into the expansion scope. Anything else is left for the linker.
    fn substitute(&self, value: &Value) -> Value {
        let Value::Symbol(name) = value else {
            return value.clone();
        };
        if let Some(index) = self.body.parameters.iter().position(|p| p == name) {
            return self.reference.arguments[index].clone();
        }
        if self.body.symbols.contains_local(name) {
            return Value::Symbol(format!("{}.{}", self.instance, name));
        }
        value.clone()
    }
}
