use std::io::BufRead;

use log::info;

use crate::{
    codegen::{CodeGenerator, RomImage},
    error::Error,
    expander::expand_microprogram,
    linker::link_microprogram,
    parser::ParserState,
};

/// Runs the whole pipeline on one source: parse, expand, link and render.
///
/// Every run builds its own program model, so nothing is shared between runs.
pub(crate) fn compile<R: BufRead>(reader: R, debug: bool) -> Result<RomImage, Error> {
    let mut parser = ParserState::new();
    parser.parse(reader)?;
    let mut program = parser.into_microprogram();

    let expansions = expand_microprogram(&mut program)?;
    info!("Expanded {} macro references", expansions);

    let layout = link_microprogram(&mut program)?;
    info!("Linked {} sequences", layout.len());

    Ok(CodeGenerator::new(&program, debug).generate(&layout)?)
}
