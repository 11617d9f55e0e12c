mod bits;
mod cli;
mod codegen;
mod compiler;
mod ds;
mod error;
mod expander;
mod linker;
mod parser;
mod symbols;
mod tokenizer;

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use clap::Parser;
use cli::Cli;
use codegen::RomImage;
use error::Error;
use log::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = env_logger::Env::default().filter_or("MICROCODE_LOG", "warn");
    env_logger::init_from_env(env);

    let cli = Cli::parse();

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(filename) => Box::new(BufReader::new(fs::File::open(filename)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let image = compiler::compile(reader, cli.debug)?;

    match &cli.output {
        Some(directory) => write_image(&image, Path::new(directory))?,
        None => {
            print!("{}", image.microprogram);
            println!();
            print!("{}", image.entrypoints);
        }
    }

    Ok(())
}

fn write_image(image: &RomImage, directory: &Path) -> Result<(), Error> {
    fs::create_dir_all(directory)?;
    fs::write(directory.join("Microprogram"), &image.microprogram)?;
    fs::write(directory.join("Entrypoints"), &image.entrypoints)?;
    info!("Wrote Microprogram and Entrypoints to {}", directory.display());
    Ok(())
}
