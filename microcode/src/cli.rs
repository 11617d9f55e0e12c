use clap::Parser;

#[derive(Parser)]
#[command(name = "Microcode Compiler")]
#[command(version = "0.1.0")]
#[command(about = "Compiles microprogram descriptions into control-store ROM images", long_about = None)]
pub(crate) struct Cli {
    /// Input file (defaults to stdin)
    #[arg(short, long)]
    pub(crate) input: Option<String>,

    /// Output directory for the Microprogram and Entrypoints files (defaults to stdout)
    #[arg(short, long)]
    pub(crate) output: Option<String>,

    /// Annotate the output with sequence, label and entrypoint comments
    #[arg(short, long)]
    pub(crate) debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["microcode"]).unwrap();
        assert_eq!(cli.input, None);
        assert_eq!(cli.output, None);
        assert!(!cli.debug);
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::try_parse_from(["microcode", "-i", "cpu.mc", "--output", "rom", "-d"])
            .unwrap();
        assert_eq!(cli.input.as_deref(), Some("cpu.mc"));
        assert_eq!(cli.output.as_deref(), Some("rom"));
        assert!(cli.debug);
    }
}
