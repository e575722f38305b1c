use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use config::MemoryModelHint;
use std::path::{Path, PathBuf};

/// vmmfs: memory of a machine as a file system
///
/// Serves a physical memory dump as raw memory files plus structured
/// views of the processes found in it. Without OS awareness a single
/// process view can be set up from a known page table base (`--dtb`).
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Raw physical memory dump.
    #[arg(short, long, value_parser = validate_file)]
    pub device: PathBuf,

    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Disable background refresh.
    #[arg(long)]
    pub norefresh: bool,

    /// Forensic mode level, run once over the whole dump.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
    pub forensic: Option<u8>,

    /// Page table base of a single process view, in hex.
    #[arg(long, value_parser = parse_hex)]
    pub dtb: Option<u64>,

    /// Paging model used with `--dtb`.
    #[arg(long, value_enum, requires = "dtb")]
    pub memorymodel: Option<ModelArg>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file to stdout.
    Cat {
        path: String,
        /// Start offset, decimal or 0x prefixed hex.
        #[arg(long, default_value = "0", value_parser = parse_number)]
        offset: u64,
        /// Bytes to read; the rest of the file when absent.
        #[arg(long, value_parser = parse_number)]
        length: Option<u64>,
    },
    /// Print device, memory model and process summary.
    Info,
    /// Keep refreshing until interrupted.
    Serve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    X86,
    X86pae,
    X64,
}

impl From<ModelArg> for MemoryModelHint {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::X86 => Self::X86,
            ModelArg::X86pae => Self::X86Pae,
            ModelArg::X64 => Self::X64,
        }
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

fn parse_hex(text: &str) -> Result<u64, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|_| format!("`{text}` is not a hex number"))
}

fn parse_number(text: &str) -> Result<u64, String> {
    if text.starts_with("0x") || text.starts_with("0X") {
        return parse_hex(text);
    }
    text.parse()
        .map_err(|_| format!("`{text}` is not a valid number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn numbers_parse_in_both_radixes(n: u64) {
            prop_assert_eq!(parse_number(&n.to_string()), Ok(n));
            prop_assert_eq!(parse_number(&format!("{n:#x}")), Ok(n));
        }
    }

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_number("4096"), Ok(4096));
        assert_eq!(parse_number("0x1000"), Ok(4096));
        assert_eq!(parse_hex("1aa000"), Ok(0x1a_a000));
        assert!(parse_number("ten").is_err());
    }

    #[test]
    fn memory_model_requires_dtb() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let dump = file.path().to_str().unwrap();
        assert!(Cli::try_parse_from(["vmmfs", "-d", dump, "--memorymodel", "x64", "info"]).is_err());

        let cli = Cli::try_parse_from([
            "vmmfs", "-d", dump, "--dtb", "0x1aa000", "--memorymodel", "x86pae", "cat",
            "memory.pmem", "--length", "0x10",
        ])
        .unwrap();
        assert_eq!(cli.dtb, Some(0x1a_a000));
        assert_eq!(cli.memorymodel, Some(ModelArg::X86pae));
        assert!(matches!(cli.command, Command::Cat { length: Some(16), offset: 0, .. }));
    }

    #[test]
    fn forensic_level_is_bounded() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let dump = file.path().to_str().unwrap();
        assert!(Cli::try_parse_from(["vmmfs", "-d", dump, "--forensic", "5", "info"]).is_err());
    }
}
