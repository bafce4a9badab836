use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "apkzip")]
#[command(version)]
#[command(about = "Rewrite an APK, aligning its entries and keeping everything else intact", long_about = None)]
#[command(after_help = "Examples:\n  \
  apkzip app.apk app-aligned.apk       align uncompressed entries to 4 bytes\n  \
  apkzip -s app.apk app-unsigned.apk   drop JAR signatures and the signing block\n  \
  apkzip -c -a 4 app.apk               check alignment without writing")]
pub struct Cli {
    /// Input APK
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output APK (required unless checking)
    #[arg(value_name = "OUTPUT", required_unless_present = "check")]
    pub output: Option<PathBuf>,

    /// Alignment of uncompressed entry data in bytes (0 disables)
    #[arg(short = 'a', long = "align", value_name = "N", default_value_t = 4)]
    pub alignment: u16,

    /// Leave entries that were unaligned in the input as they are
    #[arg(short = 'p', long)]
    pub preserve_alignment: bool,

    /// Pad the archive comment so the output size is a multiple of N
    #[arg(long = "size-align", value_name = "N")]
    pub size_alignment: Option<u32>,

    /// Drop JAR signature files and the manifest
    #[arg(short = 's', long)]
    pub strip_signatures: bool,

    /// Only check the alignment of INPUT
    #[arg(short = 'c', long)]
    pub check: bool,

    /// Overwrite OUTPUT if it exists
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Read INPUT with positional reads instead of memory-mapping it
    #[arg(long)]
    pub no_mmap: bool,

    /// Verbose output (-vv => trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    /// Log level used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            return log::LevelFilter::Error;
        }
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
