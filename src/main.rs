//! Main entry point for the apkzip CLI application.
//!
//! Rewrites an APK with the built-in pass-through engine (aligning entries
//! and optionally stripping signatures), or checks an APK's alignment.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use apkzip::{
    ApkSigner, Cli, DataSource, FileSink, PassThroughEngine, SignerConfig, verify_alignment,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let input = open_input(&cli.input, cli.no_mmap)
        .with_context(|| format!("Failed to open {}", cli.input.display()))?;

    if cli.check {
        return check_alignment(&input, &cli);
    }

    // clap guarantees OUTPUT unless checking.
    let Some(output) = cli.output.as_deref() else {
        bail!("No output file given");
    };
    rewrite(&input, output, &cli)
}

fn open_input(path: &Path, no_mmap: bool) -> apkzip::Result<DataSource> {
    if no_mmap {
        DataSource::open(path)
    } else {
        DataSource::map(path)
    }
}

/// Print each entry's data offset and whether it is aligned, zipalign style.
fn check_alignment(input: &DataSource, cli: &Cli) -> Result<()> {
    let entries = verify_alignment(input, cli.alignment)?;

    if !cli.quiet {
        println!(
            "Verifying alignment of {} ({})...",
            cli.input.display(),
            cli.alignment
        );
    }
    let mut failed = 0usize;
    for entry in &entries {
        let status = if entry.compressed {
            "OK - compressed".to_string()
        } else if entry.is_aligned() {
            "OK".to_string()
        } else {
            failed += 1;
            format!("BAD - {}", entry.data_offset % entry.alignment as u64)
        };
        if !cli.quiet {
            println!("{:>8} {} ({status})", entry.data_offset, entry.name);
        }
    }

    if failed > 0 {
        bail!("Verification FAILED: {failed} of {} entries unaligned", entries.len());
    }
    if !cli.quiet {
        println!("Verification successful");
    }
    Ok(())
}

/// Rewrite `input` to `output` through a temporary sibling file.
///
/// The output only appears once it is complete; on failure the temporary
/// file is removed.
fn rewrite(input: &DataSource, output: &Path, cli: &Cli) -> Result<()> {
    if output.exists() && !cli.force {
        bail!("{} exists (use -f to overwrite)", output.display());
    }

    let temp = temp_sibling(output);
    let result = write_output(input, &temp, cli).and_then(|()| {
        std::fs::rename(&temp, output)
            .with_context(|| format!("Failed to move output into place at {}", output.display()))
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

fn write_output(input: &DataSource, path: &Path, cli: &Cli) -> Result<()> {
    let config = SignerConfig {
        alignment: cli.alignment,
        preserve_alignment: cli.preserve_alignment,
        output_size_alignment: cli.size_alignment,
    };
    let mut engine = PassThroughEngine::new().strip_signatures(cli.strip_signatures);
    let mut sink = FileSink::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let summary = ApkSigner::new(config).sign(input, &mut sink, &mut engine)?;
    sink.finish()?;

    if !cli.quiet {
        println!(
            "{}: {} entries, {} re-aligned, {} stripped, {} bytes",
            cli.input.display(),
            summary.copied,
            summary.realigned,
            summary.skipped,
            summary.output_size
        );
    }
    if engine.had_signing_block() {
        log::warn!("Dropped the input's APK Signing Block; re-sign the output");
    }
    Ok(())
}

/// `.NAME.tmp` next to `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}
