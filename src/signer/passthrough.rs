use log::debug;

use super::engine::*;
use crate::io::DataSource;

const META_INF: &str = "META-INF/";
const SIGNATURE_SUFFIXES: [&str; 4] = [".SF", ".RSA", ".DSA", ".EC"];

/// An engine that signs nothing.
///
/// Every entry is kept and no signing block is produced, so running it
/// through [`ApkSigner`](super::ApkSigner) only re-aligns the archive. With
/// `strip_signatures` the JAR signature files and the manifest are dropped,
/// and so is any input signing block, which the rewriter never copies.
#[derive(Debug, Clone, Default)]
pub struct PassThroughEngine {
    strip_signatures: bool,
    had_signing_block: bool,
}

impl PassThroughEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strip_signatures(mut self, strip: bool) -> Self {
        self.strip_signatures = strip;
        self
    }

    /// Whether the input carried an APK Signing Block.
    pub fn had_signing_block(&self) -> bool {
        self.had_signing_block
    }
}

/// `META-INF/MANIFEST.MF` or a JAR signature file directly under `META-INF/`.
pub fn is_jar_signature_entry(name: &str) -> bool {
    let Some(file) = name.strip_prefix(META_INF) else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    file == "MANIFEST.MF" || SIGNATURE_SUFFIXES.iter().any(|suffix| file.ends_with(suffix))
}

impl SigningEngine for PassThroughEngine {
    fn input_apk_signing_block(&mut self, block: Option<&DataSource>) -> anyhow::Result<()> {
        self.had_signing_block = block.is_some();
        Ok(())
    }

    fn input_jar_entry(&mut self, name: &str) -> anyhow::Result<InputJarEntryInstructions> {
        let policy = if self.strip_signatures && is_jar_signature_entry(name) {
            debug!("Stripping signature entry {name}");
            OutputPolicy::Skip
        } else {
            OutputPolicy::Output
        };
        Ok(InputJarEntryInstructions::new(policy))
    }

    fn output_jar_entry(
        &mut self,
        _name: &str,
    ) -> anyhow::Result<Option<Box<dyn InspectJarEntryRequest>>> {
        Ok(None)
    }

    fn output_jar_entries(&mut self) -> anyhow::Result<Option<Box<dyn OutputJarSignatureRequest>>> {
        Ok(None)
    }

    fn output_zip_sections(
        &mut self,
        _before_central_directory: &DataSource,
        _central_directory: &DataSource,
        _eocd: &DataSource,
    ) -> anyhow::Result<Option<Box<dyn OutputApkSigningBlockRequest>>> {
        Ok(None)
    }

    fn output_done(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
