//! The contract between the archive rewriter and a signing engine.
//!
//! The engine owns everything cryptographic: which entries it regenerates,
//! what it digests and what goes into the signing block. The rewriter owns
//! the ZIP structure and asks the engine at fixed points of a run:
//!
//! 1. [`SigningEngine::input_apk_signing_block`] once, with the input's block
//! 2. [`SigningEngine::input_jar_entry`] and, for kept entries,
//!    [`SigningEngine::output_jar_entry`] per entry in file order
//! 3. [`SigningEngine::output_jar_entries`] for entries to append
//! 4. [`SigningEngine::output_zip_sections`] for the signing block
//! 5. [`SigningEngine::output_done`]
//!
//! Engine failures are opaque to the rewriter, so every method returns an
//! [`anyhow::Result`].

use crate::io::{DataSink, DataSource};

/// What happens to an input entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Copy the entry into the output.
    Output,
    /// Drop the entry; the engine emits its own version later.
    OutputByEngine,
    /// Drop the entry.
    Skip,
}

/// The engine's answer for one input entry.
pub struct InputJarEntryInstructions {
    pub policy: OutputPolicy,
    /// Request to see the entry's uncompressed data before the run moves on.
    pub inspect: Option<Box<dyn InspectJarEntryRequest>>,
}

impl InputJarEntryInstructions {
    pub fn new(policy: OutputPolicy) -> Self {
        Self {
            policy,
            inspect: None,
        }
    }

    pub fn with_inspect(mut self, request: Box<dyn InspectJarEntryRequest>) -> Self {
        self.inspect = Some(request);
        self
    }
}

impl std::fmt::Debug for InputJarEntryInstructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputJarEntryInstructions")
            .field("policy", &self.policy)
            .field("inspect", &self.inspect.as_ref().map(|r| r.entry_name().to_string()))
            .finish()
    }
}

/// Request to be fed an entry's uncompressed data.
///
/// The rewriter streams the whole payload into [`data_sink`] and then calls
/// [`done`] exactly once.
///
/// [`data_sink`]: InspectJarEntryRequest::data_sink
/// [`done`]: InspectJarEntryRequest::done
pub trait InspectJarEntryRequest {
    fn entry_name(&self) -> &str;

    fn data_sink(&mut self) -> &mut dyn DataSink;

    fn done(&mut self) -> anyhow::Result<()>;
}

/// A new entry supplied by the engine, uncompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl JarEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Entries the engine wants appended to the output.
pub trait OutputJarSignatureRequest {
    fn additional_jar_entries(&self) -> &[JarEntry];

    /// Called once every additional entry has been written.
    fn done(&mut self) -> anyhow::Result<()>;
}

/// A signing block to insert in front of the Central Directory.
pub trait OutputApkSigningBlockRequest {
    /// Zero bytes to write before the block.
    fn padding_before(&self) -> usize {
        0
    }

    fn apk_signing_block(&self) -> &[u8];

    /// Called once the block has been written.
    fn done(&mut self) -> anyhow::Result<()>;
}

/// The signing collaborator driven by [`ApkSigner`](super::ApkSigner).
pub trait SigningEngine {
    /// The signing block found in the input, if any. Called first.
    fn input_apk_signing_block(&mut self, block: Option<&DataSource>) -> anyhow::Result<()>;

    /// Decide the fate of an input entry.
    fn input_jar_entry(&mut self, name: &str) -> anyhow::Result<InputJarEntryInstructions>;

    /// An input entry is being copied to the output.
    fn output_jar_entry(
        &mut self,
        name: &str,
    ) -> anyhow::Result<Option<Box<dyn InspectJarEntryRequest>>>;

    /// All input entries have been processed.
    fn output_jar_entries(&mut self) -> anyhow::Result<Option<Box<dyn OutputJarSignatureRequest>>>;

    /// The output archive is complete apart from the signing block.
    ///
    /// `eocd` records the Central Directory as starting right after
    /// `before_central_directory`. May be called more than once when the
    /// output size must be aligned; only the last request is honored.
    fn output_zip_sections(
        &mut self,
        before_central_directory: &DataSource,
        central_directory: &DataSource,
        eocd: &DataSource,
    ) -> anyhow::Result<Option<Box<dyn OutputApkSigningBlockRequest>>>;

    /// The output archive has been fully written.
    fn output_done(&mut self) -> anyhow::Result<()>;
}
