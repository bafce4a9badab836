use apkzip::{
    ApkSigner, DataSource, MemorySink, PassThroughEngine, SignerConfig, SigningEngine,
    SigningSummary,
};

mod engine;
mod signing_tests;

/// Sign `input` into memory.
pub fn sign(
    input: &[u8],
    config: SignerConfig,
    engine: &mut dyn SigningEngine,
) -> apkzip::Result<(Vec<u8>, SigningSummary)> {
    let mut output = MemorySink::new();
    let summary =
        ApkSigner::new(config).sign(&DataSource::from_bytes(input.to_vec()), &mut output, engine)?;
    Ok((output.into_inner(), summary))
}

/// Rewrite `input` with the pass-through engine.
pub fn rewrite(input: &[u8], config: SignerConfig) -> (Vec<u8>, SigningSummary) {
    sign(input, config, &mut PassThroughEngine::new()).unwrap()
}

/// Configuration with alignment disabled.
pub fn no_alignment() -> SignerConfig {
    SignerConfig {
        alignment: 0,
        ..SignerConfig::default()
    }
}
