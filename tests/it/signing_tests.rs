use apkzip::signer::OutputPolicy;
use apkzip::zip::{
    CompressionMethod, DEFAULT_NEW_ENTRY_TIMESTAMP, DosDateTime, EndOfCentralDirectory,
};
use apkzip::{
    ApkSigner, DataSource, Error, FileSink, MemorySink, PassThroughEngine, SignerConfig,
};
use std::path::Path;

use crate::archive::{ArchiveBuilder, Entry, parse, signing_block};
use crate::engine::ScriptedEngine;
use crate::{no_alignment, rewrite, sign};

fn sample_apk() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .entry(Entry::deflated("AndroidManifest.xml", b"<manifest package=\"x\"/>").modified(0x5921, 0x6000))
        .entry(Entry::stored("classes.dex", b"dex\n035\0payload").modified(0x5a21, 0x1000))
        .entry(Entry::stored("META-INF/CERT.SF", b"Signature-Version: 1.0\r\n").modified(0x5b21, 0))
        .entry(Entry::stored("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n").modified(0x5921, 0))
}

#[test]
fn pass_through_reproduces_input() {
    let input = ArchiveBuilder::new()
        .stored("a", b"first")
        .gap(b"\xde\xad\xbe\xef")
        .deflated("b/c.txt", &b"squeeze me ".repeat(40))
        .stored("d", b"")
        .comment(b"built by a test")
        .build();

    let (output, summary) = rewrite(&input, no_alignment());
    assert_eq!(output, input);
    assert_eq!(summary.copied, 3);
    assert_eq!(summary.output_size, input.len() as u64);
    assert_eq!(summary.signing_block_size, 0);
}

#[test]
fn gaps_survive_realignment() {
    let input = ArchiveBuilder::new()
        .stored("a", b"first")
        .gap(b"GAP-BYTES")
        .stored("b", b"second")
        .build();

    let (output, summary) = rewrite(&input, SignerConfig::default());
    assert!(summary.realigned > 0);
    assert!(output.windows(9).any(|w| w == b"GAP-BYTES"));

    let parsed = parse(&output);
    assert_eq!(parsed.contents("a"), b"first");
    assert_eq!(parsed.contents("b"), b"second");
}

#[test]
fn central_directory_order_is_kept() {
    let input = ArchiveBuilder::new()
        .stored("first", b"1")
        .stored("second", b"2")
        .stored("third", b"3")
        .reverse_central_directory()
        .build();

    let (output, _) = rewrite(&input, no_alignment());
    assert_eq!(output, input);

    let (output, _) = rewrite(&input, SignerConfig::default());
    let parsed = parse(&output);
    assert_eq!(parsed.names(), ["third", "second", "first"]);
    let first = parsed.entry("first").1.start_offset();
    let third = parsed.entry("third").1.start_offset();
    assert!(first < third);
}

#[test]
fn engine_drives_the_output() {
    let input = sample_apk().build();
    let block = signing_block(&[(0x7109871a, b"v2 signature")]);
    let mut engine = ScriptedEngine::new()
        .policy("META-INF/CERT.SF", OutputPolicy::Skip)
        .policy("META-INF/MANIFEST.MF", OutputPolicy::OutputByEngine)
        .inspect_input("META-INF/MANIFEST.MF")
        .inspect_output("AndroidManifest.xml")
        .inspect_output("META-INF/CERT.SF")
        .add("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nCreated-By: test\r\n")
        .add("META-INF/CERT.SF", b"Signature-Version: 1.0\r\nCreated-By: test\r\n")
        .signing_block(block.clone(), 3);
    let observed = engine.observed.clone();

    let (output, summary) = sign(&input, SignerConfig::default(), &mut engine).unwrap();

    assert_eq!(summary.copied, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.output_by_engine, 1);
    assert_eq!(summary.added, 2);
    assert_eq!(summary.signing_block_size, 3 + block.len() as u64);
    assert_eq!(summary.output_size, output.len() as u64);

    let parsed = parse(&output);
    assert_eq!(
        parsed.names(),
        [
            "AndroidManifest.xml",
            "classes.dex",
            "META-INF/MANIFEST.MF",
            "META-INF/CERT.SF"
        ]
    );
    let eocd = EndOfCentralDirectory::from_bytes(&parsed.sections.eocd).unwrap();
    assert_eq!(eocd.total_entries, 4);
    assert_eq!(eocd.disk_entries, 4);

    // New entries are deflated and dated like the newest surviving entry.
    let newest = DosDateTime {
        date: 0x5a21,
        time: 0x1000,
    };
    for name in ["META-INF/MANIFEST.MF", "META-INF/CERT.SF"] {
        let (cd, _) = parsed.entry(name);
        assert_eq!(cd.compression_method(), CompressionMethod::Deflate);
        assert_eq!(cd.last_modified(), newest);
    }
    assert_eq!(
        parsed.contents("META-INF/CERT.SF"),
        b"Signature-Version: 1.0\r\nCreated-By: test\r\n"
    );

    let observed = observed.borrow();
    assert_eq!(
        observed.inspected["input:META-INF/MANIFEST.MF"],
        b"Manifest-Version: 1.0\r\n"
    );
    assert_eq!(
        observed.inspected["output:AndroidManifest.xml"],
        b"<manifest package=\"x\"/>"
    );
    assert_eq!(
        observed.inspected["output:META-INF/CERT.SF"],
        b"Signature-Version: 1.0\r\nCreated-By: test\r\n"
    );

    // The block sits between the entries and the Central Directory.
    let (before_cd, cd, seen_eocd) = observed.zip_sections.clone().unwrap();
    let entries_end = before_cd.len() as u64;
    assert_eq!(&output[..before_cd.len()], &before_cd[..]);
    assert_eq!(&output[before_cd.len()..before_cd.len() + 3], &[0, 0, 0]);
    let found = parsed.sections.signing_block.as_ref().unwrap();
    assert_eq!(found.offset, entries_end + 3);
    assert_eq!(found.contents.to_vec().unwrap(), block);

    let cd_offset = parsed.sections.central_directory_offset;
    assert_eq!(cd_offset, entries_end + 3 + block.len() as u64);
    assert_eq!(&output[cd_offset as usize..parsed.sections.eocd_offset as usize], &cd[..]);
    let seen_eocd = EndOfCentralDirectory::from_bytes(&seen_eocd).unwrap();
    assert_eq!(seen_eocd.cd_offset as u64, entries_end);

    assert_eq!(observed.events.first().map(String::as_str), Some("signing_block"));
    let tail: Vec<&str> = observed.events.iter().rev().take(3).map(String::as_str).collect();
    assert_eq!(tail, ["done", "done:block", "zip_sections"]);
    assert!(observed.events.contains(&"done:entries".to_string()));
}

#[test]
fn skipped_entries_do_not_date_new_entries() {
    let input = ArchiveBuilder::new()
        .entry(Entry::stored("old", b"1").modified(0x5000, 0))
        .entry(Entry::stored("new-but-skipped", b"2").modified(0x6000, 0))
        .build();
    let mut engine = ScriptedEngine::new()
        .policy("new-but-skipped", OutputPolicy::Skip)
        .add("added", b"3");

    let (output, _) = sign(&input, no_alignment(), &mut engine).unwrap();
    let parsed = parse(&output);
    assert_eq!(
        parsed.entry("added").0.last_modified(),
        DosDateTime { date: 0x5000, time: 0 }
    );
}

#[test]
fn new_entries_without_survivors_use_default_date() {
    let input = ArchiveBuilder::new().stored("gone", b"x").build();
    let mut engine = ScriptedEngine::new()
        .policy("gone", OutputPolicy::Skip)
        .add("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n");

    let (output, summary) = sign(&input, SignerConfig::default(), &mut engine).unwrap();
    assert_eq!(summary.copied, 0);

    let parsed = parse(&output);
    assert_eq!(parsed.names(), ["META-INF/MANIFEST.MF"]);
    assert_eq!(
        parsed.entry("META-INF/MANIFEST.MF").0.last_modified(),
        DEFAULT_NEW_ENTRY_TIMESTAMP
    );
}

#[test]
fn eocd_counts_emitted_records() {
    let input = ArchiveBuilder::new()
        .stored("a", b"1")
        .stored("b", b"2")
        .stored("c", b"3")
        .build();
    let mut engine = ScriptedEngine::new().policy("b", OutputPolicy::Skip);

    let (output, _) = sign(&input, SignerConfig::default(), &mut engine).unwrap();
    let parsed = parse(&output);
    let eocd = EndOfCentralDirectory::from_bytes(&parsed.sections.eocd).unwrap();
    assert_eq!(eocd.total_entries, 2);
    assert_eq!(parsed.names(), ["a", "c"]);
}

#[test]
fn input_signing_block_goes_to_engine_only() {
    let builder = || {
        ArchiveBuilder::new()
            .stored("a", b"first")
            .deflated("b", b"second second")
    };
    let input = builder().signing_block(&[(0x7109871a, b"old")]).build();
    let without_block = builder().build();

    let mut engine = ScriptedEngine::new();
    let observed = engine.observed.clone();
    let (output, _) = sign(&input, no_alignment(), &mut engine).unwrap();

    assert_eq!(output, without_block);
    assert!(parse(&output).sections.signing_block.is_none());
    assert_eq!(
        observed.borrow().input_signing_block,
        Some(signing_block(&[(0x7109871a, b"old")]))
    );

    let mut engine = PassThroughEngine::new();
    sign(&input, no_alignment(), &mut engine).unwrap();
    assert!(engine.had_signing_block());
}

#[test]
fn stripping_signatures() {
    let input = sample_apk().build();
    let mut engine = PassThroughEngine::new().strip_signatures(true);
    let (output, summary) = sign(&input, SignerConfig::default(), &mut engine).unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(parse(&output).names(), ["AndroidManifest.xml", "classes.dex"]);
}

#[test]
fn data_descriptors_are_copied() {
    let input = ArchiveBuilder::new()
        .entry(Entry::stored("dd", b"described").data_descriptor())
        .entry(Entry::deflated("dz", b"described and deflated").data_descriptor())
        .build();

    let (output, _) = rewrite(&input, SignerConfig::default());
    let parsed = parse(&output);
    assert!(parsed.entry("dd").0.has_data_descriptor());
    assert_eq!(parsed.data_offset("dd") % 4, 0);
    assert_eq!(parsed.contents("dd"), b"described");
    assert_eq!(parsed.contents("dz"), b"described and deflated");

    let data_end = (parsed.data_offset("dd") + 9) as usize;
    assert_eq!(&output[data_end..data_end + 4], &0x0807_4b50u32.to_le_bytes());
}

#[test]
fn output_size_alignment_pads_comment() {
    let input = sample_apk().comment(b"hi").build();
    let block = signing_block(&[(0x7109871a, b"sig")]);
    let config = SignerConfig {
        output_size_alignment: Some(4096),
        ..SignerConfig::default()
    };

    let mut engine = ScriptedEngine::new().signing_block(block, 0);
    let observed = engine.observed.clone();
    let (output, summary) = sign(&input, config, &mut engine).unwrap();
    assert_eq!(output.len() % 4096, 0);
    assert_eq!(summary.output_size, output.len() as u64);
    assert_eq!(observed.borrow().zip_sections_calls, 2);

    let parsed = parse(&output);
    let eocd = EndOfCentralDirectory::from_bytes(&parsed.sections.eocd).unwrap();
    assert_eq!(&parsed.sections.eocd[22..24], b"hi");
    assert!(parsed.sections.eocd[24..].iter().all(|&b| b == 0));
    assert_eq!(eocd.comment_len as usize, parsed.sections.eocd.len() - 22);

    let (output, _) = rewrite(&input, config);
    assert_eq!(output.len() % 4096, 0);
}

#[test]
fn output_size_alignment_gives_up() {
    let input = ArchiveBuilder::new().stored("a", b"tiny").build();
    let config = SignerConfig {
        output_size_alignment: Some(4096),
        ..SignerConfig::default()
    };
    let mut engine = ScriptedEngine::new().signing_block(signing_block(&[(1, b"x")]), 0);
    engine.growing_block = true;
    let observed = engine.observed.clone();

    let err = sign(&input, config, &mut engine).unwrap_err();
    assert!(matches!(err, Error::Convergence { attempts: 8 }));
    assert_eq!(observed.borrow().zip_sections_calls, 8);
    assert!(!observed.borrow().events.contains(&"done".to_string()));
}

#[test]
fn file_backed_input_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.apk");
    let output_path = dir.path().join("out.apk");
    let input = sample_apk()
        .stored("lib/arm64-v8a/libx.so", &vec![9u8; 5000])
        .build();
    std::fs::write(&input_path, &input).unwrap();

    let block = signing_block(&[(0x7109871a, b"sig")]);
    let (expected, _) = sign(
        &input,
        SignerConfig::default(),
        &mut ScriptedEngine::new().signing_block(block.clone(), 0),
    )
    .unwrap();

    for source in [
        DataSource::open(&input_path).unwrap(),
        DataSource::map(&input_path).unwrap(),
    ] {
        let mut sink = FileSink::create(&output_path).unwrap();
        let mut engine = ScriptedEngine::new().signing_block(block.clone(), 0);
        let observed = engine.observed.clone();
        ApkSigner::new(SignerConfig::default())
            .sign(&source, &mut sink, &mut engine)
            .unwrap();
        sink.finish().unwrap();

        let written = std::fs::read(Path::new(&output_path)).unwrap();
        assert_eq!(written, expected);
        let (before_cd, _, _) = observed.borrow().zip_sections.clone().unwrap();
        assert_eq!(&written[..before_cd.len()], &before_cd[..]);
    }
}

#[test]
fn signers_are_reusable() {
    let input = sample_apk().build();
    let signer = ApkSigner::new(SignerConfig::default());
    let source = DataSource::from_bytes(input);

    let mut first = MemorySink::new();
    signer
        .sign(&source, &mut first, &mut PassThroughEngine::new())
        .unwrap();
    let mut second = MemorySink::new();
    signer
        .sign(&source, &mut second, &mut PassThroughEngine::new())
        .unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}
