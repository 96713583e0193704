/*!
 * Tests for SRT parsing and writing
 */

use subflow::subtitle_processor::{BlockStatus, SENTINEL_TRANSLATION, SubtitleBlock, SubtitleCollection};

use crate::common;

#[test]
fn test_parse_srt_string_withValidContent_shouldParseAllBlocks() {
    let content = "1\n00:00:01,000 --> 00:00:04,000\nHello world\n\n2\n00:00:05,000 --> 00:00:08,000\nThis is a test\nsecond line\n";
    let blocks = SubtitleCollection::parse_srt_string(content);

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].start_ms, 1000);
    assert_eq!(blocks[0].end_ms, 4000);
    assert_eq!(blocks[0].source_text, "Hello world");
    assert_eq!(blocks[1].source_text, "This is a test\nsecond line");
    assert_eq!(blocks[1].status, BlockStatus::Untranslated);
}

#[test]
fn test_parse_srt_string_withCrlfAndBom_shouldParse() {
    let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nHi\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nBye\r\n";
    let blocks = SubtitleCollection::parse_srt_string(content);

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].index, 1);
    assert_eq!(blocks[1].source_text, "Bye");
}

#[test]
fn test_parse_srt_string_withDotMilliseconds_shouldParse() {
    let blocks = SubtitleCollection::parse_srt_string("1\n00:00:01.250 --> 00:00:02.500\nHi\n");
    assert_eq!(blocks[0].start_ms, 1250);
    assert_eq!(blocks[0].end_ms, 2500);
}

#[test]
fn test_parse_srt_string_withMalformedBlock_shouldSkipOnlyThatBlock() {
    let content = "1\n00:00:01,000 --> 00:00:02,000\nFirst\n\n2\nnot a timestamp\nBroken\n\n3\n00:00:05,000 --> 00:00:04,000\nBackwards\n\n4\n00:00:06,000 --> 00:00:07,000\nLast\n";
    let blocks = SubtitleCollection::parse_srt_string(content);

    let texts: Vec<&str> = blocks.iter().map(|b| b.source_text.as_str()).collect();
    assert_eq!(texts, vec!["First", "Last"]);
}

#[test]
fn test_parse_srt_string_withMissingIndexLine_shouldContinueNumbering() {
    let content = "1\n00:00:01,000 --> 00:00:02,000\nFirst\n\n00:00:03,000 --> 00:00:04,000\nSecond\n";
    let blocks = SubtitleCollection::parse_srt_string(content);

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].index, 2);
    assert_eq!(blocks[1].source_text, "Second");
}

#[test]
fn test_parse_srt_string_withEmptyContent_shouldReturnNoBlocks() {
    assert!(SubtitleCollection::parse_srt_string("").is_empty());
    assert!(SubtitleCollection::parse_srt_string("\n\n  \n").is_empty());
}

#[test]
fn test_to_srt_string_shouldRenumberAndUseCanonicalTimestamps() {
    let blocks = vec![
        SubtitleBlock::new(7, 1_000, 2_500, "One"),
        SubtitleBlock::new(9, 3_723_004, 3_724_000, "Two"),
    ];
    let collection = SubtitleCollection::new("x.srt".into(), blocks);

    assert_eq!(
        collection.to_srt_string(),
        "1\n00:00:01,000 --> 00:00:02,500\nOne\n\n2\n01:02:03,004 --> 01:02:04,000\nTwo\n"
    );
}

#[test]
fn test_to_srt_string_withFailedBlock_shouldWriteSentinel() {
    let mut block = SubtitleBlock::new(1, 0, 1_000, "Hello");
    block.mark_failed(BlockStatus::FailedProvider);
    let collection = SubtitleCollection::new("x.srt".into(), vec![block]);

    assert!(collection.to_srt_string().contains(SENTINEL_TRANSLATION));
    assert_eq!(collection.sentinel_count(), 1);
}

#[test]
fn test_read_file_withLatin1Bytes_shouldDecode() {
    let temp_dir = common::create_temp_dir();
    let path = temp_dir.path().join("latin1.srt");
    let mut bytes = b"1\n00:00:01,000 --> 00:00:02,000\nCaf".to_vec();
    bytes.push(0xE9);
    bytes.push(b'\n');
    std::fs::write(&path, bytes).unwrap();

    let collection = SubtitleCollection::read_file(&path).unwrap();
    assert_eq!(collection.blocks[0].source_text, "Café");
}

#[test]
fn test_read_file_withNoBlocks_shouldFail() {
    let temp_dir = common::create_temp_dir();
    let path = common::create_test_file(temp_dir.path(), "empty.srt", "nothing here\n");
    assert!(SubtitleCollection::read_file(&path).is_err());
}

#[test]
fn test_read_file_withMissingFile_shouldFail() {
    let temp_dir = common::create_temp_dir();
    assert!(SubtitleCollection::read_file(temp_dir.path().join("missing.srt")).is_err());
}

#[test]
fn test_write_to_srt_shouldWriteUtf8WithoutBom() {
    let temp_dir = common::create_temp_dir();
    let mut block = SubtitleBlock::new(1, 1_000, 2_000, "Hello");
    block.set_translation("Xin chào");
    let collection = SubtitleCollection::new("in.srt".into(), vec![block]);
    let output = temp_dir.path().join("nested/out.vi.srt");

    collection.write_to_srt(&output).unwrap();

    let bytes = std::fs::read(&output).unwrap();
    assert!(!bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "1\n00:00:01,000 --> 00:00:02,000\nXin chào\n"
    );
}

#[test]
fn test_timings_match_shouldCompareElementwise() {
    let a = SubtitleCollection::new(
        "a.srt".into(),
        SubtitleCollection::parse_srt_string(&common::srt_from_texts(&["x", "y"])),
    );
    let b = SubtitleCollection::new(
        "b.srt".into(),
        SubtitleCollection::parse_srt_string(&common::srt_from_texts(&["other", "text"])),
    );
    let c = SubtitleCollection::new(
        "c.srt".into(),
        SubtitleCollection::parse_srt_string(&common::srt_from_texts(&["x"])),
    );

    assert!(a.timings_match(&b));
    assert!(!a.timings_match(&c));
}

#[test]
fn test_parse_timestamp_withOutOfRangeComponent_shouldFail() {
    assert_eq!(SubtitleBlock::parse_timestamp("00:01:02,003").unwrap(), 62_003);
    assert!(SubtitleBlock::parse_timestamp("00:61:00,000").is_err());
    assert!(SubtitleBlock::parse_timestamp("garbage").is_err());
}

#[test]
fn test_write_to_srt_withBlankLineInTranslation_shouldKeepBlockIntact() {
    let temp_dir = common::create_temp_dir();
    let mut first = SubtitleBlock::new(1, 1_000, 2_000, "Hello world");
    first.set_translation("Xin chao\n\nthe gioi");
    let mut second = SubtitleBlock::new(2, 3_000, 4_000, "Goodbye");
    second.set_translation("Tam biet");
    let collection = SubtitleCollection::new("in.srt".into(), vec![first, second]);
    let output = temp_dir.path().join("out.vi.srt");

    collection.write_to_srt(&output).unwrap();

    let written = SubtitleCollection::read_file(&output).unwrap();
    assert_eq!(written.blocks.len(), 2);
    assert_eq!(written.blocks[0].source_text, "Xin chao\nthe gioi");
    assert_eq!(written.blocks[1].source_text, "Tam biet");
}

#[test]
fn test_to_srt_string_withUnnormalizedBlock_shouldDropBlankLines() {
    let block = SubtitleBlock::new(1, 0, 1_000, "Top\n\nBottom");
    let collection = SubtitleCollection::new("x.srt".into(), vec![block]);

    assert_eq!(collection.to_srt_string(), "1\n00:00:00,000 --> 00:00:01,000\nTop\nBottom\n");
}

#[test]
fn test_parse_srt_string_withIndentedLine_shouldKeepLeadingWhitespace() {
    let content = "1\n00:00:01,000 --> 00:00:02,000\n- Who's there?\n   - Nobody.   \n";
    let blocks = SubtitleCollection::parse_srt_string(content);

    assert_eq!(blocks[0].source_text, "- Who's there?\n   - Nobody.");
}

#[test]
fn test_mark_failed_shouldLeaveTranslatedTextEmpty() {
    let mut block = SubtitleBlock::new(1, 0, 1_000, "Hello");
    block.set_translation("Xin chào");
    block.mark_failed(BlockStatus::FailedStructure);

    assert_eq!(block.translated_text, None);
    assert_eq!(block.output_text(), SENTINEL_TRANSLATION);
    assert!(block.is_sentinel());
}
