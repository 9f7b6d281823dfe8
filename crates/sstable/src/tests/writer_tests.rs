use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use anyhow::Result;
use model::{Column, KeyComparator, Name, SliceBuffer, SliceMetadata};
use tempfile::tempdir;

use super::helpers::{collect, flat_columns, key, write_rows};
use crate::format::read_block_header;
use crate::{
    component_path, SSTableError, SSTableWriter, DATA_COMPONENT, FILTER_COMPONENT,
    INDEX_COMPONENT,
};

fn clear() -> SliceMetadata {
    SliceMetadata::clear(1)
}

// -------------------- Roundtrip --------------------

#[test]
fn sorted_input_reads_back_exactly() -> Result<()> {
    let dir = tempdir()?;
    let reader = write_rows(
        &dir.path().join("t-1"),
        &[
            (
                "k1",
                clear(),
                vec![
                    Column::live("c1", "v1", 1),
                    Column::live("c2", "v2", 2),
                    Column::tombstone("c3", 3, 30),
                ],
            ),
            ("k2", clear(), vec![Column::live("c1", "w1", 4)]),
        ],
    )?;

    let columns = flat_columns(&reader)?;
    assert_eq!(columns.len(), 4);
    assert_eq!(columns[0].0, key("k1", "c1"));
    assert_eq!(columns[0].1, Column::live("c1", "v1", 1));
    assert_eq!(columns[2].1, Column::tombstone("c3", 3, 30));
    assert_eq!(columns[3].0, key("k2", "c1"));
    Ok(())
}

#[test]
fn empty_sstable_scans_empty() -> Result<()> {
    let dir = tempdir()?;
    let reader = write_rows(&dir.path().join("t-1"), &[])?;
    assert!(collect(&reader)?.is_empty());
    assert!(reader.scan()?.get().is_none());
    Ok(())
}

// -------------------- Boundaries --------------------

#[test]
fn natural_boundaries_round_to_sentinels() -> Result<()> {
    let dir = tempdir()?;
    let reader = write_rows(
        &dir.path().join("t-1"),
        &[
            ("k1", clear(), vec![Column::live("c1", "v", 1)]),
            ("k2", clear(), vec![Column::live("c1", "v", 1)]),
        ],
    )?;

    let slices = collect(&reader)?;
    assert_eq!(slices.len(), 2);
    for (slice, _) in &slices {
        assert_eq!(slice.start_key.name(0), Some(&Name::Begin));
        assert_eq!(slice.end_key.name(0), Some(&Name::End));
    }
    // the forward pointer lands exactly on the next slice's start
    assert_eq!(
        slices[0].0.next_key.as_ref(),
        Some(&slices[1].0.start_key)
    );
    assert_eq!(slices[1].0.next_key, None);
    Ok(())
}

#[test]
fn metadata_change_starts_an_artificial_slice() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    let deleted = SliceMetadata::rooted(5, 50);
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", "v", 1))?;
    writer.append(&deleted, key("k1", "c2"), Column::live("c2", "v", 9))?;
    let reader = writer.finish()?;

    let slices = collect(&reader)?;
    assert_eq!(slices.len(), 2);
    // artificial bounds stay exact: no sentinel rounding between the two
    assert_eq!(slices[0].0.end_key, key("k1", "c2"));
    assert_eq!(slices[1].0.start_key, key("k1", "c2"));
    assert_eq!(slices[0].0.meta, clear());
    assert_eq!(slices[1].0.meta, deleted);
    Ok(())
}

#[test]
fn oversized_slice_splits_artificially() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    let value = vec![b'x'; 600];
    for i in 0..10 {
        let name = format!("c{:02}", i);
        writer.append(
            &clear(),
            key("k1", name.as_bytes()),
            Column::live(name.clone(), value.clone(), 1),
        )?;
    }
    let reader = writer.finish()?;

    let slices = collect(&reader)?;
    assert!(slices.len() > 1, "6 KiB of columns must split");
    let total: usize = slices.iter().map(|(_, cols)| cols.len()).sum();
    assert_eq!(total, 10);
    // continuation slices begin at a real column, not a sentinel
    assert!(matches!(
        slices[1].0.start_key.name(0),
        Some(Name::Bytes(_))
    ));
    Ok(())
}

// -------------------- Input order --------------------

#[test]
fn out_of_order_append_fails_immediately() -> Result<()> {
    let dir = tempdir()?;
    let mut writer = SSTableWriter::create(dir.path().join("t-1"), 1, KeyComparator::standard())?;
    writer.append(&clear(), key("k1", "c5"), Column::live("c5", "v", 1))?;
    let err = writer
        .append(&clear(), key("k1", "c2"), Column::live("c2", "v", 1))
        .unwrap_err();
    assert!(
        matches!(err, SSTableError::InputOrderViolation(_)),
        "got {:?}",
        err
    );
    Ok(())
}

#[test]
fn equal_keys_are_non_decreasing() -> Result<()> {
    let dir = tempdir()?;
    let mut writer = SSTableWriter::create(dir.path().join("t-1"), 1, KeyComparator::standard())?;
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", "v1", 1))?;
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", "v2", 2))?;
    writer.finish()?;
    Ok(())
}

// -------------------- Lifecycle --------------------

#[test]
fn finish_renames_every_component() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    write_rows(&base, &[("k1", clear(), vec![Column::live("c", "v", 1)])])?;

    for component in [DATA_COMPONENT, INDEX_COMPONENT, FILTER_COMPONENT] {
        assert!(component_path(&base, component, false).exists());
        assert!(!component_path(&base, component, true).exists());
    }
    Ok(())
}

#[test]
fn dropped_writer_removes_temporaries() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", "v", 1))?;
    assert!(component_path(&base, DATA_COMPONENT, true).exists());
    drop(writer);

    for component in [DATA_COMPONENT, INDEX_COMPONENT, FILTER_COMPONENT] {
        assert!(!component_path(&base, component, true).exists());
        assert!(!component_path(&base, component, false).exists());
    }
    Ok(())
}

#[test]
fn abort_removes_temporaries() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", "v", 1))?;
    writer.abort();
    assert!(!component_path(&base, DATA_COMPONENT, true).exists());
    Ok(())
}

// -------------------- Whole-slice appends --------------------

#[test]
fn metadata_only_slice_persists() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    let deleted = SliceMetadata::rooted(10, 100);
    writer.append_slice(SliceBuffer::new(
        deleted.clone(),
        key("k1", "").with_name(Name::Begin),
        Vec::new(),
    ))?;
    let reader = writer.finish()?;

    let slices = collect(&reader)?;
    assert_eq!(slices.len(), 1);
    assert!(slices[0].1.is_empty());
    assert_eq!(slices[0].0.meta, deleted);
    Ok(())
}

#[test]
fn vacuous_slice_buffer_is_skipped() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    writer.append_slice(SliceBuffer::new(
        clear(),
        key("k1", "").with_name(Name::Begin),
        Vec::new(),
    ))?;
    let reader = writer.finish()?;
    assert!(collect(&reader)?.is_empty());
    Ok(())
}

#[test]
fn slice_buffer_columns_read_back() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    writer.append_slice(SliceBuffer::new(
        clear(),
        key("k1", "").with_name(Name::Begin),
        vec![Column::live("c1", "v1", 1), Column::live("c2", "v2", 2)],
    ))?;
    writer.append_slice(SliceBuffer::new(
        clear(),
        key("k2", "").with_name(Name::Begin),
        vec![Column::live("c1", "w1", 3)],
    ))?;
    let reader = writer.finish()?;

    let columns = flat_columns(&reader)?;
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].0, key("k1", "c1"));
    assert_eq!(columns[2].0, key("k2", "c1"));
    Ok(())
}

// -------------------- Blocks --------------------

#[test]
fn large_writes_split_into_blocks() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let value = vec![b'x'; 200];
    let rows: Vec<_> = (0..200)
        .map(|i| format!("key{:04}", i))
        .collect();
    let mut writer = SSTableWriter::create(&base, rows.len() as u64, KeyComparator::standard())?;
    for row in &rows {
        writer.append(
            &clear(),
            key(row, "c1"),
            Column::live("c1", value.clone(), 1),
        )?;
    }
    let reader = writer.finish()?;

    // count physical blocks by walking the data file framing
    let mut data = File::open(component_path(&base, DATA_COMPONENT, false))?;
    let mut blocks = 0;
    while let Some(header) = read_block_header(&mut data)? {
        data.seek(SeekFrom::Current(header.length as i64))?;
        blocks += 1;
    }
    assert!(blocks >= 2, "~44 KiB of slices must span blocks, got {}", blocks);

    // everything is still reachable through a scan
    assert_eq!(flat_columns(&reader)?.len(), 200);
    Ok(())
}

#[test]
fn single_column_larger_than_a_block_still_roundtrips() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    let mut writer = SSTableWriter::create(&base, 1, KeyComparator::standard())?;
    let huge = vec![b'y'; 40 * 1024];
    writer.append(&clear(), key("k1", "c1"), Column::live("c1", huge.clone(), 1))?;
    let reader = writer.finish()?;

    let columns = flat_columns(&reader)?;
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].1.value(), huge.as_slice());
    Ok(())
}

// -------------------- Read half --------------------

#[test]
fn data_file_begins_with_a_block_header() -> Result<()> {
    // the data file must contain nothing before the first block header
    let dir = tempdir()?;
    let base = dir.path().join("t-1");
    write_rows(&base, &[("k1", clear(), vec![Column::live("c", "v", 1)])])?;
    let mut data = File::open(component_path(&base, DATA_COMPONENT, false))?;
    let mut first = [0u8; 8];
    data.read_exact(&mut first)?;
    let length = u32::from_be_bytes([first[0], first[1], first[2], first[3]]);
    assert!(length > 0);
    assert_eq!(first[4], 0, "identity codec tag");
    assert_eq!(&first[5..8], &[0, 0, 0], "reserved bytes are zero");
    Ok(())
}
