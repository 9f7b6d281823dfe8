use std::collections::BTreeMap;

use anyhow::Result;
use model::{Column, KeyComparator, Name, SliceMetadata};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sstable::SSTableReader;
use tempfile::tempdir;

use super::helpers::{clear, logical, slices, write_table, Row};
use crate::compact;

// -------------------- Idempotence --------------------

#[test]
fn compacting_one_input_preserves_its_logical_contents() -> Result<()> {
    let dir = tempdir()?;
    let a = write_table(
        dir.path(),
        "a-1",
        &[
            (
                "k1",
                clear(),
                vec![Column::live("c1", "v1", 1), Column::tombstone("c2", 2, 500)],
            ),
            ("k2", clear(), vec![Column::live("c1", "w1", 3)]),
        ],
    )?;

    let out = compact(&[a.clone()], &dir.path().join("out-1"), 0, true)?.expect("live output");
    assert_eq!(logical(&a)?, logical(&out)?);
    Ok(())
}

#[test]
fn compacting_an_input_against_itself_changes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let rows: Vec<Row> = vec![
        ("k1", clear(), vec![Column::live("c1", "v1", 1)]),
        ("k2", clear(), vec![Column::live("c1", "w1", 3)]),
    ];
    let a = write_table(dir.path(), "a-1", &rows)?;
    let b = write_table(dir.path(), "b-1", &rows)?;

    let out = compact(&[a.clone(), b], &dir.path().join("out-1"), 0, true)?.expect("live output");
    assert_eq!(logical(&a)?, logical(&out)?);
    Ok(())
}

// -------------------- Randomized laws --------------------

/// One deterministic pseudo-random table: a map from (row, column name) to
/// the column version this table holds.
fn random_rows(rng: &mut StdRng) -> BTreeMap<String, Vec<Column>> {
    let mut rows: BTreeMap<String, BTreeMap<Vec<u8>, Column>> = BTreeMap::new();
    for _ in 0..rng.gen_range(5..40) {
        let row = format!("row{:02}", rng.gen_range(0..8));
        let name = format!("col{:02}", rng.gen_range(0..6)).into_bytes();
        let timestamp = rng.gen_range(0..100);
        let column = if rng.gen_bool(0.2) {
            Column::tombstone(name.clone(), timestamp, 1_000_000)
        } else {
            Column::live(
                name.clone(),
                format!("value-{}", rng.gen_range(0..1000)),
                timestamp,
            )
        };
        rows.entry(row).or_default().insert(name, column);
    }
    rows.into_iter()
        .map(|(row, columns)| (row, columns.into_values().collect()))
        .collect()
}

fn write_random_table(
    dir: &std::path::Path,
    file: &str,
    rows: &BTreeMap<String, Vec<Column>>,
) -> Result<SSTableReader> {
    let literal: Vec<Row> = rows
        .iter()
        .map(|(row, columns)| (row.as_str(), clear(), columns.clone()))
        .collect();
    write_table(dir, file, &literal)
}

#[test]
fn compaction_is_commutative_over_input_partitioning() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..5 {
        let dir = tempdir()?;
        let t0 = random_rows(&mut rng);
        let t1 = random_rows(&mut rng);
        let t2 = random_rows(&mut rng);
        let a = write_random_table(dir.path(), "a-1", &t0)?;
        let b = write_random_table(dir.path(), "b-1", &t1)?;
        let c = write_random_table(dir.path(), "c-1", &t2)?;

        // compact everything at once
        let all = compact(
            &[a.clone(), b.clone(), c.clone()],
            &dir.path().join("all-1"),
            0,
            true,
        )?
        .expect("live output");

        // versus compacting a partition of the inputs, then the results
        let left = compact(&[a, b], &dir.path().join("left-1"), 0, true)?.expect("live output");
        let right = compact(&[c], &dir.path().join("right-1"), 0, true)?.expect("live output");
        let nested = compact(&[left, right], &dir.path().join("nested-1"), 0, true)?
            .expect("live output");

        assert_eq!(
            logical(&all)?,
            logical(&nested)?,
            "round {}: partitioning the inputs changed the result",
            round
        );
    }
    Ok(())
}

#[test]
fn merged_output_is_monotone_and_takes_the_priority_winner() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0xbeef);
    let dir = tempdir()?;
    let tables: Vec<_> = (0..3).map(|_| random_rows(&mut rng)).collect();
    let readers: Vec<_> = tables
        .iter()
        .enumerate()
        .map(|(i, rows)| write_random_table(dir.path(), &format!("t{}-1", i), rows))
        .collect::<Result<_>>()?;

    let out = compact(&readers, &dir.path().join("out-1"), 0, true)?.expect("live output");
    let emitted = logical(&out)?;

    // monotone: keys never decrease at full depth
    let comparator = KeyComparator::standard();
    for pair in emitted.windows(2) {
        assert_ne!(
            comparator.compare(&pair[0].0, &pair[1].0, 1),
            std::cmp::Ordering::Greater,
            "output regressed from {:?} to {:?}",
            pair[0].0,
            pair[1].0
        );
    }

    // priority: each emitted column is the maximum across every input
    // version of its key
    let mut expected: BTreeMap<(String, Vec<u8>), Column> = BTreeMap::new();
    for table in &tables {
        for (row, columns) in table {
            for column in columns {
                expected
                    .entry((row.clone(), column.name().to_vec()))
                    .and_modify(|winner| {
                        if winner.compare_priority(column) == std::cmp::Ordering::Less {
                            *winner = column.clone();
                        }
                    })
                    .or_insert_with(|| column.clone());
            }
        }
    }
    assert_eq!(emitted.len(), expected.len());
    for ((row, name), winner) in expected {
        let key_row = row.into_bytes();
        let found = emitted
            .iter()
            .find(|(key, _)| key.dk.key == key_row && key.name(0) == Some(&Name::bytes(name.as_slice())))
            .map(|(_, column)| column);
        assert_eq!(found, Some(&winner));
    }
    Ok(())
}

#[test]
fn no_column_survives_its_ancestor_tombstone() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0xdead);
    let dir = tempdir()?;

    // tables with random row tombstones layered over random columns
    let mut readers = Vec::new();
    let mut marked: BTreeMap<String, i64> = BTreeMap::new();
    for i in 0..3 {
        let rows = random_rows(&mut rng);
        let literal: Vec<Row> = rows
            .iter()
            .map(|(row, columns)| {
                let meta = if rng.gen_bool(0.4) {
                    let at = rng.gen_range(0..60);
                    let entry = marked.entry(row.clone()).or_insert(i64::MIN);
                    *entry = (*entry).max(at);
                    SliceMetadata::rooted(at, 1_000_000)
                } else {
                    clear()
                };
                (row.as_str(), meta, columns.clone())
            })
            .collect();
        readers.push(write_table(dir.path(), &format!("t{}-1", i), &literal)?);
    }

    let Some(out) = compact(&readers, &dir.path().join("out-1"), 0, true)? else {
        return Ok(()); // everything was shadowed; vacuously safe
    };
    for (slice, columns) in slices(&out)? {
        let row = String::from_utf8(slice.start_key.dk.key.clone())?;
        let shadow = marked.get(&row).copied().unwrap_or(i64::MIN);
        // the resolved shadow itself must ride along in the output
        assert_eq!(slice.meta.max_marked_for_delete_at(), shadow);
        for column in columns {
            assert!(
                column.timestamp() > shadow,
                "column {:?} at ts {} survived a row tombstone at {}",
                column.name(),
                column.timestamp(),
                shadow
            );
        }
    }
    Ok(())
}

// -------------------- Boundary rounding --------------------

#[test]
fn natural_output_boundaries_round_to_sentinels() -> Result<()> {
    let dir = tempdir()?;
    let a = write_table(
        dir.path(),
        "a-1",
        &[
            ("k1", clear(), vec![Column::live("c1", "v", 1)]),
            ("k2", clear(), vec![Column::live("c1", "v", 1)]),
        ],
    )?;
    let b = write_table(
        dir.path(),
        "b-1",
        &[("k1", clear(), vec![Column::live("c2", "v", 1)])],
    )?;

    let out = compact(&[a, b], &dir.path().join("out-1"), 0, true)?.expect("live output");
    let out_slices = slices(&out)?;
    for pair in out_slices.windows(2) {
        let (earlier, later) = (&pair[0].0, &pair[1].0);
        if earlier.start_key.dk != later.start_key.dk {
            // a parent-group change on disk must carry rounded bounds
            assert_eq!(earlier.end_key.name(0), Some(&Name::End));
            assert_eq!(later.start_key.name(0), Some(&Name::Begin));
        }
    }
    Ok(())
}
