use shotmill::{
    seed_shots, walk_shot, ArenaTree, BatchLoader, FixtureSource, Flattener, MemorySink, MemorySource,
    MigrateConfig, MigrateError, MigrationCursor, Outcome, RedbSink, Sample, ShotRange, TreeNode,
    Usage, WideColumnSink,
};

fn te_tree() -> TreeNode {
    TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(
        TreeNode::new("Te", "TreeNode", Usage::Signal)
            .with_help("electron temperature")
            .with_sample(Sample::new(1.1, 10.0))
            .with_sample(Sample::new(2.2, 20.0)),
    )
}

fn source_with(shot: u64, tree: &TreeNode) -> MemorySource {
    MemorySource::new().with_tree("my_tree", shot, ArenaTree::from_tree_node(tree))
}

fn config() -> MigrateConfig {
    MigrateConfig {
        table_id: "shots".to_string(),
        ..MigrateConfig::default()
    }
}

#[test]
fn test_end_to_end_writes_data_before_marker() {
    let source = source_with(12345, &te_tree());
    let sink = MemorySink::new();
    let config = config();
    seed_shots(&sink, &config, &[12345]).unwrap();

    let outcome = MigrationCursor::new(&source, &sink, &config).run().unwrap();

    let Outcome::Migrated(report) = outcome else {
        panic!("expected shot 12345 to migrate");
    };
    assert_eq!(report.shot, 12345);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(report.skipped_records, 0);

    // seed, one data batch, then the marker
    let batches = sink.committed_batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[1].1, vec!["d#12345#Te#Te#1.1", "d#12345#Te#Te#2.2"]);
    assert_eq!(batches[2].1, vec!["12345"]);

    let row = sink.read_row("shots", "d#12345#Te#Te#2.2").unwrap().unwrap();
    assert_eq!(row["cf1:id"], b"Te".to_vec());
    assert_eq!(row["cf1:value"], b"20".to_vec());

    let marker = sink.read_row("shots", "12345").unwrap().unwrap();
    assert!(marker.contains_key("cf1:registered_date"));
    assert!(marker.contains_key("cf1:migrated_date"));
    let stored: serde_json::Value = serde_json::from_slice(&marker["cf1:data"]).unwrap();
    assert_eq!(stored["shot"], 12345);
    assert_eq!(stored["tree"]["children"][0]["help"], "electron temperature");
}

#[test]
fn test_crash_between_load_and_mark_recovers_without_duplicates() {
    let tree = te_tree();
    let source = source_with(12345, &tree);
    let sink = MemorySink::new();
    let config = config();
    seed_shots(&sink, &config, &[12345]).unwrap();

    // Data landed, marker never did
    let document = walk_shot(&source, 12345, "my_tree", None).unwrap();
    let flattened = Flattener::new(config.row_identity).flatten(&document);
    let loader = BatchLoader::new(&sink, "cf1", config.batch_size);
    loader.ensure_schema("shots").unwrap();
    loader.load_rows("shots", 12345, &flattened.rows).unwrap();
    assert_eq!(sink.row_count("shots"), 3);

    let mut cursor = MigrationCursor::new(&source, &sink, &config);
    assert_eq!(cursor.next_unmigrated().unwrap(), Some(12345));
    assert!(matches!(cursor.run().unwrap(), Outcome::Migrated(_)));

    assert_eq!(sink.row_count("shots"), 3);
    assert_eq!(cursor.run().unwrap(), Outcome::Idle);
}

#[test]
fn test_no_shot_in_range_is_idle() {
    let source = source_with(5, &te_tree());
    let sink = MemorySink::new();
    let config = MigrateConfig {
        shot_range: ShotRange::new(10, 20),
        ..config()
    };
    seed_shots(&sink, &config, &[5, 21]).unwrap();
    let calls = sink.batch_calls();

    let outcome = MigrationCursor::new(&source, &sink, &config).run().unwrap();

    assert_eq!(outcome, Outcome::Idle);
    assert_eq!(sink.batch_calls(), calls);
}

#[test]
fn test_partial_batch_failure_then_retry() {
    let mut signal = TreeNode::new("Ip", "TreeNode", Usage::Signal);
    for i in 0..7 {
        signal = signal.with_sample(Sample::new(i as f64, 1.0));
    }
    let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(signal);
    let source = source_with(3, &tree);
    let sink = MemorySink::new();
    let config = MigrateConfig {
        batch_size: 3,
        ..config()
    };
    seed_shots(&sink, &config, &[3]).unwrap();
    // call 0 was the seed; data batches are calls 1, 2 and 3
    sink.fail_batch_call(3);

    let err = MigrationCursor::new(&source, &sink, &config).run().unwrap_err();
    match err {
        MigrateError::WriteFailed { batch_index, committed_rows, .. } => {
            assert_eq!(batch_index, 2);
            assert_eq!(committed_rows, 6);
        }
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    let marker = sink.read_row("shots", "3").unwrap().unwrap();
    assert!(!marker.contains_key("cf1:migrated_date"));

    let outcome = MigrationCursor::new(&source, &sink, &config).run().unwrap();
    let Outcome::Migrated(report) = outcome else {
        panic!("expected the retry to migrate shot 3");
    };
    assert_eq!(report.rows_written, 7);
    assert_eq!(report.batches, 3);
    assert_eq!(sink.row_count("shots"), 1 + 7);
}

#[test]
fn test_discovered_subtree_counted_once() {
    let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(
        TreeNode::new("MAGNETICS", "TreeNode", Usage::Subtree).with_child(
            TreeNode::new("Bt", "TreeNode", Usage::Signal).with_sample(Sample::new(0.5, 2.0)),
        ),
    );
    let source = source_with(8, &tree);
    let sink = MemorySink::new();
    let config = config();
    seed_shots(&sink, &config, &[8]).unwrap();

    let outcome = MigrationCursor::new(&source, &sink, &config).run().unwrap();

    let Outcome::Migrated(report) = outcome else {
        panic!("expected shot 8 to migrate");
    };
    assert_eq!(report.rows_written, 1);
    let row = sink.read_row("shots", "d#8#Bt#Bt#0.5").unwrap().unwrap();
    assert_eq!(row["cf1:value"], b"2".to_vec());
}

#[test]
fn test_redb_sink_with_fixture_source() {
    let dir = tempfile::tempdir().unwrap();
    let trees = dir.path().join("trees");
    let db = dir.path().join("shots.redb");

    let source = FixtureSource::new(&trees);
    source.store("my_tree", 12345, &te_tree()).unwrap();
    source.store("my_tree", 12346, &te_tree()).unwrap();
    let config = config();

    {
        let sink = RedbSink::open(&db).unwrap();
        seed_shots(&sink, &config, &[12346, 12345]).unwrap();
        let outcome = MigrationCursor::new(&source, &sink, &config).run().unwrap();
        assert!(matches!(outcome, Outcome::Migrated(ref report) if report.shot == 12345));
    }

    let sink = RedbSink::open(&db).unwrap();
    let marker = sink.read_row("shots", "12345").unwrap().unwrap();
    assert!(marker.contains_key("cf1:migrated_date"));
    assert!(sink.read_row("shots", "d#12345#Te#Te#1.1").unwrap().is_some());

    let mut cursor = MigrationCursor::new(&source, &sink, &config);
    assert_eq!(cursor.next_unmigrated().unwrap(), Some(12346));
    assert!(matches!(cursor.run().unwrap(), Outcome::Migrated(ref report) if report.shot == 12346));
    assert_eq!(cursor.run().unwrap(), Outcome::Idle);
}

#[test]
fn test_run_completes_half_created_schema() {
    let source = source_with(4, &te_tree());
    let sink = RedbSink::open_in_memory().unwrap();
    let config = config();
    // Table created, family never added
    sink.create_table("shots").unwrap();

    let outcome = MigrationCursor::new(&source, &sink, &config).migrate_shot(4).unwrap();

    assert!(matches!(outcome, Outcome::Migrated(ref report) if report.rows_written == 2));
    assert!(sink.read_row("shots", "d#4#Te#Te#2.2").unwrap().is_some());
}

#[test]
fn test_explicit_subtree_does_not_hide_identical_sibling() {
    let te = || TreeNode::new("Te", "TreeNode", Usage::Signal).with_sample(Sample::new(1.0, 5.0));
    let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
        .with_child(TreeNode::new("A", "TreeNode", Usage::Structure).with_child(te()))
        .with_child(TreeNode::new("B", "TreeNode", Usage::Structure).with_child(te()));
    let source = source_with(6, &tree);
    let sink = MemorySink::new();
    let config = MigrateConfig {
        subtrees: Some(vec!["Te".to_string()]),
        row_identity: shotmill::RowIdentity::NodePath,
        ..config()
    };

    let outcome = MigrationCursor::new(&source, &sink, &config).migrate_shot(6).unwrap();

    assert!(matches!(outcome, Outcome::Migrated(ref report) if report.rows_written == 2));
    assert!(sink.read_row("shots", "d#6#Te#Te#1").unwrap().is_some());
    assert!(sink.read_row("shots", "d#6#TOP.B.Te#Te#1").unwrap().is_some());
    assert!(sink.read_row("shots", "d#6#TOP.A.Te#Te#1").unwrap().is_none());
}
