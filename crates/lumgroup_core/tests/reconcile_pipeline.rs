mod common;

use common::{
    add_feature_layer, column_names, create_gpkg, insert_feature, point_blob, read_ids,
    read_outputs,
};
use lumgroup_core::{
    open_gpkg, FieldOutcome, FieldReport, GpkgLayerRepository, IdError, ReconcileOptions,
    ReconcileReport, ReconcileService, RepoError, ServiceError,
};
use rusqlite::Connection;
use tempfile::TempDir;

fn streetlights(dir: &TempDir, extra_columns: &[(&str, &str)]) -> Connection {
    let path = dir.path().join("streetlights.gpkg");
    {
        let conn = create_gpkg(&path);
        add_feature_layer(&conn, "streetlights", "POINT", 4326, extra_columns);
    }
    open_gpkg(&path).unwrap()
}

fn run(conn: &Connection) -> Result<ReconcileReport, ServiceError> {
    let repo = GpkgLayerRepository::try_new(conn, "streetlights").unwrap();
    ReconcileService::new(repo, ReconcileOptions::default()).run()
}

#[test]
fn repairs_ids_and_groups_shared_geometries() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(1.0, 1.0)), Some(3));
    insert_feature(&conn, "streetlights", 2, Some(point_blob(1.0, 1.0)), None);
    insert_feature(&conn, "streetlights", 3, Some(point_blob(2.0, 2.0)), Some(3));

    let report = run(&conn).unwrap();

    assert_eq!(
        read_outputs(&conn, "streetlights"),
        vec![
            (1, Some(3), Some(3), Some(2)),
            (2, Some(4), Some(3), Some(0)),
            (3, Some(5), Some(5), Some(1)),
        ]
    );
    assert_eq!(report.layer, "streetlights");
    assert_eq!(report.feature_count, 3);
    assert_eq!(report.ids.null_repaired, 1);
    assert_eq!(report.ids.duplicates_repaired, 1);
    assert_eq!(report.ids.max_id, 5);
    assert_eq!(report.grouping.groups, 2);
    assert_eq!(report.grouping.largest_group, 2);
    assert_eq!(report.grouping.shared_records, 2);
    assert!(report.skipped_outputs.is_empty());
    assert_eq!(report.values_written, report.edits_staged);
    assert!(report
        .fields
        .iter()
        .all(|field| field.outcome == FieldOutcome::Created));
}

#[test]
fn second_run_is_stable() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(1.0, 1.0)), Some(3));
    insert_feature(&conn, "streetlights", 2, Some(point_blob(1.0, 1.0)), None);
    insert_feature(&conn, "streetlights", 3, Some(point_blob(2.0, 2.0)), Some(3));

    run(&conn).unwrap();
    let first = read_outputs(&conn, "streetlights");
    let columns = column_names(&conn, "streetlights");

    let report = run(&conn).unwrap();
    assert_eq!(read_outputs(&conn, "streetlights"), first);
    assert_eq!(column_names(&conn, "streetlights"), columns);
    assert!(!report.ids.changed());
    assert!(report
        .fields
        .iter()
        .all(|field| field.outcome == FieldOutcome::AlreadyPresent));
    // Only the group sizes are rewritten.
    assert_eq!(report.edits_staged, 3);
}

#[test]
fn null_geometries_form_one_group() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, None, Some(8));
    insert_feature(&conn, "streetlights", 2, Some(point_blob(5.0, 5.0)), Some(2));
    insert_feature(&conn, "streetlights", 3, None, Some(4));

    run(&conn).unwrap();

    assert_eq!(
        read_outputs(&conn, "streetlights"),
        vec![
            (1, Some(8), Some(4), Some(0)),
            (2, Some(2), Some(2), Some(1)),
            (3, Some(4), Some(4), Some(2)),
        ]
    );
}

#[test]
fn existing_fields_are_matched_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("id", "INTEGER"), ("item", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(0.0, 0.0)), Some(1));

    let report = run(&conn).unwrap();

    assert_eq!(report.fields[0].field, "ITEM");
    assert_eq!(report.fields[0].outcome, FieldOutcome::AlreadyPresent);
    assert_eq!(report.fields[1].field, "LumCantPos");
    assert_eq!(report.fields[1].outcome, FieldOutcome::Created);
    assert_eq!(
        column_names(&conn, "streetlights"),
        vec!["fid", "geom", "id", "item", "LumCantPos"]
    );
    assert_eq!(
        read_outputs(&conn, "streetlights"),
        vec![(1, Some(1), Some(1), Some(1))]
    );
}

#[test]
fn empty_layer_only_gains_fields() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);

    let report = run(&conn).unwrap();

    assert_eq!(report.feature_count, 0);
    assert_eq!(report.ids.max_id, 0);
    assert_eq!(report.grouping.groups, 0);
    assert_eq!(report.values_written, 0);
    assert!(report.fields.iter().all(FieldReport::is_available));
    assert_eq!(
        column_names(&conn, "streetlights"),
        vec!["fid", "geom", "ID", "ITEM", "LumCantPos"]
    );
}

#[test]
fn layer_without_id_column_is_left_untouched() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("NAME", "TEXT")]);
    conn.execute(
        "INSERT INTO streetlights (fid, geom, NAME) VALUES (1, ?1, 'north');",
        [point_blob(0.0, 0.0)],
    )
    .unwrap();

    let err = run(&conn).unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Repo(RepoError::MissingColumn { ref column, .. }) if column == "ID"
    ));
    assert_eq!(
        column_names(&conn, "streetlights"),
        vec!["fid", "geom", "NAME"]
    );
}

#[test]
fn undecodable_geometry_aborts_before_schema_or_values_change() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(0.0, 0.0)), None);
    insert_feature(&conn, "streetlights", 2, Some(b"XX-not-a-geometry".to_vec()), None);

    let err = run(&conn).unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Repo(RepoError::InvalidGeometry { internal_id: 2, .. })
    ));
    assert_eq!(column_names(&conn, "streetlights"), vec!["fid", "geom", "ID"]);
    assert_eq!(read_ids(&conn, "streetlights"), vec![(1, None), (2, None)]);
}

#[test]
fn report_serializes_for_json_output() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(1.0, 1.0)), None);

    let report = run(&conn).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["layer"], "streetlights");
    assert_eq!(json["ids"]["null_repaired"], 1);
    assert_eq!(json["fields"][0]["outcome"]["status"], "created");
    assert_eq!(json["run_id"], report.run_id.to_string());
}

#[test]
fn exhausted_id_range_aborts_before_schema_or_values_change() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(0.0, 0.0)), Some(i64::MAX));
    insert_feature(&conn, "streetlights", 2, Some(point_blob(1.0, 1.0)), None);

    let err = run(&conn).unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Ids(IdError::IdSpaceExhausted { max_id: i64::MAX, needed: 1 })
    ));
    assert_eq!(column_names(&conn, "streetlights"), vec!["fid", "geom", "ID"]);
    assert_eq!(
        read_ids(&conn, "streetlights"),
        vec![(1, Some(i64::MAX)), (2, None)]
    );
}

#[test]
fn rejected_commit_rolls_back_every_value() {
    let dir = TempDir::new().unwrap();
    let conn = streetlights(&dir, &[("ID", "INTEGER")]);
    insert_feature(&conn, "streetlights", 1, Some(point_blob(0.0, 0.0)), None);
    insert_feature(&conn, "streetlights", 2, Some(point_blob(0.0, 0.0)), None);
    conn.execute_batch(
        "CREATE TRIGGER streetlights_locked BEFORE UPDATE ON streetlights
         WHEN OLD.fid = 2
         BEGIN
            SELECT RAISE(ABORT, 'row 2 is locked');
         END;",
    )
    .unwrap();

    let err = run(&conn).unwrap_err();

    assert!(matches!(err, ServiceError::CommitFailed(_)));
    assert!(err.to_string().contains("no changes were written"));
    assert_eq!(
        read_outputs(&conn, "streetlights"),
        vec![(1, None, None, None), (2, None, None, None)]
    );
}
