use archivist_db::{
    lock_holder, DbConnection, DbError, DbRow, DbValue, Model, OnConflict, Queryable, Select,
    TableExt,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: String,
    name: String,
    size: i64,
    note: Option<String>,
}

impl Model for Item {
    const TABLE: &'static str = "items";
    const COLUMNS: &'static [&'static str] = &["id", "name", "size", "note"];
    const PRIMARY_KEY: &'static str = "id";

    fn to_values(&self) -> Vec<DbValue> {
        vec![
            DbValue::from(&self.id),
            DbValue::from(&self.name),
            DbValue::from(self.size),
            DbValue::from(self.note.clone()),
        ]
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        Ok(Self {
            id: row.get_by_name("id")?,
            name: row.get_by_name("name")?,
            size: row.get_by_name("size")?,
            note: row.get_by_name("note")?,
        })
    }
}

fn item(id: &str, name: &str, size: i64) -> Item {
    Item {
        id: id.to_string(),
        name: name.to_string(),
        size,
        note: None,
    }
}

fn setup() -> DbConnection {
    let conn = DbConnection::open_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE items (id TEXT PRIMARY KEY, name TEXT NOT NULL UNIQUE, size INTEGER NOT NULL, note TEXT)",
    )
    .unwrap();
    conn
}

#[test]
fn insert_and_select_roundtrip() {
    let conn = setup();
    conn.insert(&item("a", "alpha", 10), OnConflict::Abort).unwrap();
    conn.insert(&item("b", "beta", 20), OnConflict::Abort).unwrap();

    let rows: Vec<Item> = conn
        .select(&Select::new().filter("\"size\" > ?", vec![DbValue::from(15)]))
        .unwrap();
    assert_eq!(rows, vec![item("b", "beta", 20)]);

    let found: Option<Item> = conn.select_one::<Item>("a").unwrap();
    assert_eq!(found, Some(item("a", "alpha", 10)));
    assert!(conn.select_one::<Item>("zzz").unwrap().is_none());
}

#[test]
fn on_conflict_modes() {
    let conn = setup();
    conn.insert(&item("a", "alpha", 10), OnConflict::Abort).unwrap();

    let err = conn
        .insert(&item("a", "other", 1), OnConflict::Abort)
        .unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));

    assert_eq!(
        conn.insert(&item("a", "other", 1), OnConflict::Ignore).unwrap(),
        0
    );
    conn.insert(&item("a", "other", 1), OnConflict::Replace)
        .unwrap();
    let row = conn.select_one::<Item>("a").unwrap().unwrap();
    assert_eq!(row.name, "other");
}

#[test]
fn update_and_delete_by_key() {
    let conn = setup();
    let mut a = item("a", "alpha", 10);
    conn.insert(&a, OnConflict::Abort).unwrap();

    a.note = Some("checked".to_string());
    a.size = 11;
    assert_eq!(conn.update(&a).unwrap(), 1);
    assert_eq!(conn.select_one::<Item>("a").unwrap(), Some(a.clone()));

    assert_eq!(conn.delete(&a).unwrap(), 1);
    assert_eq!(conn.count::<Item>("", &[]).unwrap(), 0);
}

#[test]
fn update_matching_rejects_unknown_columns() {
    let conn = setup();
    conn.insert(&item("a", "alpha", 10), OnConflict::Abort).unwrap();
    conn.insert(&item("b", "beta", 10), OnConflict::Abort).unwrap();

    let changed = conn
        .update_matching::<Item>(
            &[("note", DbValue::from("bulk"))],
            "\"size\" = ?",
            &[DbValue::from(10)],
        )
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(
        conn.count::<Item>("\"note\" = ?", &[DbValue::from("bulk")])
            .unwrap(),
        2
    );

    let err = conn
        .update_matching::<Item>(&[("bogus", DbValue::Null)], "1", &[])
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput(_)));
}

#[test]
fn failed_transaction_leaves_no_rows() {
    let conn = setup();
    let result = conn.transaction(|tx| -> archivist_db::Result<()> {
        tx.insert(&item("a", "alpha", 10), OnConflict::Abort)?;
        tx.insert(&item("b", "alpha", 20), OnConflict::Abort)?;
        Ok(())
    });
    assert!(matches!(result, Err(DbError::Constraint(_))));
    assert_eq!(conn.count::<Item>("", &[]).unwrap(), 0);
}

#[test]
fn second_writer_is_rejected_while_first_is_open() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("store.db");

    let first = DbConnection::open(&path).unwrap();
    let holder = lock_holder(&path).expect("sidecar written");
    assert_eq!(holder.pid, std::process::id());

    let err = DbConnection::open(&path).unwrap_err();
    assert!(matches!(err, DbError::Locked(_)));

    drop(first);
    DbConnection::open(&path).unwrap();
}
