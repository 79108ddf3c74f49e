//! Public-API tests for the pure reconciliation components: descriptors and
//! the generated SQL patterns the verbs execute.

use pg_bulksync::{sqlgen, SqlValue, TableDescriptor, TableMapped};

#[derive(Clone)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

impl TableMapped for Account {
    fn table_descriptor() -> TableDescriptor<Self> {
        TableDescriptor::builder("accounts")
            .key_column("id", |a: &Account| a.id.into())
            .column("owner", |a: &Account| a.owner.clone().into())
            .column("balance", |a: &Account| a.balance.into())
            .build()
            .expect("static mapping is valid")
    }
}

#[test]
fn test_mapped_and_manual_descriptors_share_one_shape() {
    let mapped = Account::table_descriptor();
    let manual = TableDescriptor::builder("accounts")
        .key_column("id", |a: &Account| a.id.into())
        .column("owner", |a: &Account| a.owner.clone().into())
        .column("balance", |a: &Account| a.balance.into())
        .build()
        .unwrap();

    assert_eq!(mapped.table(), manual.table());
    assert_eq!(mapped.column_names(), manual.column_names());
}

#[test]
fn test_descriptor_column_order_drives_every_pattern() {
    // The same ordered column list feeds the copy statement, the staging
    // DDL shape, and the finalize DML column lists.
    let descriptor = Account::table_descriptor();
    let columns = descriptor.column_names();

    let copy = sqlgen::copy_in_statement(descriptor.table(), &columns).unwrap();
    assert_eq!(
        copy,
        "COPY \"accounts\" (\"id\", \"owner\", \"balance\") FROM STDIN WITH (FORMAT BINARY)"
    );

    let upsert = sqlgen::merge_upsert(
        descriptor.table(),
        "_staging_accounts_deadbeef",
        &columns,
        &["id".to_string()],
    )
    .unwrap();
    assert!(upsert.contains("(\"id\", \"owner\", \"balance\")"));
    assert!(upsert.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
    assert!(upsert.contains("\"owner\" = EXCLUDED.\"owner\", \"balance\" = EXCLUDED.\"balance\""));
}

#[test]
fn test_sync_statement_pair() {
    // Sync totality: delete rows missing from staging, then upsert staging.
    let descriptor = Account::table_descriptor();
    let columns = descriptor.column_names();
    let keys = vec!["id".to_string()];
    let staging = "_staging_accounts_deadbeef";

    let delete = sqlgen::sync_delete(descriptor.table(), staging, &keys, None).unwrap();
    assert_eq!(
        delete,
        "DELETE FROM \"accounts\" WHERE NOT EXISTS (SELECT 1 FROM \
         \"_staging_accounts_deadbeef\" WHERE \"_staging_accounts_deadbeef\".\"id\" = \
         \"accounts\".\"id\")"
    );

    let upsert = sqlgen::merge_upsert(descriptor.table(), staging, &columns, &keys).unwrap();
    assert!(upsert.starts_with("INSERT INTO \"accounts\""));
}

#[test]
fn test_sync_predicate_limits_the_delete_scope() {
    let delete = sqlgen::sync_delete(
        "accounts",
        "_staging_accounts_deadbeef",
        &["id".to_string()],
        Some("owner = 'ada'"),
    )
    .unwrap();
    // Rows outside the predicate can never match the DELETE's WHERE clause.
    assert!(delete.ends_with(" AND (owner = 'ada')"));
}

#[test]
fn test_untrusted_mapping_is_rejected() {
    // Manual registrations are not trusted introspection; hostile names must
    // fail validation rather than reach generated SQL.
    let result = TableDescriptor::builder("accounts\"; DROP TABLE accounts;--")
        .key_column("id", |a: &Account| a.id.into())
        .build();
    assert!(result.is_err());
}

#[test]
fn test_accessors_feed_wire_values_in_column_order() {
    let descriptor = Account::table_descriptor();
    let account = Account {
        id: 9,
        owner: "ada".to_string(),
        balance: 250,
    };

    let values: Vec<SqlValue> = descriptor
        .columns()
        .iter()
        .map(|c| c.value_of(&account))
        .collect();
    assert_eq!(
        values,
        vec![
            SqlValue::I64(9),
            SqlValue::Text("ada".to_string()),
            SqlValue::I64(250),
        ]
    );
}
