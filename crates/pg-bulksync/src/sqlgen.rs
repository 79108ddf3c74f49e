//! Reconciliation SQL generation.
//!
//! Pure functions from table metadata to the DDL/DML text the operator
//! executes. Every interpolated identifier goes through the allow-list
//! validation in [`crate::identifier`]; names may come from manual mappings
//! and are never trusted.

use crate::error::{BulkError, Result};
use crate::identifier::quote_ident;

/// `COPY "table" ("c1", ...) FROM STDIN WITH (FORMAT BINARY)`
pub fn copy_in_statement(table: &str, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(BulkError::Validation(format!(
            "cannot copy into table {} without columns",
            table
        )));
    }
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT BINARY)",
        quote_ident(table)?,
        quoted_list(columns)?
    ))
}

/// Staging DDL: a temp table shaped like the destination, scoped to the
/// session and dropped with it.
pub fn staging_table_ddl(staging: &str, destination: &str) -> Result<String> {
    Ok(format!(
        "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS)",
        quote_ident(staging)?,
        quote_ident(destination)?
    ))
}

/// Insert finalize under conflict-ignore: duplicates are skipped, not fatal.
pub fn insert_ignore_from_staging(
    destination: &str,
    staging: &str,
    columns: &[String],
) -> Result<String> {
    let cols = quoted_list(columns)?;
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT DO NOTHING",
        quote_ident(destination)?,
        cols,
        cols,
        quote_ident(staging)?
    ))
}

/// Merge finalize: a single upsert from staging keyed on `key_columns`,
/// updating every non-key column from the staging row.
pub fn merge_upsert(
    destination: &str,
    staging: &str,
    columns: &[String],
    key_columns: &[String],
) -> Result<String> {
    if key_columns.is_empty() {
        return Err(BulkError::Validation(format!(
            "merge into {} requires at least one key column",
            destination
        )));
    }

    let cols = quoted_list(columns)?;
    let keys = quoted_list(key_columns)?;

    let update_set: Vec<String> = columns
        .iter()
        .filter(|c| !key_columns.contains(c))
        .map(|c| quote_ident(c).map(|q| format!("{} = EXCLUDED.{}", q, q)))
        .collect::<Result<_>>()?;

    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) DO",
        quote_ident(destination)?,
        cols,
        cols,
        quote_ident(staging)?,
        keys
    );

    if update_set.is_empty() {
        // Every column is part of the key - nothing to update in place.
        sql.push_str(" NOTHING");
    } else {
        sql.push_str(&format!(" UPDATE SET {}", update_set.join(", ")));
    }

    Ok(sql)
}

/// Sync delete: remove destination rows whose key is absent from staging,
/// restricted to `predicate` when one is supplied. Rows outside the
/// predicate's scope are never touched.
pub fn sync_delete(
    destination: &str,
    staging: &str,
    key_columns: &[String],
    predicate: Option<&str>,
) -> Result<String> {
    if key_columns.is_empty() {
        return Err(BulkError::Validation(format!(
            "sync against {} requires at least one key column",
            destination
        )));
    }
    if let Some(p) = predicate {
        if p.trim().is_empty() {
            return Err(BulkError::Validation(
                "sync delete predicate cannot be empty when supplied".to_string(),
            ));
        }
    }

    let dest = quote_ident(destination)?;
    let stage = quote_ident(staging)?;

    let key_match: Vec<String> = key_columns
        .iter()
        .map(|k| quote_ident(k).map(|q| format!("{}.{} = {}.{}", stage, q, dest, q)))
        .collect::<Result<_>>()?;

    let mut sql = format!(
        "DELETE FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {})",
        dest,
        stage,
        key_match.join(" AND ")
    );

    if let Some(p) = predicate {
        sql.push_str(&format!(" AND ({})", p));
    }

    Ok(sql)
}

/// Best-effort staging cleanup.
pub fn drop_staging(staging: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_ident(staging)?))
}

fn quoted_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}
