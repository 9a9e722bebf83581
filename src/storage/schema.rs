//! Database schema definitions
//!
//! Backing-table names are caller-controlled, so the per-container DDL is
//! produced by functions instead of constants. Names are sanitized before
//! they reach any of these statements.

/// Version stamped into the metadata row of every backing table.
/// Bump only when a backing-table column layout changes.
pub const SCHEMA_VERSION: &str = "0";

/// SQL to create the shared metadata table
pub const CREATE_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    table_name TEXT PRIMARY KEY,
    schema_version TEXT NOT NULL,
    container_type TEXT NOT NULL,
    UNIQUE (table_name, container_type)
)
"#;

/// SQL to create a Dict backing table.
///
/// `item_order` totally orders iteration; `serialized_key` uniqueness
/// enforces the mapping contract.
pub fn create_dict_table(table: &str) -> String {
    format!(
        "CREATE TABLE {} (\
         serialized_key BLOB NOT NULL UNIQUE, \
         serialized_value BLOB NOT NULL, \
         item_order INTEGER PRIMARY KEY)",
        table
    )
}

/// SQL to create a Set backing table
pub fn create_set_table(table: &str) -> String {
    format!("CREATE TABLE {} (serialized_value BLOB PRIMARY KEY)", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_embeds_table_name() {
        assert!(create_dict_table("kv_1").starts_with("CREATE TABLE kv_1 ("));
        assert!(create_set_table("s_1").contains("serialized_value BLOB PRIMARY KEY"));
    }
}
