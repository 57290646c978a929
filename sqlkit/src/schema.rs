//! Schema operations, column metadata, and column-type inference.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::connection::Connection;
use crate::error::Result;
use crate::query::table::{CreateTableOptions, TableDefinition};
use crate::row::Row;
use crate::value::Value;

/// Name of the side table recording declared column types when
/// `Config::map_columns` is enabled.
pub const COLUMN_MAP_TABLE: &str = "sqlkit_column_types";

/// Column type descriptor used by table definitions and type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Stored as integer 0/1.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
    /// Seconds since the Unix epoch, stored as a real.
    Date,
    /// Binary blob.
    Blob,
}

impl ColumnType {
    /// Declared SQL type name; the engine derives the storage affinity
    /// from it.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Date => "DATE",
            Self::Blob => "BLOB",
        }
    }

    /// Best-effort mapping from a declared SQL type back to a descriptor,
    /// following the engine's affinity rules.
    #[must_use]
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.to_uppercase();
        if upper.contains("BOOL") {
            Some(Self::Boolean)
        } else if upper.contains("INT") {
            Some(Self::Integer)
        } else if upper.contains("DATE") || upper.contains("TIME") {
            Some(Self::Date)
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Some(Self::Text)
        } else if upper.contains("BLOB") {
            Some(Self::Blob)
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Some(Self::Real)
        } else {
            None
        }
    }
}

/// One column of a table, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared SQL type, when the table declares one.
    pub declared_type: Option<String>,
    /// Whether the column carries a NOT NULL constraint.
    pub not_null: bool,
    /// Default value expression, as SQL text.
    pub default_value: Option<String>,
    /// One-based position within the primary key, zero when the column is
    /// not part of it.
    pub primary_key_index: i64,
}

impl ColumnInfo {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            declared_type: row
                .get::<Option<String>>("type")?
                .filter(|t| !t.is_empty()),
            not_null: row.get::<i64>("notnull")? != 0,
            default_value: row.get("dflt_value")?,
            primary_key_index: row.get("pk")?,
        })
    }
}

impl Connection {
    /// Creates a table through the definition DSL and invalidates any
    /// cached schema for it.
    ///
    /// # Errors
    /// Definition rendering errors (foreign-key resolution) or execution
    /// errors from the engine.
    pub fn create_table(
        &self,
        name: &str,
        options: CreateTableOptions,
        body: impl FnOnce(&mut TableDefinition),
    ) -> Result<()> {
        let mut definition = TableDefinition::new(name, options);
        body(&mut definition);
        let sql = definition.render_sql(self)?;
        self.execute_batch(&sql)?;
        self.cache().invalidate_table(name);
        if self.config().map_columns {
            self.record_column_types(name, &definition.column_types())?;
        }
        Ok(())
    }

    /// Drops a table and invalidates any cached schema for it.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the engine rejects the drop.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.execute_batch(&format!("DROP TABLE {name}"))?;
        self.cache().invalidate_table(name);
        if self.config().map_columns && self.table_exists(COLUMN_MAP_TABLE)? {
            self.execute(
                &format!("DELETE FROM {COLUMN_MAP_TABLE} WHERE lower(table_name) = lower(?)"),
                &[Value::Text(name.to_owned())],
            )?;
        }
        Ok(())
    }

    /// Renames a table and invalidates cached schema under both names.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the engine rejects the rename.
    pub fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.execute_batch(&format!("ALTER TABLE {from} RENAME TO {to}"))?;
        self.cache().invalidate_table(from);
        self.cache().invalidate_table(to);
        if self.config().map_columns && self.table_exists(COLUMN_MAP_TABLE)? {
            self.execute(
                &format!(
                    "UPDATE {COLUMN_MAP_TABLE} SET table_name = ? WHERE lower(table_name) = lower(?)"
                ),
                &[Value::Text(to.to_owned()), Value::Text(from.to_owned())],
            )?;
        }
        Ok(())
    }

    /// Creates an index named `<table>_on_<columns>` over the given
    /// columns.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the engine rejects the index.
    pub fn create_index(
        &self,
        table: &str,
        columns: &[&str],
        unique: bool,
        if_not_exists: bool,
    ) -> Result<()> {
        let mut sql = String::from("CREATE ");
        if unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        if if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&format!(
            "{table}_on_{} ON {table}({})",
            columns.join("_"),
            columns.join(", ")
        ));
        self.execute_batch(&sql)
    }

    /// Drops an index by name.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the engine rejects the drop.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.execute_batch(&format!("DROP INDEX {name}"))
    }

    /// Whether a table or view with this name exists (any letter case),
    /// in the main or temporary schema.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the lookup fails.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let found = self.query_row_optional(
            "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') \
             AND lower(name) = lower(?1) \
             UNION ALL \
             SELECT 1 FROM sqlite_temp_master WHERE type IN ('table', 'view') \
             AND lower(name) = lower(?1)",
            &[Value::Text(name.to_owned())],
        )?;
        Ok(found.is_some())
    }

    /// Column metadata for a table, cached.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the pragma fails.
    pub fn columns_in(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if let Some(cached) = self.cache().columns(table) {
            return Ok(cached);
        }
        let rows = self.query_rows(&format!("PRAGMA table_info({table})"), &[])?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ColumnInfo::from_row(row)?);
        }
        self.cache().set_columns(table, Some(columns.clone()));
        Ok(columns)
    }

    /// Primary key columns of a table, cached. `None` when the table
    /// declares no explicit primary key; such tables are still addressable
    /// through the `rowid` sentinel.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the pragma fails.
    pub fn primary_key(&self, table: &str) -> Result<Option<Vec<String>>> {
        if let Some(cached) = self.cache().primary_key(table) {
            return Ok(cached);
        }
        let mut key_columns: Vec<_> = self
            .columns_in(table)?
            .into_iter()
            .filter(|c| c.primary_key_index > 0)
            .collect();
        key_columns.sort_by_key(|c| c.primary_key_index);
        let key = if key_columns.is_empty() {
            None
        } else {
            Some(key_columns.into_iter().map(|c| c.name).collect())
        };
        self.cache().set_primary_key(table, Some(key.clone()));
        Ok(key)
    }

    pub(crate) fn ensure_column_map(&self) -> Result<()> {
        self.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {COLUMN_MAP_TABLE} (\
             table_name TEXT NOT NULL, \
             column_name TEXT NOT NULL, \
             column_type TEXT NOT NULL, \
             PRIMARY KEY (table_name, column_name))"
        ))
    }

    fn record_column_types(&self, table: &str, types: &[(String, ColumnType)]) -> Result<()> {
        self.ensure_column_map()?;
        let rows: Vec<Vec<Value>> = types
            .iter()
            .map(|(column, ty)| {
                vec![
                    Value::Text(table.to_owned()),
                    Value::Text(column.clone()),
                    Value::Text(ty.as_sql().to_owned()),
                ]
            })
            .collect();
        self.execute_many(
            &format!("INSERT OR REPLACE INTO {COLUMN_MAP_TABLE} VALUES (?, ?, ?)"),
            &rows,
        )?;
        self.cache().set_table_types(table, None);
        Ok(())
    }

    /// Declared column types of a table, keyed by lowercased column name,
    /// cached. Reads the column-map side table when present, otherwise
    /// derives the types from the table's declared SQL types.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the lookups fail.
    pub fn declared_column_types(&self, table: &str) -> Result<HashMap<String, ColumnType>> {
        if let Some(cached) = self.cache().table_types(table) {
            return Ok(cached);
        }
        let mut types = HashMap::new();
        if self.table_exists(COLUMN_MAP_TABLE)? {
            let rows = self.query_rows(
                &format!(
                    "SELECT column_name, column_type FROM {COLUMN_MAP_TABLE} \
                     WHERE lower(table_name) = lower(?)"
                ),
                &[Value::Text(table.to_owned())],
            )?;
            for row in &rows {
                let column: String = row.get("column_name")?;
                let declared: String = row.get("column_type")?;
                if let Some(ty) = ColumnType::from_declared(&declared) {
                    types.insert(column.to_lowercase(), ty);
                }
            }
        }
        if types.is_empty() {
            for column in self.columns_in(table)? {
                if let Some(ty) = column
                    .declared_type
                    .as_deref()
                    .and_then(ColumnType::from_declared)
                {
                    types.insert(column.name.to_lowercase(), ty);
                }
            }
        }
        self.cache().set_table_types(table, Some(types.clone()));
        Ok(types)
    }

    /// Infers result column types for a raw SELECT statement, cached by
    /// SQL text. Keys are lowercased result column names.
    ///
    /// Best effort, scoped to plain single- or multi-table SELECTs:
    /// unrecognized statements and expression columns simply contribute
    /// no entries.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the schema lookups fail.
    pub fn column_types_for_sql(&self, sql: &str) -> Result<HashMap<String, ColumnType>> {
        if let Some(cached) = self.cache().statement_types(sql) {
            return Ok(cached);
        }
        let inferred = self.infer_statement_types(sql)?;
        self.cache().set_statement_types(sql, Some(inferred.clone()));
        Ok(inferred)
    }

    fn infer_statement_types(&self, sql: &str) -> Result<HashMap<String, ColumnType>> {
        let mut inferred = HashMap::new();
        let Some(shape) = SelectShape::parse(sql) else {
            return Ok(inferred);
        };
        // Ordered per-source type maps; leftmost source wins on collision.
        let mut sources = Vec::with_capacity(shape.sources.len());
        for (alias, table) in &shape.sources {
            sources.push((alias.clone(), self.declared_column_types(table)?));
        }
        for item in &shape.selection {
            match item {
                SelectItem::Star => {
                    for (_, types) in &sources {
                        for (column, ty) in types {
                            inferred.entry(column.clone()).or_insert(*ty);
                        }
                    }
                }
                SelectItem::TableStar(alias) => {
                    if let Some((_, types)) =
                        sources.iter().find(|(a, _)| a == alias)
                    {
                        for (column, ty) in types {
                            inferred.entry(column.clone()).or_insert(*ty);
                        }
                    }
                }
                SelectItem::Column { table, column, output } => {
                    let ty = match table {
                        Some(alias) => sources
                            .iter()
                            .find(|(a, _)| a == alias)
                            .and_then(|(_, types)| types.get(column))
                            .copied(),
                        None => sources
                            .iter()
                            .find_map(|(_, types)| types.get(column))
                            .copied(),
                    };
                    if let Some(ty) = ty {
                        inferred.entry(output.clone()).or_insert(ty);
                    }
                }
            }
        }
        Ok(inferred)
    }
}

enum SelectItem {
    Star,
    TableStar(String),
    Column {
        table: Option<String>,
        column: String,
        output: String,
    },
}

struct SelectShape {
    sources: Vec<(String, String)>,
    selection: Vec<SelectItem>,
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!()))
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap_or_else(|_| unreachable!()))
}

impl SelectShape {
    fn parse(sql: &str) -> Option<Self> {
        // Identifier case does not matter to the engine; folding the whole
        // statement keeps the scanning simple. Inferred keys come out
        // lowercased.
        let normalized = whitespace_regex()
            .replace_all(sql.trim(), " ")
            .to_lowercase();
        let normalized = normalized.trim_end_matches(';').trim().to_owned();
        let rest = normalized.strip_prefix("select ")?;
        let rest = rest.strip_prefix("distinct ").unwrap_or(rest);
        let from_at = find_top_level(rest, " from ")?;
        let selection_part = &rest[..from_at];
        let mut source_part = &rest[from_at + " from ".len()..];
        for terminator in [" where ", " group by ", " order by ", " limit "] {
            if let Some(at) = find_top_level(source_part, terminator) {
                source_part = &source_part[..at];
            }
        }

        let sources = parse_sources(source_part)?;
        let mut selection = Vec::new();
        for item in split_top_level(selection_part) {
            let item = item.trim();
            if item == "*" {
                selection.push(SelectItem::Star);
            } else if let Some(alias) = item.strip_suffix(".*") {
                if identifier_regex().is_match(alias) {
                    selection.push(SelectItem::TableStar(alias.to_owned()));
                }
            } else {
                let (expr, output_alias) = match item.rsplit_once(" as ") {
                    Some((expr, alias)) if identifier_regex().is_match(alias.trim()) => {
                        (expr.trim(), Some(alias.trim().to_owned()))
                    }
                    _ => (item, None),
                };
                if let Some((table, column)) = expr.split_once('.') {
                    if identifier_regex().is_match(table) && identifier_regex().is_match(column) {
                        selection.push(SelectItem::Column {
                            table: Some(table.to_owned()),
                            column: column.to_owned(),
                            output: output_alias.unwrap_or_else(|| column.to_owned()),
                        });
                    }
                } else if identifier_regex().is_match(expr) {
                    selection.push(SelectItem::Column {
                        table: None,
                        column: expr.to_owned(),
                        output: output_alias.unwrap_or_else(|| expr.to_owned()),
                    });
                }
                // Anything else is an expression; it contributes no type.
            }
        }
        Some(Self { sources, selection })
    }
}

fn parse_sources(source_part: &str) -> Option<Vec<(String, String)>> {
    let mut flattened = source_part.to_owned();
    for join in [
        " left outer join ",
        " left join ",
        " inner join ",
        " cross join ",
        " join ",
    ] {
        flattened = flattened.replace(join, ",");
    }
    let mut sources = Vec::new();
    for entry in split_top_level(&flattened) {
        let entry = entry.trim();
        let entry = entry.split(" on ").next().unwrap_or(entry);
        let entry = entry.split(" using ").next().unwrap_or(entry);
        let tokens: Vec<&str> = entry.split_whitespace().collect();
        let (table, alias) = match tokens.as_slice() {
            [table] => (*table, *table),
            [table, alias] => (*table, *alias),
            [table, "as", alias] => (*table, *alias),
            _ => return None,
        };
        if !identifier_regex().is_match(table) || !identifier_regex().is_match(alias) {
            // Sub-selects and expression sources are out of scope.
            return None;
        }
        sources.push((alias.to_owned(), table.to_owned()));
    }
    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}

/// Byte offset of the first occurrence of `keyword` outside parentheses.
fn find_top_level(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    for position in 0..bytes.len() {
        match bytes[position] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && text[position..].starts_with(keyword) {
            return Some(position);
        }
    }
    None
}

/// Splits on commas outside parentheses.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0_i32;
    for ch in text.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_mapping_follows_affinity() {
        assert_eq!(ColumnType::from_declared("INTEGER"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::from_declared("BOOLEAN"), Some(ColumnType::Boolean));
        assert_eq!(ColumnType::from_declared("VARCHAR(20)"), Some(ColumnType::Text));
        assert_eq!(ColumnType::from_declared("DOUBLE"), Some(ColumnType::Real));
        assert_eq!(ColumnType::from_declared("DATETIME"), Some(ColumnType::Date));
        assert_eq!(ColumnType::from_declared("BLOB"), Some(ColumnType::Blob));
        assert_eq!(ColumnType::from_declared("GEOMETRY"), None);
    }

    #[test]
    fn shape_parses_single_table() {
        let shape = SelectShape::parse("SELECT id, name AS label FROM users WHERE id = ?")
            .expect("parsable");
        assert_eq!(shape.sources, vec![("users".to_owned(), "users".to_owned())]);
        assert_eq!(shape.selection.len(), 2);
        match &shape.selection[1] {
            SelectItem::Column { column, output, .. } => {
                assert_eq!(column, "name");
                assert_eq!(output, "label");
            }
            _ => unreachable!("expected a column item"),
        }
    }

    #[test]
    fn shape_parses_joins_and_aliases() {
        let shape = SelectShape::parse(
            "SELECT u.id, o.total FROM users u INNER JOIN orders AS o ON u.id = o.user_id",
        )
        .expect("parsable");
        assert_eq!(
            shape.sources,
            vec![
                ("u".to_owned(), "users".to_owned()),
                ("o".to_owned(), "orders".to_owned()),
            ]
        );
    }

    #[test]
    fn shape_rejects_non_select() {
        assert!(SelectShape::parse("UPDATE t SET a = 1").is_none());
        assert!(SelectShape::parse("SELECT * FROM (SELECT 1)").is_none());
    }

    #[test]
    fn top_level_scanning_skips_parens() {
        assert_eq!(find_top_level("a (from x) from b", " from "), Some(10));
        assert_eq!(
            split_top_level("a, max(b, c), d"),
            vec!["a", " max(b, c)", " d"]
        );
    }
}
