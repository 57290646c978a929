//! CREATE TABLE definition DSL.

use crate::connection::Connection;
use crate::error::Result;
use crate::query::expression::Expr;
use crate::query::ConflictResolution;
use crate::schema::ColumnType;
use crate::value::ToValue;

/// Options of a `CREATE TABLE` statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTableOptions {
    /// Add `IF NOT EXISTS`.
    pub if_not_exists: bool,
    /// Create a temporary table.
    pub temporary: bool,
    /// Add `WITHOUT ROWID`.
    pub without_rowid: bool,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    /// `CASCADE`.
    Cascade,
    /// `RESTRICT`.
    Restrict,
    /// `SET NULL`.
    SetNull,
    /// `SET DEFAULT`.
    SetDefault,
    /// `NO ACTION`.
    NoAction,
}

impl ForeignKeyAction {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnPrimaryKey {
    conflict: Option<ConflictResolution>,
    autoincrement: bool,
}

#[derive(Debug, Clone)]
struct ColumnReference {
    table: String,
    column: Option<String>,
    on_delete: Option<ForeignKeyAction>,
    on_update: Option<ForeignKeyAction>,
    deferred: bool,
}

/// One column of a table under definition. Obtained from
/// [`TableDefinition::column`]; constraint methods chain.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    name: String,
    ty: ColumnType,
    primary_key: Option<ColumnPrimaryKey>,
    not_null: Option<Option<ConflictResolution>>,
    unique: Option<Option<ConflictResolution>>,
    indexed: bool,
    checks: Vec<Expr>,
    default: Option<Expr>,
    collation: Option<String>,
    reference: Option<ColumnReference>,
}

impl ColumnDefinition {
    fn new(name: String, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: None,
            not_null: None,
            unique: None,
            indexed: false,
            checks: Vec::new(),
            default: None,
            collation: None,
            reference: None,
        }
    }

    /// Makes this column the primary key.
    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = Some(ColumnPrimaryKey {
            conflict: None,
            autoincrement: false,
        });
        self
    }

    /// Primary key with a conflict clause and optional autoincrement.
    pub fn primary_key_with(
        &mut self,
        conflict: Option<ConflictResolution>,
        autoincrement: bool,
    ) -> &mut Self {
        self.primary_key = Some(ColumnPrimaryKey {
            conflict,
            autoincrement,
        });
        self
    }

    /// Adds `NOT NULL`.
    pub fn not_null(&mut self) -> &mut Self {
        self.not_null = Some(None);
        self
    }

    /// Adds `NOT NULL` with a conflict clause. `ABORT` is the engine
    /// default and renders without a clause.
    pub fn not_null_on_conflict(&mut self, resolution: ConflictResolution) -> &mut Self {
        self.not_null = Some(Some(resolution));
        self
    }

    /// Adds `UNIQUE`.
    pub fn unique(&mut self) -> &mut Self {
        self.unique = Some(None);
        self
    }

    /// Adds `UNIQUE` with a conflict clause. `ABORT` is the engine
    /// default and renders without a clause.
    pub fn unique_on_conflict(&mut self, resolution: ConflictResolution) -> &mut Self {
        self.unique = Some(Some(resolution));
        self
    }

    /// Requests a secondary index `<table>_on_<column>`, emitted after
    /// the `CREATE TABLE` statement.
    pub fn indexed(&mut self) -> &mut Self {
        self.indexed = true;
        self
    }

    /// Adds a `CHECK` constraint; the expression renders with literals
    /// inlined.
    pub fn check(&mut self, predicate: Expr) -> &mut Self {
        self.checks.push(predicate);
        self
    }

    /// Adds a literal `DEFAULT`.
    pub fn default_value(&mut self, value: impl ToValue) -> &mut Self {
        self.default = Some(Expr::Literal(value.to_value()));
        self
    }

    /// Adds an expression `DEFAULT`, rendered parenthesized with literals
    /// inlined.
    pub fn default_expr(&mut self, expression: Expr) -> &mut Self {
        self.default = Some(expression);
        self
    }

    /// Sets the column collation.
    pub fn collate(&mut self, collation: impl Into<String>) -> &mut Self {
        self.collation = Some(collation.into());
        self
    }

    /// Adds a foreign key to another table. Without an explicit target
    /// column the referenced table's primary key is used, falling back to
    /// `rowid`.
    pub fn references(&mut self, table: impl Into<String>, column: Option<&str>) -> &mut Self {
        self.reference = Some(ColumnReference {
            table: table.into(),
            column: column.map(ToOwned::to_owned),
            on_delete: None,
            on_update: None,
            deferred: false,
        });
        self
    }

    /// `ON DELETE` action for the column's foreign key.
    pub fn on_delete(&mut self, action: ForeignKeyAction) -> &mut Self {
        if let Some(reference) = &mut self.reference {
            reference.on_delete = Some(action);
        }
        self
    }

    /// `ON UPDATE` action for the column's foreign key.
    pub fn on_update(&mut self, action: ForeignKeyAction) -> &mut Self {
        if let Some(reference) = &mut self.reference {
            reference.on_update = Some(action);
        }
        self
    }

    /// Makes the column's foreign key deferrable, checked at commit.
    pub fn deferred(&mut self) -> &mut Self {
        if let Some(reference) = &mut self.reference {
            reference.deferred = true;
        }
        self
    }
}

#[derive(Debug, Clone)]
struct TableForeignKey {
    columns: Vec<String>,
    ref_table: String,
    ref_columns: Option<Vec<String>>,
    on_delete: Option<ForeignKeyAction>,
    on_update: Option<ForeignKeyAction>,
    deferred: bool,
}

/// A table under definition, configured by the closure given to
/// [`Connection::create_table`].
#[derive(Debug, Clone)]
pub struct TableDefinition {
    name: String,
    options: CreateTableOptions,
    columns: Vec<ColumnDefinition>,
    primary_key: Option<(Vec<String>, Option<ConflictResolution>)>,
    uniques: Vec<(Vec<String>, Option<ConflictResolution>)>,
    checks: Vec<Expr>,
    foreign_keys: Vec<TableForeignKey>,
}

impl TableDefinition {
    pub(crate) fn new(name: &str, options: CreateTableOptions) -> Self {
        Self {
            name: name.to_owned(),
            options,
            columns: Vec::new(),
            primary_key: None,
            uniques: Vec::new(),
            checks: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column and returns it for constraint chaining.
    pub fn column(&mut self, name: impl Into<String>, ty: ColumnType) -> &mut ColumnDefinition {
        let position = self.columns.len();
        self.columns.push(ColumnDefinition::new(name.into(), ty));
        &mut self.columns[position]
    }

    /// Declares a table-level (possibly composite) primary key.
    pub fn primary_key(&mut self, columns: &[&str], conflict: Option<ConflictResolution>) {
        self.primary_key = Some((
            columns.iter().map(|c| (*c).to_owned()).collect(),
            conflict,
        ));
    }

    /// Declares a table-level unique constraint.
    pub fn unique_key(&mut self, columns: &[&str], conflict: Option<ConflictResolution>) {
        self.uniques.push((
            columns.iter().map(|c| (*c).to_owned()).collect(),
            conflict,
        ));
    }

    /// Declares a table-level check constraint.
    pub fn check(&mut self, predicate: Expr) {
        self.checks.push(predicate);
    }

    /// Declares a table-level foreign key. Without explicit target
    /// columns the referenced table's primary key is used, falling back
    /// to `rowid`.
    pub fn foreign_key(
        &mut self,
        columns: &[&str],
        ref_table: impl Into<String>,
        ref_columns: Option<&[&str]>,
        on_delete: Option<ForeignKeyAction>,
        on_update: Option<ForeignKeyAction>,
        deferred: bool,
    ) {
        self.foreign_keys.push(TableForeignKey {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.map(|cols| cols.iter().map(|c| (*c).to_owned()).collect()),
            on_delete,
            on_update,
            deferred,
        });
    }

    pub(crate) fn column_types(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.ty))
            .collect()
    }

    /// Columns this definition would use as the target of a foreign key
    /// pointing at it: the declared primary key, or `rowid`.
    fn own_key_columns(&self) -> Vec<String> {
        if let Some((columns, _)) = &self.primary_key {
            return columns.clone();
        }
        let declared: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key.is_some())
            .map(|c| c.name.clone())
            .collect();
        if declared.is_empty() {
            vec!["rowid".to_owned()]
        } else {
            declared
        }
    }

    fn resolve_reference_columns(
        &self,
        conn: &Connection,
        ref_table: &str,
        explicit: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        if let Some(columns) = explicit {
            return Ok(columns);
        }
        if ref_table.eq_ignore_ascii_case(&self.name) {
            return Ok(self.own_key_columns());
        }
        Ok(conn
            .primary_key(ref_table)?
            .unwrap_or_else(|| vec!["rowid".to_owned()]))
    }

    pub(crate) fn render_sql(&self, conn: &Connection) -> Result<String> {
        let mut statements = Vec::new();
        let mut sql = String::from("CREATE ");
        if self.options.temporary {
            sql.push_str("TEMPORARY ");
        }
        sql.push_str("TABLE ");
        if self.options.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&self.name);
        sql.push_str(" (");

        let mut items = Vec::new();
        for column in &self.columns {
            items.push(self.render_column(conn, column)?);
        }
        if let Some((columns, conflict)) = &self.primary_key {
            let mut item = format!("PRIMARY KEY ({})", columns.join(", "));
            render_conflict(&mut item, *conflict);
            items.push(item);
        }
        for (columns, conflict) in &self.uniques {
            let mut item = format!("UNIQUE ({})", columns.join(", "));
            render_conflict(&mut item, *conflict);
            items.push(item);
        }
        for predicate in &self.checks {
            let mut item = String::from("CHECK (");
            predicate.render_inline(&mut item);
            item.push(')');
            items.push(item);
        }
        for fk in &self.foreign_keys {
            let targets =
                self.resolve_reference_columns(conn, &fk.ref_table, fk.ref_columns.clone())?;
            let mut item = format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                fk.columns.join(", "),
                fk.ref_table,
                targets.join(", ")
            );
            render_actions(&mut item, fk.on_delete, fk.on_update, fk.deferred);
            items.push(item);
        }
        sql.push_str(&items.join(", "));
        sql.push(')');
        if self.options.without_rowid {
            sql.push_str(" WITHOUT ROWID");
        }
        statements.push(sql);

        for column in &self.columns {
            if column.indexed {
                statements.push(format!(
                    "CREATE INDEX {table}_on_{column} ON {table}({column})",
                    table = self.name,
                    column = column.name
                ));
            }
        }
        Ok(statements.join("; "))
    }

    fn render_column(&self, conn: &Connection, column: &ColumnDefinition) -> Result<String> {
        let mut sql = format!("{} {}", column.name, column.ty.as_sql());
        if let Some(pk) = &column.primary_key {
            sql.push_str(" PRIMARY KEY");
            render_conflict(&mut sql, pk.conflict);
            if pk.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if let Some(conflict) = &column.not_null {
            sql.push_str(" NOT NULL");
            render_conflict(&mut sql, *conflict);
        }
        if let Some(conflict) = &column.unique {
            sql.push_str(" UNIQUE");
            render_conflict(&mut sql, *conflict);
        }
        for predicate in &column.checks {
            sql.push_str(" CHECK (");
            predicate.render_inline(&mut sql);
            sql.push(')');
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            match default {
                Expr::Literal(value) => sql.push_str(&value.to_literal_sql()),
                other => {
                    sql.push('(');
                    other.render_inline(&mut sql);
                    sql.push(')');
                }
            }
        }
        if let Some(collation) = &column.collation {
            sql.push_str(" COLLATE ");
            sql.push_str(collation);
        }
        if let Some(reference) = &column.reference {
            let targets = self.resolve_reference_columns(
                conn,
                &reference.table,
                reference.column.clone().map(|c| vec![c]),
            )?;
            sql.push_str(&format!(
                " REFERENCES {}({})",
                reference.table,
                targets.join(", ")
            ));
            render_actions(
                &mut sql,
                reference.on_delete,
                reference.on_update,
                reference.deferred,
            );
        }
        Ok(sql)
    }
}

/// `ON CONFLICT` suffix; `ABORT` is the engine default and renders
/// nothing.
fn render_conflict(sql: &mut String, conflict: Option<ConflictResolution>) {
    if let Some(resolution) = conflict {
        if resolution != ConflictResolution::Abort {
            sql.push_str(" ON CONFLICT ");
            sql.push_str(resolution.as_sql());
        }
    }
}

fn render_actions(
    sql: &mut String,
    on_delete: Option<ForeignKeyAction>,
    on_update: Option<ForeignKeyAction>,
    deferred: bool,
) {
    if let Some(action) = on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action.as_sql());
    }
    if let Some(action) = on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action.as_sql());
    }
    if deferred {
        sql.push_str(" DEFERRABLE INITIALLY DEFERRED");
    }
}

// Statement rendering is covered by integration tests that create real
// tables; the pure parts are tested here.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::col;

    fn definition(body: impl FnOnce(&mut TableDefinition)) -> TableDefinition {
        let mut def = TableDefinition::new("users", CreateTableOptions::default());
        body(&mut def);
        def
    }

    #[test]
    fn column_types_keep_declaration_order() {
        let def = definition(|t| {
            t.column("id", ColumnType::Integer).primary_key();
            t.column("name", ColumnType::Text).not_null();
        });
        assert_eq!(
            def.column_types(),
            vec![
                ("id".to_owned(), ColumnType::Integer),
                ("name".to_owned(), ColumnType::Text),
            ]
        );
    }

    #[test]
    fn own_key_falls_back_to_rowid() {
        let plain = definition(|t| {
            t.column("a", ColumnType::Text);
        });
        assert_eq!(plain.own_key_columns(), vec!["rowid".to_owned()]);

        let keyed = definition(|t| {
            t.column("id", ColumnType::Integer).primary_key();
        });
        assert_eq!(keyed.own_key_columns(), vec!["id".to_owned()]);

        let composite = definition(|t| {
            t.column("a", ColumnType::Integer);
            t.column("b", ColumnType::Integer);
            t.primary_key(&["a", "b"], None);
        });
        assert_eq!(
            composite.own_key_columns(),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }

    #[test]
    fn abort_conflict_renders_nothing() {
        let mut sql = String::from("NOT NULL");
        render_conflict(&mut sql, Some(ConflictResolution::Abort));
        assert_eq!(sql, "NOT NULL");
        render_conflict(&mut sql, Some(ConflictResolution::Replace));
        assert_eq!(sql, "NOT NULL ON CONFLICT REPLACE");
    }

    #[test]
    fn checks_render_inline() {
        let mut def = definition(|t| {
            t.column("age", ColumnType::Integer).check(col("age").ge(0));
        });
        // Exercise render via a fake check on the column list only.
        let column = def.columns.remove(0);
        assert_eq!(column.checks.len(), 1);
        let mut sql = String::new();
        column.checks[0].render_inline(&mut sql);
        assert_eq!(sql, "(age >= 0)");
    }
}
