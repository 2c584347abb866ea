// sql-rag-agent/crates/sql-rag-agent/src/identifiers.rs

//! Case-insensitive identifier resolution and a small SELECT builder on top of it.

use anyhow::Result;
use std::collections::HashMap;
use std::fmt;

use crate::database::QueryGateway;

/// Double-quotes an identifier, doubling any embedded quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns the stored spelling of `logical_name` from `actual_columns`,
/// quoted. Falls back to quoting `logical_name` itself when nothing matches.
pub fn case_safe_column(logical_name: &str, actual_columns: &[String]) -> String {
    let wanted = logical_name.to_lowercase();
    let resolved = actual_columns
        .iter()
        .find(|col| col.to_lowercase() == wanted)
        .map(String::as_str)
        .unwrap_or(logical_name);
    quote_identifier(resolved)
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub table: String,
    /// Column of the base table.
    pub on_main: String,
    /// Column of the joined table.
    pub on_join: String,
}

/// Right-hand side of a WHERE condition.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlLiteral {
    Text(String),
    Integer(i64),
    /// NaN and infinities have no SQL spelling and render as `NULL`.
    Real(f64),
    Null,
    /// Inserted verbatim; the caller is responsible for its safety.
    Raw(String),
}

impl fmt::Display for SqlLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlLiteral::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlLiteral::Integer(i) => write!(f, "{}", i),
            SqlLiteral::Real(r) if r.is_finite() => write!(f, "{}", r),
            SqlLiteral::Real(_) => f.write_str("NULL"),
            SqlLiteral::Null => f.write_str("NULL"),
            SqlLiteral::Raw(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereCondition {
    pub table: String,
    pub column: String,
    pub operator: String,
    pub value: SqlLiteral,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectSpec {
    pub base_table: String,
    /// Plain names resolve against the base table; `table.column` against `table`.
    pub columns: Vec<String>,
    pub joins: Vec<JoinSpec>,
    pub conditions: Vec<WhereCondition>,
    /// `None` or zero means no LIMIT clause.
    pub limit: Option<u32>,
}

impl SelectSpec {
    pub fn new(base_table: impl Into<String>) -> Self {
        Self {
            base_table: base_table.into(),
            ..Default::default()
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn join(
        mut self,
        table: impl Into<String>,
        on_main: impl Into<String>,
        on_join: impl Into<String>,
    ) -> Self {
        self.joins.push(JoinSpec {
            table: table.into(),
            on_main: on_main.into(),
            on_join: on_join.into(),
        });
        self
    }

    pub fn filter(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: SqlLiteral,
    ) -> Self {
        self.conditions.push(WhereCondition {
            table: table.into(),
            column: column.into(),
            operator: operator.into(),
            value,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Column lists fetched once per table for the lifetime of one build.
struct ColumnCache<'a> {
    gateway: &'a dyn QueryGateway,
    columns: HashMap<String, Vec<String>>,
}

impl<'a> ColumnCache<'a> {
    async fn resolve(&mut self, table: &str, column: &str) -> Result<String> {
        if !self.columns.contains_key(table) {
            let fetched = self.gateway.list_columns(table).await?;
            self.columns.insert(table.to_string(), fetched);
        }
        let actual = self.columns.get(table).map(Vec::as_slice).unwrap_or(&[]);
        Ok(case_safe_column(column, actual))
    }
}

/// Builds a SELECT in which every column reference has been resolved against
/// the real column list of its table.
pub async fn build_case_safe_select(gateway: &dyn QueryGateway, spec: &SelectSpec) -> Result<String> {
    let mut cache = ColumnCache {
        gateway,
        columns: HashMap::new(),
    };

    let mut select_parts = Vec::with_capacity(spec.columns.len());
    for column in &spec.columns {
        match column.split_once('.') {
            Some((table, col)) => {
                let resolved = cache.resolve(table, col).await?;
                select_parts.push(format!("{}.{}", table, resolved));
            }
            None => select_parts.push(cache.resolve(&spec.base_table, column).await?),
        }
    }
    let projection = if select_parts.is_empty() {
        "*".to_string()
    } else {
        select_parts.join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, spec.base_table);

    for join in &spec.joins {
        let main_col = cache.resolve(&spec.base_table, &join.on_main).await?;
        let join_col = cache.resolve(&join.table, &join.on_join).await?;
        sql.push_str(&format!(
            " JOIN {} ON {}.{} = {}.{}",
            join.table, spec.base_table, main_col, join.table, join_col
        ));
    }

    if !spec.conditions.is_empty() {
        let mut clauses = Vec::with_capacity(spec.conditions.len());
        for cond in &spec.conditions {
            let col = cache.resolve(&cond.table, &cond.column).await?;
            clauses.push(format!("{}.{} {} {}", cond.table, col, cond.operator, cond.value));
        }
        sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }

    if let Some(limit) = spec.limit.filter(|l| *l > 0) {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryResult;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedColumns {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl QueryGateway for FixedColumns {
        async fn execute(&self, _sql: &str, _timeout: Duration) -> QueryResult {
            QueryResult::ok(Vec::new())
        }

        async fn list_columns(&self, table: &str) -> anyhow::Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(match table {
                "patients" => vec!["Id".into(), "First".into(), "Gender".into()],
                "encounters" => vec!["Id".into(), "Patient".into(), "TotalCost".into()],
                _ => Vec::new(),
            })
        }

        async fn test_connectivity(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_case_safe_column_matches_case_insensitively() {
        let actual = cols(&["Id", "FIRST", "birthDate"]);
        assert_eq!(case_safe_column("birthdate", &actual), "\"birthDate\"");
        assert_eq!(case_safe_column("ID", &actual), "\"Id\"");
    }

    #[test]
    fn test_case_safe_column_fallback() {
        assert_eq!(case_safe_column("missing", &cols(&["Id"])), "\"missing\"");
        assert_eq!(case_safe_column("x", &[]), "\"x\"");
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(SqlLiteral::Text("O'Brien".into()).to_string(), "'O''Brien'");
        assert_eq!(SqlLiteral::Integer(42).to_string(), "42");
        assert_eq!(SqlLiteral::Real(1.5).to_string(), "1.5");
        assert_eq!(SqlLiteral::Null.to_string(), "NULL");
        assert_eq!(SqlLiteral::Real(f64::NAN).to_string(), "NULL");
        assert_eq!(SqlLiteral::Real(f64::INFINITY).to_string(), "NULL");
        assert_eq!(SqlLiteral::Real(f64::NEG_INFINITY).to_string(), "NULL");
        assert_eq!(SqlLiteral::Raw("'F'".into()).to_string(), "'F'");
    }

    #[tokio::test]
    async fn test_build_full_select() {
        let gateway = FixedColumns {
            lookups: AtomicUsize::new(0),
        };
        let spec = SelectSpec::new("patients")
            .column("first")
            .column("encounters.totalcost")
            .join("encounters", "id", "patient")
            .filter("patients", "gender", "=", SqlLiteral::Text("F".into()))
            .filter("encounters", "TOTALCOST", ">", SqlLiteral::Integer(100))
            .limit(10);

        let sql = build_case_safe_select(&gateway, &spec).await.unwrap();
        assert_eq!(
            sql,
            "SELECT \"First\", encounters.\"TotalCost\" FROM patients \
             JOIN encounters ON patients.\"Id\" = encounters.\"Patient\" \
             WHERE patients.\"Gender\" = 'F' AND encounters.\"TotalCost\" > 100 LIMIT 10"
        );
        // One lookup per distinct table.
        assert_eq!(gateway.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_build_without_columns_or_limit() {
        let gateway = FixedColumns {
            lookups: AtomicUsize::new(0),
        };
        let sql = build_case_safe_select(&gateway, &SelectSpec::new("patients").limit(0))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM patients");
    }

    #[tokio::test]
    async fn test_unknown_table_falls_back_to_logical_names() {
        let gateway = FixedColumns {
            lookups: AtomicUsize::new(0),
        };
        let sql = build_case_safe_select(&gateway, &SelectSpec::new("claims").column("amount"))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT \"amount\" FROM claims");
    }

    proptest! {
        #[test]
        fn prop_resolver_returns_stored_spelling(
            columns in prop::collection::btree_set("[a-zA-Z_]{1,10}", 1..8),
            pick in any::<prop::sample::Index>(),
            flip in any::<bool>(),
        ) {
            // Keep only names unique under case folding.
            let mut seen = std::collections::HashSet::new();
            let columns: Vec<String> = columns
                .into_iter()
                .filter(|c| seen.insert(c.to_lowercase()))
                .collect();
            let target = pick.get(&columns);
            let logical = if flip { target.to_uppercase() } else { target.to_lowercase() };
            prop_assert_eq!(case_safe_column(&logical, &columns), format!("\"{}\"", target));
        }

        #[test]
        fn prop_resolver_fallback_quotes_input(name in "[a-z]{1,8}") {
            let columns = vec!["ZZ_ONLY_9".to_string()];
            prop_assert_eq!(case_safe_column(&name, &columns), format!("\"{}\"", name));
        }

        #[test]
        fn prop_limit_clause_only_when_positive(limit in 0u32..5000) {
            let gateway = FixedColumns {
                lookups: AtomicUsize::new(0),
            };
            let spec = SelectSpec::new("claims").limit(limit);
            let sql = tokio_test::block_on(build_case_safe_select(&gateway, &spec)).unwrap();
            if limit == 0 {
                prop_assert_eq!(sql, "SELECT * FROM claims");
            } else {
                prop_assert_eq!(sql, format!("SELECT * FROM claims LIMIT {}", limit));
            }
        }
    }
}
