// sql-rag-agent/crates/sql-rag-agent/src/chunker.rs

//! Turns a [`SchemaDescription`] into retrievable text chunks.
//!
//! Output order is fully determined by declaration order in the document:
//! per table an overview, a column listing and (for the important tables) one
//! detail chunk per column; then a global relationship listing and one
//! neighbour summary per table seen at either end of a relationship.

use crate::schema::{Relationship, SchemaDescription, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Tables that additionally get one chunk per column.
pub const IMPORTANT_TABLES: [&str; 4] = ["PATIENTS", "ENCOUNTERS", "MEDICATIONS", "CONDITIONS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    TableOverview,
    TableColumns,
    ColumnDetail,
    Relationships,
    TableRelationships,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::TableOverview => "table_overview",
            ChunkType::TableColumns => "table_columns",
            ChunkType::ColumnDetail => "column_detail",
            ChunkType::Relationships => "relationships",
            ChunkType::TableRelationships => "table_relationships",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "table_overview" => Some(ChunkType::TableOverview),
            "table_columns" => Some(ChunkType::TableColumns),
            "column_detail" => Some(ChunkType::ColumnDetail),
            "relationships" => Some(ChunkType::Relationships),
            "table_relationships" => Some(ChunkType::TableRelationships),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub table_name: Option<String>,
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaChunker {
    important_tables: Vec<String>,
}

impl SchemaChunker {
    pub fn new() -> Self {
        Self {
            important_tables: IMPORTANT_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Overrides the set of tables that receive per-column detail chunks.
    pub fn with_important_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            important_tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn chunk(&self, schema: &SchemaDescription) -> Vec<Chunk> {
        let tables = match &schema.tables {
            Some(tables) => tables,
            None => {
                warn!("Schema description has no tables field; no chunks produced");
                return Vec::new();
            }
        };

        let mut chunks = Vec::new();
        for table in tables {
            chunks.push(overview_chunk(table));
            chunks.push(columns_chunk(table));
            if self.important_tables.iter().any(|t| t == &table.name) {
                chunks.extend(column_detail_chunks(table));
            }
        }

        if !schema.relationships.is_empty() {
            chunks.push(relationships_chunk(&schema.relationships));
            chunks.extend(table_relationship_chunks(&schema.relationships));
        }

        disambiguate_keys(&mut chunks);
        debug!("Created {} schema chunks", chunks.len());
        chunks
    }
}

/// Keys are lower-cased, so names differing only in case collide. Later
/// duplicates get `_2`, `_3`, ... in document order.
fn disambiguate_keys(chunks: &mut [Chunk]) {
    let mut taken: HashSet<String> = HashSet::with_capacity(chunks.len());
    for chunk in chunks.iter_mut() {
        if !taken.contains(&chunk.key) {
            taken.insert(chunk.key.clone());
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}_{}", chunk.key, n);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", chunk.key, n);
        }
        debug!("Chunk key '{}' already used; renamed to '{}'", chunk.key, candidate);
        taken.insert(candidate.clone());
        chunk.key = candidate;
    }
}

fn overview_chunk(table: &Table) -> Chunk {
    let mut text = format!("Table: {}\nDescription: {}", table.name, table.description);
    if let Some(fields) = &table.identification_fields {
        text.push_str(&format!("\nKey Fields: {}", fields.join(", ")));
    }
    if let Some(fields) = &table.date_fields {
        text.push_str(&format!("\nDate Fields: {}", fields.join(", ")));
    }
    Chunk {
        chunk_type: ChunkType::TableOverview,
        table_name: Some(table.name.clone()),
        key: format!("table_{}", table.name.to_lowercase()),
        text,
    }
}

fn columns_chunk(table: &Table) -> Chunk {
    let mut text = format!("Table: {} - Columns:\n", table.name);
    for column in &table.columns {
        text.push_str(&format!(
            "Column: {} ({}) - {}\n",
            column.name, column.data_type, column.description
        ));
    }
    Chunk {
        chunk_type: ChunkType::TableColumns,
        table_name: Some(table.name.clone()),
        key: format!("columns_{}", table.name.to_lowercase()),
        text,
    }
}

fn column_detail_chunks(table: &Table) -> impl Iterator<Item = Chunk> + '_ {
    table.columns.iter().map(move |column| Chunk {
        chunk_type: ChunkType::ColumnDetail,
        table_name: Some(table.name.clone()),
        // `.` cannot appear in either half of a key built from SQL identifiers
        key: format!(
            "col_{}.{}",
            table.name.to_lowercase(),
            column.name.to_lowercase()
        ),
        text: format!(
            "Table: {}\nColumn: {}\nType: {}\nDescription: {}",
            table.name, column.name, column.data_type, column.description
        ),
    })
}

fn relationships_chunk(relationships: &[Relationship]) -> Chunk {
    let mut text = String::from("Database Relationships:\n");
    for rel in relationships {
        text.push_str(&format!(
            "{}.{} -> {}.{} ({})\n",
            rel.from_table, rel.from_column, rel.to_table, rel.to_column, rel.kind
        ));
    }
    Chunk {
        chunk_type: ChunkType::Relationships,
        table_name: None,
        key: "relationships_all".to_string(),
        text,
    }
}

fn table_relationship_chunks(relationships: &[Relationship]) -> Vec<Chunk> {
    // Grouped by first appearance; a self-referencing relationship lands twice.
    let mut grouped: Vec<(&str, Vec<&Relationship>)> = Vec::new();
    for rel in relationships {
        for endpoint in [rel.from_table.as_str(), rel.to_table.as_str()] {
            match grouped.iter_mut().find(|(name, _)| *name == endpoint) {
                Some((_, rels)) => rels.push(rel),
                None => grouped.push((endpoint, vec![rel])),
            }
        }
    }

    grouped
        .into_iter()
        .map(|(table_name, rels)| {
            let mut text = format!("Table: {} - Related Tables:\n", table_name);
            let mut related = BTreeSet::new();
            for rel in rels {
                if rel.from_table == table_name {
                    related.insert(rel.to_table.as_str());
                    text.push_str(&format!(
                        "References: {}.{} via {}\n",
                        rel.to_table, rel.to_column, rel.from_column
                    ));
                } else {
                    related.insert(rel.from_table.as_str());
                    text.push_str(&format!(
                        "Referenced by: {}.{} via {}\n",
                        rel.from_table, rel.from_column, rel.to_column
                    ));
                }
            }
            text.push_str(&format!(
                "All related tables: {}",
                related.into_iter().collect::<Vec<_>>().join(", ")
            ));
            Chunk {
                chunk_type: ChunkType::TableRelationships,
                table_name: Some(table_name.to_string()),
                key: format!("relations_{}", table_name.to_lowercase()),
                text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            description: format!("{} column", name.to_lowercase()),
        }
    }

    fn table(name: &str, columns: Vec<Column>) -> Table {
        Table {
            name: name.to_string(),
            description: format!("{} table", name.to_lowercase()),
            columns,
            identification_fields: None,
            date_fields: None,
        }
    }

    fn rel(from: &str, from_col: &str, to: &str, to_col: &str) -> Relationship {
        Relationship {
            from_table: from.to_string(),
            from_column: from_col.to_string(),
            to_table: to.to_string(),
            to_column: to_col.to_string(),
            kind: "many-to-one".to_string(),
        }
    }

    fn sample_schema() -> SchemaDescription {
        let mut patients = table("PATIENTS", vec![column("ID", "uuid"), column("GENDER", "text")]);
        patients.identification_fields = Some(vec!["ID".into()]);
        patients.date_fields = Some(vec!["BIRTHDATE".into(), "DEATHDATE".into()]);
        SchemaDescription {
            tables: Some(vec![
                patients,
                table("ENCOUNTERS", vec![column("ID", "uuid"), column("PATIENT", "uuid")]),
                table("PROVIDERS", vec![column("ID", "uuid")]),
            ]),
            relationships: vec![
                rel("ENCOUNTERS", "PATIENT", "PATIENTS", "ID"),
                rel("ENCOUNTERS", "PROVIDER", "PROVIDERS", "ID"),
            ],
        }
    }

    #[test]
    fn test_chunk_counts_and_order() {
        let chunks = SchemaChunker::new().chunk(&sample_schema());
        let types: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        use ChunkType::*;
        assert_eq!(
            types,
            vec![
                TableOverview,
                TableColumns,
                ColumnDetail,
                ColumnDetail,
                TableOverview,
                TableColumns,
                ColumnDetail,
                ColumnDetail,
                TableOverview,
                TableColumns,
                Relationships,
                TableRelationships,
                TableRelationships,
                TableRelationships,
            ]
        );
    }

    #[test]
    fn test_overview_text() {
        let chunks = SchemaChunker::new().chunk(&sample_schema());
        assert_eq!(
            chunks[0].text,
            "Table: PATIENTS\nDescription: patients table\nKey Fields: ID\nDate Fields: BIRTHDATE, DEATHDATE"
        );
        assert_eq!(chunks[0].key, "table_patients");
    }

    #[test]
    fn test_columns_and_detail_text() {
        let chunks = SchemaChunker::new().chunk(&sample_schema());
        assert_eq!(
            chunks[1].text,
            "Table: PATIENTS - Columns:\nColumn: ID (uuid) - id column\nColumn: GENDER (text) - gender column\n"
        );
        assert_eq!(chunks[2].key, "col_patients.id");
        assert_eq!(
            chunks[2].text,
            "Table: PATIENTS\nColumn: ID\nType: uuid\nDescription: id column"
        );
    }

    #[test]
    fn test_relationship_texts() {
        let chunks = SchemaChunker::new().chunk(&sample_schema());
        let all = chunks.iter().find(|c| c.key == "relationships_all").unwrap();
        assert_eq!(
            all.text,
            "Database Relationships:\nENCOUNTERS.PATIENT -> PATIENTS.ID (many-to-one)\nENCOUNTERS.PROVIDER -> PROVIDERS.ID (many-to-one)\n"
        );
        assert!(all.table_name.is_none());

        let encounters = chunks.iter().find(|c| c.key == "relations_encounters").unwrap();
        assert_eq!(
            encounters.text,
            "Table: ENCOUNTERS - Related Tables:\nReferences: PATIENTS.ID via PATIENT\nReferences: PROVIDERS.ID via PROVIDER\nAll related tables: PATIENTS, PROVIDERS"
        );

        let patients = chunks.iter().find(|c| c.key == "relations_patients").unwrap();
        assert_eq!(
            patients.text,
            "Table: PATIENTS - Related Tables:\nReferenced by: ENCOUNTERS.PATIENT via ID\nAll related tables: ENCOUNTERS"
        );
    }

    #[test]
    fn test_missing_tables_yields_no_chunks() {
        let schema = SchemaDescription {
            tables: None,
            relationships: vec![rel("A", "B", "C", "D")],
        };
        assert!(SchemaChunker::new().chunk(&schema).is_empty());
    }

    #[test]
    fn test_no_relationships_no_relationship_chunks() {
        let schema = SchemaDescription {
            tables: Some(vec![table("PROVIDERS", vec![column("ID", "uuid")])]),
            relationships: Vec::new(),
        };
        let chunks = SchemaChunker::new().chunk(&schema);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !matches!(
            c.chunk_type,
            ChunkType::Relationships | ChunkType::TableRelationships
        )));
    }

    #[test]
    fn test_dangling_relationship_tolerated() {
        let schema = SchemaDescription {
            tables: Some(vec![table("PROVIDERS", vec![])]),
            relationships: vec![rel("CLAIMS", "PROVIDERID", "PROVIDERS", "ID")],
        };
        let chunks = SchemaChunker::new().chunk(&schema);
        assert!(chunks.iter().any(|c| c.key == "relations_claims"));
    }

    #[test]
    fn test_self_relationship() {
        let schema = SchemaDescription {
            tables: Some(vec![table("ORGS", vec![])]),
            relationships: vec![rel("ORGS", "PARENT", "ORGS", "ID")],
        };
        let chunks = SchemaChunker::new().chunk(&schema);
        let orgs = chunks.iter().find(|c| c.key == "relations_orgs").unwrap();
        assert_eq!(
            orgs.text,
            "Table: ORGS - Related Tables:\nReferences: ORGS.ID via PARENT\nReferences: ORGS.ID via PARENT\nAll related tables: ORGS"
        );
    }

    #[test]
    fn test_custom_important_tables() {
        let chunker = SchemaChunker::with_important_tables(["PROVIDERS"]);
        let chunks = chunker.chunk(&sample_schema());
        let details: Vec<&str> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::ColumnDetail)
            .map(|c| c.key.as_str())
            .collect();
        assert_eq!(details, vec!["col_providers.id"]);
    }

    #[test]
    fn test_chunk_type_round_trip_names() {
        for ty in [
            ChunkType::TableOverview,
            ChunkType::TableColumns,
            ChunkType::ColumnDetail,
            ChunkType::Relationships,
            ChunkType::TableRelationships,
        ] {
            assert_eq!(ChunkType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(ChunkType::parse("bogus"), None);
    }

    #[test]
    fn test_case_variant_names_get_distinct_keys() {
        let schema = SchemaDescription {
            tables: Some(vec![table("PATIENTS", vec![column("Id", "uuid"), column("ID", "uuid")])]),
            relationships: vec![rel("PATIENTS", "ID", "patients", "ID")],
        };
        let keys: Vec<String> = SchemaChunker::new()
            .chunk(&schema)
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "table_patients",
                "columns_patients",
                "col_patients.id",
                "col_patients.id_2",
                "relationships_all",
                "relations_patients",
                "relations_patients_2",
            ]
        );
    }

    #[test]
    fn test_suffix_skips_keys_already_taken() {
        let schema = SchemaDescription {
            tables: Some(vec![
                table("ORDERS", vec![]),
                table("ORDERS_2", vec![]),
                table("orders", vec![]),
            ]),
            relationships: Vec::new(),
        };
        let keys: Vec<String> = SchemaChunker::new()
            .chunk(&schema)
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "table_orders",
                "columns_orders",
                "table_orders_2",
                "columns_orders_2",
                "table_orders_3",
                "columns_orders_3",
            ]
        );
    }

    fn arb_schema() -> impl Strategy<Value = SchemaDescription> {
        let names = prop::collection::btree_set("[A-Za-z][A-Za-z_]{0,7}", 1..6);
        (names, any::<bool>())
            .prop_flat_map(|(names, include_important)| {
                let mut names: Vec<String> = names.into_iter().collect();
                if include_important && !names.iter().any(|n| n == "PATIENTS") {
                    names[0] = "PATIENTS".to_string();
                }
                let count = names.len();
                let columns = prop::collection::vec(
                    prop::collection::btree_set("[A-Za-z]{1,6}", 0..5),
                    count,
                );
                let rels = prop::collection::vec((0..count, 0..count), 0..6);
                (Just(names), columns, rels)
            })
            .prop_map(|(names, columns, rels)| {
                let tables: Vec<Table> = names
                    .iter()
                    .zip(columns)
                    .map(|(name, cols)| {
                        table(name, cols.iter().map(|c| column(c, "text")).collect())
                    })
                    .collect();
                let relationships = rels
                    .into_iter()
                    .map(|(a, b)| rel(&names[a], "REF", &names[b], "ID"))
                    .collect();
                SchemaDescription {
                    tables: Some(tables),
                    relationships,
                }
            })
    }

    proptest! {
        #[test]
        fn prop_chunk_counts(schema in arb_schema()) {
            let chunks = SchemaChunker::new().chunk(&schema);
            let tables = schema.tables();

            let count = |ty: ChunkType| chunks.iter().filter(|c| c.chunk_type == ty).count();
            prop_assert_eq!(count(ChunkType::TableOverview), tables.len());
            prop_assert_eq!(count(ChunkType::TableColumns), tables.len());

            let expected_details: usize = tables
                .iter()
                .filter(|t| IMPORTANT_TABLES.contains(&t.name.as_str()))
                .map(|t| t.columns.len())
                .sum();
            prop_assert_eq!(count(ChunkType::ColumnDetail), expected_details);

            let expected_rel = usize::from(!schema.relationships.is_empty());
            prop_assert_eq!(count(ChunkType::Relationships), expected_rel);

            let endpoints: HashSet<&str> = schema
                .relationships
                .iter()
                .flat_map(|r| [r.from_table.as_str(), r.to_table.as_str()])
                .collect();
            prop_assert_eq!(count(ChunkType::TableRelationships), endpoints.len());
        }

        #[test]
        fn prop_chunk_keys_unique(schema in arb_schema()) {
            let chunks = SchemaChunker::new().chunk(&schema);
            let keys: HashSet<&str> = chunks.iter().map(|c| c.key.as_str()).collect();
            prop_assert_eq!(keys.len(), chunks.len());
        }

        #[test]
        fn prop_chunking_is_deterministic(schema in arb_schema()) {
            let chunker = SchemaChunker::new();
            prop_assert_eq!(chunker.chunk(&schema), chunker.chunk(&schema));
        }
    }
}
