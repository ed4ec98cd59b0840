//! Declarative record of a foreign key that must be carried through a
//! partitioning migration, plus its validator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogClient;
use crate::error::{Error, FieldError};

/// Postgres identifier length limit.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// A planned foreign key between a partitioned table and a target table.
///
/// Stored as data (not applied DDL) so a migration can declare the keys it
/// intends to carry over and apply them after the cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedForeignKey {
    /// Referencing table.
    pub from_table: String,
    /// Referencing column on `from_table`.
    pub from_column: String,
    /// Referenced table.
    pub to_table: String,
    /// Referenced column on `to_table`.
    pub to_column: String,
}

impl PartitionedForeignKey {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }
}

/// Checks a [`PartitionedForeignKey`] against identifier rules and the live
/// catalog before any DDL is derived from it.
pub struct Validator {
    catalog: Arc<dyn CatalogClient>,
}

impl Validator {
    pub fn new(catalog: Arc<dyn CatalogClient>) -> Self {
        Self { catalog }
    }

    /// All validation failures for the record; empty means valid.
    pub async fn validate(&self, key: &PartitionedForeignKey) -> Result<Vec<FieldError>, Error> {
        let mut errors = Vec::new();

        check_identifier("from_table", &key.from_table, &mut errors);
        check_identifier("from_column", &key.from_column, &mut errors);
        check_identifier("to_table", &key.to_table, &mut errors);
        check_identifier("to_column", &key.to_column, &mut errors);
        if !errors.is_empty() {
            return Ok(errors);
        }

        self.check_column("from_table", &key.from_table, "from_column", &key.from_column, &mut errors)
            .await?;
        self.check_column("to_table", &key.to_table, "to_column", &key.to_column, &mut errors)
            .await?;

        Ok(errors)
    }

    async fn check_column(
        &self,
        table_field: &'static str,
        table: &str,
        column_field: &'static str,
        column: &str,
        errors: &mut Vec<FieldError>,
    ) -> Result<(), Error> {
        if !self.catalog.table_exists(table).await? {
            errors.push(FieldError {
                field: table_field,
                message: format!("table {} does not exist", table),
            });
            return Ok(());
        }
        if self.catalog.column(table, column).await?.is_none() {
            errors.push(FieldError {
                field: column_field,
                message: format!("column {} does not exist on {}", column, table),
            });
        }
        Ok(())
    }
}

fn check_identifier(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError {
            field,
            message: "can not be blank".to_string(),
        });
    } else if value.len() > MAX_IDENTIFIER_LENGTH {
        errors.push(FieldError {
            field,
            message: format!("is longer than {} characters", MAX_IDENTIFIER_LENGTH),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::testing::FakeCatalog;

    fn catalog() -> Arc<FakeCatalog> {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.add_table(
            "events",
            vec![ColumnDef::new("id", "bigint"), ColumnDef::new("user_id", "bigint")],
            &["id"],
        );
        catalog.add_table("users", vec![ColumnDef::new("id", "bigint")], &["id"]);
        catalog
    }

    #[tokio::test]
    async fn test_valid_key_has_no_errors() {
        let validator = Validator::new(catalog());
        let key = PartitionedForeignKey::new("events", "user_id", "users", "id");

        assert!(validator.validate(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_fields_are_rejected() {
        let validator = Validator::new(catalog());
        let key = PartitionedForeignKey::new("", "user_id", "users", "");

        let errors = validator.validate(&key).await.unwrap();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["from_table", "to_column"]);
    }

    #[tokio::test]
    async fn test_overlong_identifier_is_rejected() {
        let validator = Validator::new(catalog());
        let key = PartitionedForeignKey::new("a".repeat(64), "user_id", "users", "id");

        let errors = validator.validate(&key).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "from_table");
        assert!(errors[0].message.contains("63"));
    }

    #[tokio::test]
    async fn test_missing_table_and_column_are_reported() {
        let validator = Validator::new(catalog());
        let key = PartitionedForeignKey::new("missing", "user_id", "users", "uuid");

        let errors = validator.validate(&key).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "from_table");
        assert_eq!(errors[1].field, "to_column");
    }

    #[test]
    fn test_round_trips_through_json() {
        let key = PartitionedForeignKey::new("events", "user_id", "users", "id");
        let json = serde_json::to_string(&key).unwrap();
        let parsed: PartitionedForeignKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
