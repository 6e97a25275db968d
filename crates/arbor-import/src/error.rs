use arbor_sources::SourceError;
use arbor_storage::StoreError;
use thiserror::Error;

fn joined(items: &[String]) -> String {
    items.join(", ")
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Configuration(String),
    #[error("The following required files could not be accessed: {}", joined(.missing))]
    SourceUnavailable { missing: Vec<String> },
    #[error("{}", .problems.join("\n"))]
    SchemaMismatch { problems: Vec<String> },
    #[error(
        "The following tables are not empty: {}. The import requires empty target tables.",
        joined(.tables)
    )]
    NonEmptyTarget { tables: Vec<String> },
    #[error("{entity} {id} has an unreadable boundary: {reason}")]
    Geometry {
        entity: &'static str,
        id: i64,
        reason: String,
    },
    #[error("{referenced_by} references {entity} {id}, which was not imported")]
    UnresolvedReference {
        entity: &'static str,
        id: i64,
        referenced_by: String,
    },
    #[error("cannot create sentinel {entity} {id}: a row named '{found}' already holds that id")]
    SentinelConflict {
        entity: &'static str,
        id: i64,
        found: String,
    },
    #[error("record hook failed: {0}")]
    Hook(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl ImportError {
    pub fn missing_anchor(name: &str) -> Self {
        ImportError::Configuration(format!(
            "Municipality '{name}' does not exist. Run the migrations first."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_messages_list_every_item() {
        let err = ImportError::SourceUnavailable {
            missing: vec!["csv/sites.csv".into(), "csv/climate.csv".into()],
        };
        assert_eq!(
            err.to_string(),
            "The following required files could not be accessed: csv/sites.csv, csv/climate.csv"
        );

        let err = ImportError::NonEmptyTarget {
            tables: vec!["Family".into()],
        };
        assert_eq!(
            err.to_string(),
            "The following tables are not empty: Family. The import requires empty target tables."
        );

        assert_eq!(
            ImportError::missing_anchor("Ibagué").to_string(),
            "Municipality 'Ibagué' does not exist. Run the migrations first."
        );
    }
}
