//! Catalog and storage configuration shared by the sink and the watermark
//! store: both are Iceberg tables living under the same Glue catalog and S3
//! bucket, just at different paths.

use serde::{Deserialize, Serialize};

/// Where Iceberg tables for this connection live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergCatalogConfig {
    pub catalog_name: String,
    pub warehouse_bucket: String,
    pub aws_region: String,
    /// Identifies this CDC connection; used both as the first path segment
    /// under the warehouse bucket and as part of the watermark row's key.
    pub connection_name: String,
}

impl IcebergCatalogConfig {
    /// `s3://{bucket}/{connection_name}/{schema}/{table}/`
    pub fn table_location(&self, schema: &str, table: &str) -> String {
        format!(
            "s3://{}/{}/{}/{}/",
            self.warehouse_bucket, self.connection_name, schema, table
        )
    }

    /// `s3://{bucket}/{connection_name}/watermarks/` — the `cdc_metadata.watermarks`
    /// table is named the same in every deployment's catalog, but each
    /// connection keeps its own copy at its own connection-scoped prefix, so
    /// one connection's retention/compaction never touches another's.
    pub fn watermark_table_location(&self) -> String {
        format!(
            "s3://{}/{}/watermarks/",
            self.warehouse_bucket, self.connection_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_location_is_nested_by_connection_schema_table() {
        let config = IcebergCatalogConfig {
            catalog_name: "glue".to_string(),
            warehouse_bucket: "lake".to_string(),
            aws_region: "us-east-1".to_string(),
            connection_name: "orders-db".to_string(),
        };

        assert_eq!(
            config.table_location("app", "orders"),
            "s3://lake/orders-db/app/orders/"
        );
    }

    #[test]
    fn watermark_table_location_is_scoped_to_the_connection() {
        let config = IcebergCatalogConfig {
            catalog_name: "glue".to_string(),
            warehouse_bucket: "lake".to_string(),
            aws_region: "us-east-1".to_string(),
            connection_name: "orders-db".to_string(),
        };

        assert_eq!(
            config.watermark_table_location(),
            "s3://lake/orders-db/watermarks/"
        );
    }
}
