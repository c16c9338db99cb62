//! Connection pooler (Supavisor) configuration models.
//!
//! The platform returns one record per database of a project. Only the
//! `database_type` discriminant is interpreted here; every other attribute is
//! kept verbatim so a record serializes back exactly as it was received.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::openapi::schema::{AdditionalProperties, ObjectBuilder, Schema, Type};
use utoipa::openapi::RefOr;

/// Kind of database a pooling configuration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabaseType {
    /// The project's main database.
    Primary,
    /// A read replica of the main database.
    ReadReplica,
    /// Any discriminant this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::Primary => write!(f, "PRIMARY"),
            DatabaseType::ReadReplica => write!(f, "READ_REPLICA"),
            DatabaseType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A single pooling configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingConfiguration {
    /// Which database this record configures.
    pub database_type: DatabaseType,
    /// All remaining attributes, in wire order.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl PoolingConfiguration {
    /// Whether this record configures the primary database.
    pub fn is_primary(&self) -> bool {
        self.database_type == DatabaseType::Primary
    }

    /// Raw attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn pool_mode(&self) -> Option<&str> {
        self.str_attr("pool_mode")
    }

    pub fn default_pool_size(&self) -> Option<u64> {
        self.u64_attr("default_pool_size")
    }

    pub fn max_client_conn(&self) -> Option<u64> {
        self.u64_attr("max_client_conn")
    }

    pub fn db_host(&self) -> Option<&str> {
        self.str_attr("db_host")
    }

    pub fn db_port(&self) -> Option<u64> {
        self.u64_attr("db_port")
    }

    pub fn db_name(&self) -> Option<&str> {
        self.str_attr("db_name")
    }

    pub fn db_user(&self) -> Option<&str> {
        self.str_attr("db_user")
    }

    /// Pooler connection string; older payloads use the camelCase key.
    pub fn connection_string(&self) -> Option<&str> {
        self.str_attr("connection_string")
            .or_else(|| self.str_attr("connectionString"))
    }

    fn str_attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    fn u64_attr(&self, name: &str) -> Option<u64> {
        self.attributes.get(name).and_then(Value::as_u64)
    }
}

impl utoipa::PartialSchema for PoolingConfiguration {
    fn schema() -> RefOr<Schema> {
        let database_type = ObjectBuilder::new()
            .schema_type(Type::String)
            .enum_values(Some(["PRIMARY", "READ_REPLICA"]))
            .description(Some("Database the configuration applies to"));

        RefOr::T(Schema::Object(
            ObjectBuilder::new()
                .property("database_type", database_type)
                .required("database_type")
                .additional_properties(Some(AdditionalProperties::FreeForm(true)))
                .build(),
        ))
    }
}

impl utoipa::ToSchema for PoolingConfiguration {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("PoolingConfiguration")
    }
}
