//! JSON schema documents.
//!
//! # Responsibility
//! - Deserialize kind/attribute/index declarations with serde.
//! - Feed them into `SchemaBuilder`, which owns every validation rule.

use crate::model::value::{Value, ValueType};
use crate::schema::kind::{AttrDef, Cardinality, DeletePolicy};
use crate::schema::registry::{IndexDef, Schema, SchemaBuilder};
use crate::schema::{SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level schema document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    #[serde(default)]
    pub kinds: Vec<KindDocument>,
    #[serde(default)]
    pub indexes: Vec<IndexDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindDocument {
    /// Full kind path, e.g. `pim/Event`.
    pub path: String,
    #[serde(default)]
    pub super_kinds: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttrDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttrDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub target_kind: Option<String>,
    #[serde(default)]
    pub other_name: Option<String>,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDocument {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Orders members by this attribute of `kind`.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub descending: bool,
}

fn default_recursive() -> bool {
    true
}

impl From<AttrDocument> for AttrDef {
    fn from(document: AttrDocument) -> Self {
        Self {
            name: document.name,
            value_type: document.value_type,
            cardinality: document.cardinality,
            required: document.required,
            default: document.default,
            target_kind: document.target_kind,
            other_name: document.other_name,
            delete_policy: document.delete_policy,
        }
    }
}

impl From<IndexDocument> for IndexDef {
    fn from(document: IndexDocument) -> Self {
        let mut index = match document.kind {
            Some(kind) if document.recursive => IndexDef::for_kind(document.name, kind),
            Some(kind) => IndexDef::for_kind(document.name, kind).exact(),
            None => IndexDef::manual(document.name),
        };
        index.attribute = document.attribute;
        index.descending = document.descending;
        index
    }
}

impl SchemaDocument {
    /// Parses a JSON schema document.
    ///
    /// # Errors
    /// - `SchemaError::InvalidDocument` for malformed JSON or unknown fields.
    pub fn from_json(text: &str) -> SchemaResult<Self> {
        serde_json::from_str(text).map_err(|err| SchemaError::InvalidDocument(err.to_string()))
    }

    /// Reads and parses a JSON schema file.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SchemaError::InvalidDocument(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Adds this document's declarations on top of `builder`.
    pub fn apply_to(self, mut builder: SchemaBuilder) -> SchemaBuilder {
        for kind in self.kinds {
            let super_kinds: Vec<&str> = kind.super_kinds.iter().map(String::as_str).collect();
            let attributes = kind.attributes.into_iter().map(AttrDef::from).collect();
            builder = builder.kind(&kind.path, &super_kinds, attributes);
        }
        for index in self.indexes {
            builder = builder.index(index.into());
        }
        builder
    }

    /// Builds a schema holding the core kinds plus this document.
    pub fn build(self) -> SchemaResult<Schema> {
        self.apply_to(SchemaBuilder::new()).build()
    }
}

#[cfg(test)]
mod tests {
    use super::SchemaDocument;
    use crate::model::value::Value;
    use crate::schema::{Cardinality, SchemaError};

    const DOCUMENT: &str = r#"{
        "kinds": [
            {
                "path": "crm/Company",
                "attributes": [
                    { "name": "label", "type": "string", "required": true },
                    { "name": "size", "type": "integer", "default": { "type": "integer", "value": 1 } },
                    { "name": "staff", "type": "ref", "cardinality": "list",
                      "target_kind": "crm/Person", "other_name": "employer" }
                ]
            },
            {
                "path": "crm/Person",
                "attributes": [
                    { "name": "employer", "type": "ref",
                      "target_kind": "crm/Company", "other_name": "staff" }
                ]
            }
        ],
        "indexes": [
            { "name": "companies", "kind": "crm/Company" },
            { "name": "companies_by_size", "kind": "crm/Company",
              "attribute": "size", "descending": true }
        ]
    }"#;

    #[test]
    fn json_document_builds_schema() {
        let schema = SchemaDocument::from_json(DOCUMENT).unwrap().build().unwrap();
        let company = schema.kind_by_path("crm/Company").unwrap();

        assert_eq!(
            company.get_attr_def("size").unwrap().default,
            Some(Value::Integer(1))
        );
        assert_eq!(
            company.get_attr_def("staff").unwrap().cardinality,
            Cardinality::List
        );
        let index = schema.index("companies").unwrap();
        assert!(index.recursive);
        assert_eq!(index.kind_id(), Some(company.id()));

        let by_size = schema.index("companies_by_size").unwrap();
        assert_eq!(by_size.attribute.as_deref(), Some("size"));
        assert!(by_size.descending);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = SchemaDocument::from_json(r#"{ "kinds": [], "views": [] }"#).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDocument(_)));
    }
}
