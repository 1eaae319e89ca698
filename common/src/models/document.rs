//! Document models and JSON/BSON conversion.
//!
//! Documents cross the API as JSON objects in MongoDB relaxed extended JSON,
//! so an ObjectId `_id` reads as `{"$oid": "..."}`.

use mongodb::bson::{oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

/// Identifier of a stored document.
///
/// Path ids that look like an ObjectId (24 hex digits) address ObjectId keys;
/// anything else addresses a string key.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentId(Bson);

impl DocumentId {
    pub fn parse(raw: &str) -> AppResult<Self> {
        if raw.is_empty() {
            return Err(AppError::Validation("document id must not be empty".into()));
        }
        Ok(match ObjectId::parse_str(raw) {
            Ok(oid) => Self(Bson::ObjectId(oid)),
            Err(_) => Self(Bson::String(raw.to_string())),
        })
    }

    /// Accepts a caller-supplied `_id`.
    ///
    /// Only ObjectIds and strings that do not read as an ObjectId are taken,
    /// so every stored id can be addressed again through [`DocumentId::parse`].
    pub fn from_caller(value: Bson) -> AppResult<Self> {
        let addressable = match &value {
            Bson::ObjectId(_) => true,
            Bson::String(s) => !s.is_empty() && ObjectId::parse_str(s).is_err(),
            _ => false,
        };
        if !addressable {
            return Err(AppError::Validation(
                "_id must be an ObjectId ({\"$oid\": ...}) or a non-empty string that is not 24 hex digits"
                    .into(),
            ));
        }
        Ok(Self(value))
    }

    /// A freshly generated ObjectId.
    pub fn generate() -> Self {
        Self(Bson::ObjectId(ObjectId::new()))
    }

    pub fn from_bson(value: Bson) -> Self {
        Self(value)
    }

    pub fn as_bson(&self) -> &Bson {
        &self.0
    }

    pub fn into_bson(self) -> Bson {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Bson::ObjectId(oid) => f.write_str(&oid.to_hex()),
            Bson::String(s) => f.write_str(s),
            other => write!(f, "{}", other.clone().into_relaxed_extjson()),
        }
    }
}

/// A stored document as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentView {
    /// Document identifier in path form.
    pub id: String,
    /// Full document, `_id` included.
    #[schema(value_type = Object)]
    pub document: serde_json::Value,
}

impl DocumentView {
    pub fn from_document(document: Document) -> Self {
        let id = document
            .get("_id")
            .cloned()
            .map(|id| DocumentId::from_bson(id).to_string())
            .unwrap_or_default();
        Self {
            id,
            document: document_to_json(document),
        }
    }
}

/// Result of an upsert-merge.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOutcome {
    pub id: String,
    /// True when no document existed and one was created.
    pub created: bool,
}

/// Result of a delete.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteOutcome {
    pub id: String,
    /// False when there was nothing to delete.
    pub deleted: bool,
}

/// Converts a JSON body into a BSON document. Only JSON objects are accepted.
pub fn json_to_document(value: serde_json::Value) -> AppResult<Document> {
    if !value.is_object() {
        return Err(AppError::Validation("document must be a JSON object".into()));
    }
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(AppError::Validation("document must be a JSON object".into())),
        Err(e) => Err(AppError::Validation(format!("invalid document: {e}"))),
    }
}

pub fn document_to_json(document: Document) -> serde_json::Value {
    Bson::Document(document).into_relaxed_extjson()
}
