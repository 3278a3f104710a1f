//! Inbound request payloads for the query endpoints.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 500))]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExpandRequest {
    #[validate(length(min = 1, max = 200))]
    pub entity_id: String,
}
