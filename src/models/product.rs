//! Product model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Product. Display metadata only; the engine references products by id from
/// plan entitlement sets and selections.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub product_type: Option<String>,
    pub script_ref: Option<String>,
    pub output_type: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub name: String,
    pub description: Option<String>,
    pub product_type: Option<String>,
    pub script_ref: Option<String>,
    pub output_type: Option<String>,
}
