//! Ingested document metadata entity
//!
//! One row per ingested chunk; `vector_id` points at the corresponding
//! point in the vector index and is unique, which makes re-ingestion of
//! unchanged content a no-op on this table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub title: String,

    pub chapter_id: String,

    #[sea_orm(nullable)]
    pub url: Option<String>,

    #[sea_orm(unique)]
    pub vector_id: Uuid,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
