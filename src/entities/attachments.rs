use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One attribute of a record (attachment data or any other string column),
/// keyed by `(record_type, record_id, attribute)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub record_type: String,
    pub record_id: String,
    pub attribute: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub data: Option<String>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
