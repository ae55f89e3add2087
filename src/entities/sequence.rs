use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Serialized document-number counter. Rows are keyed like
/// `movement:MOV-OUT:2025` or `lot:202503` and bumped with a single atomic
/// UPDATE inside the mutating transaction, so concurrent writers serialize
/// on the row lock instead of racing a read-then-increment.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sequences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
