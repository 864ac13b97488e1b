use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_details")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub payment_type_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment_type::Entity",
        from = "Column::PaymentTypeId",
        to = "super::payment_type::Column::Id"
    )]
    PaymentType,
}

impl Related<super::payment_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentType.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
