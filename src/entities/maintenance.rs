use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A maintenance actually performed, matched to its plan item.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "maintenances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub vehicle_id: i32,
    pub plan_item_id: i32,
    pub km: i32,
    pub date: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::maintenance_plan_item::Entity",
        from = "Column::PlanItemId",
        to = "super::maintenance_plan_item::Column::Id"
    )]
    PlanItem,
}

impl Related<super::maintenance_plan_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PlanItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
