use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Seller subscription plan. A limit of -1 means unlimited.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,

    #[sea_orm(unique)]
    pub slug: String,

    pub price: Decimal,
    pub billing_period: String,
    pub max_products: i64,
    pub max_photos_per_product: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_products < 0
    }

    pub fn allows_photo_count(&self, submitted: usize) -> bool {
        self.max_photos_per_product < 0 || (submitted as i64) <= self.max_photos_per_product
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::seller::Entity")]
    Sellers,
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscriptions,
}

impl Related<super::seller::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sellers.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
