use crate::entities::{plan, product, seller};
use crate::errors::ServiceError;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Enforces the per-plan caps on active products and photos per product.
#[derive(Clone)]
pub struct QuotaService {
    db: Arc<DatabaseConnection>,
}

impl QuotaService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fails with `QuotaExceeded` when the seller's plan does not allow one
    /// more active product. A negative plan limit means unlimited.
    #[instrument(skip(self))]
    pub async fn ensure_can_create_product(&self, seller_id: &str) -> Result<(), ServiceError> {
        let plan_row = self.plan_for_seller(seller_id).await?;

        if plan_row.is_unlimited() {
            return Ok(());
        }

        let used = product::Entity::find()
            .filter(product::Column::SellerId.eq(seller_id))
            .filter(product::Column::IsActive.eq(true))
            .count(&*self.db)
            .await? as i64;

        debug!(
            seller_id = %seller_id,
            used,
            limit = plan_row.max_products,
            "Product quota check"
        );

        if used >= plan_row.max_products {
            return Err(ServiceError::QuotaExceeded {
                used,
                limit: plan_row.max_products,
            });
        }

        Ok(())
    }

    /// Pure comparison against the plan's per-product photo cap; the only DB
    /// access is the plan lookup.
    #[instrument(skip(self))]
    pub async fn ensure_photo_count(
        &self,
        seller_id: &str,
        submitted: usize,
    ) -> Result<(), ServiceError> {
        let plan_row = self.plan_for_seller(seller_id).await?;

        if !plan_row.allows_photo_count(submitted) {
            return Err(ServiceError::QuotaExceeded {
                used: submitted as i64,
                limit: plan_row.max_photos_per_product,
            });
        }

        Ok(())
    }

    async fn plan_for_seller(&self, seller_id: &str) -> Result<plan::Model, ServiceError> {
        let seller_row = seller::Entity::find_by_id(seller_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Seller {} not found", seller_id)))?;

        plan::Entity::find_by_id(&seller_row.plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "seller {} references missing plan {}",
                    seller_id, seller_row.plan_id
                ))
            })
    }
}
