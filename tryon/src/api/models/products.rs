use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::{Catalog, Category, Product};

/// Product as listed by the storefront API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    /// Price in KRW
    pub price: u64,
    /// Garment image URL (absolute or `static/<file>`, depending on configuration)
    pub image: String,
    pub category: Category,
}

impl ProductResponse {
    pub fn from_product(catalog: &Catalog, product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            image: catalog.image_ref(product),
            category: product.category,
        }
    }
}
