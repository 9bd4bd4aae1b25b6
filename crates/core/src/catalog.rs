use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::product::{Product, ProductId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Boundary to the product catalog store. The shape is assumed stable; the
/// backing implementation is out of scope for the orchestrator.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn list_products(&self, tenant_id: &str) -> Result<Vec<Product>, CatalogError>;

    async fn find(&self, tenant_id: &str, product_id: &ProductId) -> Result<Option<Product>, CatalogError> {
        let products = self.list_products(tenant_id).await?;
        Ok(products.into_iter().find(|product| &product.id == product_id))
    }
}

/// In-memory catalog with per-tenant assortments and a shared default.
#[derive(Default)]
pub struct InMemoryCatalog {
    tenants: HashMap<String, Vec<Product>>,
    default: Vec<Product>,
}

impl InMemoryCatalog {
    pub fn new(default: Vec<Product>) -> Self {
        Self { tenants: HashMap::new(), default }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, products: Vec<Product>) -> Self {
        self.tenants.insert(tenant_id.into(), products);
        self
    }

    /// Deterministic demo assortment used by tests and the doctor command.
    pub fn demo() -> Self {
        Self::new(demo_products())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn list_products(&self, tenant_id: &str) -> Result<Vec<Product>, CatalogError> {
        Ok(self.tenants.get(tenant_id).unwrap_or(&self.default).clone())
    }
}

fn product(
    id: &str,
    name: &str,
    price_cents: i64,
    category: &str,
    tags: &[&str],
    colors: &[&str],
) -> Product {
    Product {
        id: ProductId(id.to_string()),
        name: name.to_string(),
        price: Decimal::new(price_cents, 2),
        currency: "USD".to_string(),
        category: category.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        colors: colors.iter().map(|color| color.to_string()).collect(),
    }
}

pub fn demo_products() -> Vec<Product> {
    vec![
        product("sku-aero-90", "Aero Glide 90", 8999, "sneakers", &["running", "lightweight"], &["white", "blue"]),
        product("sku-aero-120", "Aero Glide 120", 12_999, "sneakers", &["running", "cushioned"], &["black"]),
        product("sku-court-low", "Court Classic Low", 7499, "sneakers", &["casual", "leather"], &["white"]),
        product("sku-trail-x", "Trail Ranger X", 11_499, "sneakers", &["trail", "waterproof"], &["green", "black"]),
        product("sku-tee-basic", "Everyday Tee", 1999, "tops", &["cotton", "casual"], &["white", "grey"]),
        product("sku-hoodie-hw", "Heavyweight Hoodie", 6499, "tops", &["fleece", "winter"], &["navy"]),
        product("sku-jogger", "Flex Jogger", 5499, "bottoms", &["stretch", "casual"], &["black", "olive"]),
        product("sku-denim-sl", "Slim Denim", 7999, "bottoms", &["denim"], &["indigo"]),
        product("sku-cap-run", "Featherlight Cap", 2499, "accessories", &["running"], &["white"]),
        product("sku-sock-3p", "Cushion Socks 3-Pack", 1599, "accessories", &["running", "cotton"], &["white"]),
    ]
}
