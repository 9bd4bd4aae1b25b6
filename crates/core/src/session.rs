use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::domain::order::Order;
use crate::domain::product::{Product, ProductId};
use crate::errors::SessionError;

/// Running summary of what a session has engaged with. Rendered into a short
/// textual hint that enriches later prompts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub category_counts: BTreeMap<String, u32>,
    pub tag_counts: BTreeMap<String, u32>,
}

impl PreferenceProfile {
    pub fn fold(&mut self, products: &[Product]) {
        for product in products {
            *self.category_counts.entry(product.category.clone()).or_insert(0) += 1;
            for tag in &product.tags {
                *self.tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category_counts.is_empty() && self.tag_counts.is_empty()
    }

    /// Top categories and tags, most-seen first, as a prompt-ready hint.
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut categories: Vec<_> = self.category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let mut tags: Vec<_> = self.tag_counts.iter().collect();
        tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let categories = categories.iter().take(3).map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        let tags = tags.iter().take(3).map(|(name, _)| name.as_str()).collect::<Vec<_>>();

        let mut parts = Vec::new();
        if !categories.is_empty() {
            parts.push(format!("categories: {}", categories.join(", ")));
        }
        if !tags.is_empty() {
            parts.push(format!("tags: {}", tags.join(", ")));
        }
        Some(parts.join("; "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub tenant_id: String,
    pub session_id: String,
    pub cart: Cart,
    pub last_products: Vec<Product>,
    pub last_matched_ids: Vec<ProductId>,
    pub preference_profile: PreferenceProfile,
    pub orders: Vec<Order>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    fn new(tenant_id: &str, session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.to_string(),
            session_id: session_id.to_string(),
            cart: Cart::default(),
            last_products: Vec::new(),
            last_matched_ids: Vec::new(),
            preference_profile: PreferenceProfile::default(),
            orders: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SessionKey {
    tenant_id: String,
    session_id: String,
}

/// Keyed, lock-guarded session state. Every mutation runs as one
/// read-modify-write critical section under the store lock; contexts are
/// created lazily on first reference and never evicted here (a host that
/// wants TTL sweeping drives `purge` itself).
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<SessionKey, SessionContext>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_context<T>(
        &self,
        tenant_id: &str,
        session_id: &str,
        mutate: impl FnOnce(&mut SessionContext) -> T,
    ) -> T {
        let mut sessions = match self.inner.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = SessionKey { tenant_id: tenant_id.to_string(), session_id: session_id.to_string() };
        let context =
            sessions.entry(key).or_insert_with(|| SessionContext::new(tenant_id, session_id));
        let result = mutate(context);
        context.updated_at = Utc::now();
        result
    }

    /// Point-in-time copy of the session, created empty on first access.
    pub fn snapshot(&self, tenant_id: &str, session_id: &str) -> SessionContext {
        self.with_context(tenant_id, session_id, |context| context.clone())
    }

    /// Merge the latest result set without clobbering the cart.
    pub fn save_results(
        &self,
        tenant_id: &str,
        session_id: &str,
        products: Vec<Product>,
        matched_ids: Vec<ProductId>,
    ) {
        self.with_context(tenant_id, session_id, |context| {
            if !products.is_empty() {
                context.last_products = products;
            }
            if !matched_ids.is_empty() {
                context.last_matched_ids = matched_ids;
            }
        });
    }

    pub fn update_profile(&self, tenant_id: &str, session_id: &str, products: &[Product]) {
        self.with_context(tenant_id, session_id, |context| {
            context.preference_profile.fold(products);
        });
    }

    pub fn add_to_cart(
        &self,
        tenant_id: &str,
        session_id: &str,
        product: &Product,
        quantity: u32,
    ) -> Result<Cart, SessionError> {
        self.with_context(tenant_id, session_id, |context| {
            context.cart.add(product, quantity)?;
            Ok(context.cart.clone())
        })
    }

    /// Add several products as one unit: either every line lands or the cart
    /// is left exactly as it was.
    pub fn add_many(
        &self,
        tenant_id: &str,
        session_id: &str,
        items: &[(Product, u32)],
    ) -> Result<Cart, SessionError> {
        self.with_context(tenant_id, session_id, |context| {
            let mut staged = context.cart.clone();
            for (product, quantity) in items {
                staged.add(product, *quantity)?;
            }
            context.cart = staged;
            Ok(context.cart.clone())
        })
    }

    pub fn remove_from_cart(
        &self,
        tenant_id: &str,
        session_id: &str,
        product_id: &ProductId,
    ) -> Result<Cart, SessionError> {
        self.with_context(tenant_id, session_id, |context| {
            context.cart.remove(product_id)?;
            Ok(context.cart.clone())
        })
    }

    /// Convert the cart into a pending order. The order is recorded first and
    /// the cart cleared after, all inside one critical section.
    pub fn checkout(&self, tenant_id: &str, session_id: &str) -> Result<Order, SessionError> {
        self.with_context(tenant_id, session_id, |context| {
            let order = Order::from_cart(&context.cart)?;
            context.orders.push(order.clone());
            context.cart.clear();
            Ok(order)
        })
    }

    pub fn orders(&self, tenant_id: &str, session_id: &str) -> Vec<Order> {
        self.with_context(tenant_id, session_id, |context| context.orders.clone())
    }

    pub fn find_order(
        &self,
        tenant_id: &str,
        session_id: &str,
        order_id: &str,
    ) -> Result<Order, SessionError> {
        self.with_context(tenant_id, session_id, |context| {
            context
                .orders
                .iter()
                .find(|order| order.id.0 == order_id)
                .cloned()
                .ok_or_else(|| SessionError::OrderNotFound { order_id: order_id.to_string() })
        })
    }

    pub fn purge(&self, tenant_id: &str, session_id: &str) -> bool {
        let mut sessions = match self.inner.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = SessionKey { tenant_id: tenant_id.to_string(), session_id: session_id.to_string() };
        sessions.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::product::{Product, ProductId};
    use crate::errors::SessionError;

    use super::SessionStore;

    fn product(id: &str, price_cents: i64, category: &str, tags: &[&str]) -> Product {
        Product {
            id: ProductId(id.to_string()),
            name: format!("Product {id}"),
            price: Decimal::new(price_cents, 2),
            currency: "USD".to_string(),
            category: category.to_string(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            colors: vec![],
        }
    }

    #[test]
    fn first_access_creates_empty_context() {
        let store = SessionStore::new();
        let context = store.snapshot("acme", "sess-1");

        assert!(context.cart.is_empty());
        assert!(context.last_products.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_results_never_clobbers_cart() {
        let store = SessionStore::new();
        store.add_to_cart("acme", "sess-1", &product("sku-1", 5000, "shoes", &[]), 2).expect("add");

        store.save_results(
            "acme",
            "sess-1",
            vec![product("sku-2", 1000, "tops", &[])],
            vec![ProductId("sku-2".to_string())],
        );

        let context = store.snapshot("acme", "sess-1");
        assert_eq!(context.cart.lines.len(), 1);
        assert_eq!(context.last_products.len(), 1);
        assert_eq!(context.last_matched_ids.len(), 1);
    }

    #[test]
    fn checkout_records_order_then_clears_cart() {
        let store = SessionStore::new();
        store.add_to_cart("acme", "sess-1", &product("sku-1", 5000, "shoes", &[]), 2).expect("add");
        store.add_to_cart("acme", "sess-1", &product("sku-2", 2500, "tops", &[]), 2).expect("add");

        let order = store.checkout("acme", "sess-1").expect("checkout");
        assert_eq!(order.total_amount, Decimal::new(15_000, 2));

        let context = store.snapshot("acme", "sess-1");
        assert!(context.cart.is_empty());
        assert_eq!(context.orders.len(), 1);

        let found = store.find_order("acme", "sess-1", &order.id.0).expect("lookup");
        assert_eq!(found.id, order.id);
    }

    #[test]
    fn checkout_of_empty_cart_records_nothing() {
        let store = SessionStore::new();
        let error = store.checkout("acme", "sess-1").expect_err("empty cart");
        assert!(matches!(error, SessionError::Domain(_)));
        assert!(store.orders("acme", "sess-1").is_empty());
    }

    #[test]
    fn add_many_is_all_or_nothing() {
        let store = SessionStore::new();
        let mut eur = product("sku-eur", 1000, "tops", &[]);
        eur.currency = "EUR".to_string();

        let result = store.add_many(
            "acme",
            "sess-1",
            &[(product("sku-1", 1000, "tops", &[]), 1), (eur, 1)],
        );

        assert!(result.is_err());
        assert!(store.snapshot("acme", "sess-1").cart.is_empty());
    }

    #[test]
    fn profile_folds_categories_and_tags() {
        let store = SessionStore::new();
        store.update_profile(
            "acme",
            "sess-1",
            &[
                product("sku-1", 1000, "sneakers", &["running"]),
                product("sku-2", 2000, "sneakers", &["trail"]),
            ],
        );

        let summary = store
            .snapshot("acme", "sess-1")
            .preference_profile
            .summary()
            .expect("summary after fold");
        assert!(summary.contains("sneakers"));
        assert!(summary.contains("running"));
    }

    #[test]
    fn sessions_are_isolated_by_tenant_and_session() {
        let store = SessionStore::new();
        store.add_to_cart("acme", "sess-1", &product("sku-1", 1000, "tops", &[]), 1).expect("add");

        assert!(store.snapshot("acme", "sess-2").cart.is_empty());
        assert!(store.snapshot("globex", "sess-1").cart.is_empty());
        assert_eq!(store.len(), 3);

        assert!(store.purge("acme", "sess-1"));
        assert_eq!(store.len(), 2);
    }
}
