//! Generic `commerce.*` handlers. Every handler validates its own untyped
//! arguments, reads through [`ActionContext`], and returns a JSON result the
//! grounding stage can quote verbatim.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use concierge_core::domain::cart::Cart;
use concierge_core::domain::order::Order;
use concierge_core::domain::product::{Product, ProductId};
use concierge_llm::scan::{normalize_text, tokenize};

use crate::actions::{ActionContext, ActionHandler, AdapterBindings};

const MAX_ITEMS: usize = 5;

/// Register every generic commerce implementation under the `commerce`
/// namespace. Tenant overrides are layered on top by the host.
pub fn bind_defaults(bindings: &mut AdapterBindings) {
    bindings.bind_generic("commerce", "search", Arc::new(SearchHandler));
    bindings.bind_generic("commerce", "recommend", Arc::new(RecommendHandler));
    bindings.bind_generic("commerce", "compare", Arc::new(CompareHandler));
    bindings.bind_generic("commerce", "outfit", Arc::new(OutfitHandler));
    bindings.bind_generic("commerce", "add_outfit", Arc::new(AddOutfitHandler));
    bindings.bind_generic("commerce", "add_to_cart", Arc::new(AddToCartHandler));
    bindings.bind_generic("commerce", "remove_from_cart", Arc::new(RemoveFromCartHandler));
    bindings.bind_generic("commerce", "view_cart", Arc::new(ViewCartHandler));
    bindings.bind_generic("commerce", "checkout", Arc::new(CheckoutHandler));
    bindings.bind_generic("commerce", "order_status", Arc::new(OrderStatusHandler));
}

pub struct SearchHandler;

#[async_trait]
impl ActionHandler for SearchHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = arg_str(arguments, "query").unwrap_or_default();
        let max_price = arg_decimal(arguments, "max_price")?;
        let category = arg_str(arguments, "category");

        let mut products = ctx.catalog.list_products(&ctx.tenant_id).await?;
        if let Some(category) = &category {
            let category = normalize_text(category);
            products.retain(|product| normalize_text(&product.category) == category);
        }
        if let Some(cap) = max_price {
            products.retain(|product| product.price <= cap);
        }

        let matches = rank_by_query(products, &query);
        let total_matches = matches.len();
        let items: Vec<Value> = matches.iter().take(MAX_ITEMS).map(product_json).collect();

        let mut result = json!({
            "query": query,
            "total_matches": total_matches,
            "items": items,
        });
        if let Some(cap) = max_price {
            result["max_price"] = Value::from(cap.to_string());
        }
        Ok(result)
    }
}

pub struct RecommendHandler;

#[async_trait]
impl ActionHandler for RecommendHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = arg_str(arguments, "query").unwrap_or_default();
        let products = ctx.catalog.list_products(&ctx.tenant_id).await?;
        let profile = ctx.sessions.snapshot(&ctx.tenant_id, &ctx.session_id).preference_profile;

        let query_tokens = tokenize(&normalize_text(&query));
        let mut scored: Vec<(i64, Product)> = products
            .into_iter()
            .map(|product| {
                let mut score = 0i64;
                score += 3 * i64::from(*profile.category_counts.get(&product.category).unwrap_or(&0));
                for tag in &product.tags {
                    score += i64::from(*profile.tag_counts.get(tag).unwrap_or(&0));
                }
                if !query_tokens.is_empty() && matches_tokens(&product, &query_tokens) {
                    score += 10;
                }
                (score, product)
            })
            .collect();

        let personalized = scored.iter().any(|(score, _)| *score > 0);
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.price.cmp(&b.1.price))
                .then_with(|| a.1.name.cmp(&b.1.name))
        });

        let items: Vec<Value> =
            scored.iter().take(4).map(|(_, product)| product_json(product)).collect();
        let basis = if personalized { "preferences" } else { "catalog" };

        Ok(json!({
            "basis": basis,
            "items": items,
        }))
    }
}

pub struct CompareHandler;

#[async_trait]
impl ActionHandler for CompareHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let products = ctx.catalog.list_products(&ctx.tenant_id).await?;

        // Explicit item list first, free-text mention scan second.
        let mut mentioned: Vec<Product> = Vec::new();
        if let Some(Value::Array(names)) = arguments.get("items") {
            for name in names.iter().filter_map(Value::as_str) {
                if let Some(product) = find_by_mention(&products, name) {
                    push_unique(&mut mentioned, product);
                }
            }
        }
        if mentioned.len() < 2 {
            if let Some(query) = arg_str(arguments, "query") {
                let normalized_query = normalize_text(&query);
                for product in &products {
                    if normalized_query.contains(&normalize_text(&product.name)) {
                        push_unique(&mut mentioned, product.clone());
                    }
                }
            }
        }

        if mentioned.len() < 2 {
            anyhow::bail!("comparison needs at least two products that exist in the catalog");
        }

        let prices: Vec<Decimal> = mentioned.iter().map(|product| product.price).collect();
        let min_price = prices.iter().min().cloned().unwrap_or_default();
        let max_price = prices.iter().max().cloned().unwrap_or_default();
        let shared_tags: Vec<String> = mentioned
            .iter()
            .map(|product| product.tags.iter().cloned().collect::<BTreeSet<_>>())
            .reduce(|left, right| left.intersection(&right).cloned().collect())
            .unwrap_or_default()
            .into_iter()
            .collect();

        let items: Vec<Value> = mentioned.iter().map(product_json).collect();
        Ok(json!({
            "items": items,
            "comparison": {
                "price_min": min_price.to_string(),
                "price_max": max_price.to_string(),
                "shared_tags": shared_tags,
            }
        }))
    }
}

pub struct OutfitHandler;

#[async_trait]
impl ActionHandler for OutfitHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = arg_str(arguments, "query").unwrap_or_default();
        let items = assemble_outfit(ctx, &query).await?;

        let total: Decimal = items.iter().map(|product| product.price).sum();
        let item_values: Vec<Value> = items.iter().map(product_json).collect();
        Ok(json!({
            "theme": query,
            "items": item_values,
            "outfit_total": total.to_string(),
        }))
    }
}

/// Assemble the outfit and land every piece in the cart as one unit.
pub struct AddOutfitHandler;

#[async_trait]
impl ActionHandler for AddOutfitHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = arg_str(arguments, "query").unwrap_or_default();
        let items = assemble_outfit(ctx, &query).await?;

        let lines: Vec<(Product, u32)> =
            items.iter().map(|product| (product.clone(), 1)).collect();
        let cart = ctx.sessions.add_many(&ctx.tenant_id, &ctx.session_id, &lines)?;

        let item_values: Vec<Value> = items.iter().map(product_json).collect();
        Ok(json!({
            "theme": query,
            "items": item_values,
            "cart": cart_json(&cart),
        }))
    }
}

/// One piece per category slot, cheapest first unless the query narrows it
/// (e.g. a color).
async fn assemble_outfit(ctx: &ActionContext, query: &str) -> anyhow::Result<Vec<Product>> {
    let products = ctx.catalog.list_products(&ctx.tenant_id).await?;
    let query_tokens = tokenize(&normalize_text(query));

    let mut items: Vec<Product> = Vec::new();
    for slot in ["tops", "bottoms", "sneakers", "accessories"] {
        let mut candidates: Vec<&Product> =
            products.iter().filter(|product| product.category == slot).collect();
        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by(|a, b| {
            let a_match = matches_tokens(a, &query_tokens);
            let b_match = matches_tokens(b, &query_tokens);
            b_match.cmp(&a_match).then_with(|| a.price.cmp(&b.price))
        });
        items.push(candidates[0].clone());
    }

    if items.len() < 2 {
        anyhow::bail!("catalog does not carry enough categories to assemble an outfit");
    }
    Ok(items)
}

pub struct AddToCartHandler;

#[async_trait]
impl ActionHandler for AddToCartHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let quantity = arg_u32(arguments, "quantity").unwrap_or(1);
        let product = resolve_product(ctx, arguments).await?;
        let cart = ctx.sessions.add_to_cart(&ctx.tenant_id, &ctx.session_id, &product, quantity)?;

        Ok(json!({
            "added": product_json(&product),
            "quantity": quantity,
            "cart": cart_json(&cart),
        }))
    }
}

pub struct RemoveFromCartHandler;

#[async_trait]
impl ActionHandler for RemoveFromCartHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let snapshot = ctx.sessions.snapshot(&ctx.tenant_id, &ctx.session_id);

        let product_id = if let Some(id) = arg_str(arguments, "product_id") {
            ProductId(id)
        } else if let Some(query) = arg_str(arguments, "query") {
            let normalized_query = normalize_text(&query);
            snapshot
                .cart
                .lines
                .iter()
                .find(|line| normalized_query.contains(&normalize_text(&line.product_name)))
                .map(|line| line.product_id.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("no cart line matches `{query}`")
                })?
        } else {
            anyhow::bail!("remove_from_cart needs a product_id or a query");
        };

        let removed_name = snapshot
            .cart
            .lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.product_name.clone());
        let cart = ctx.sessions.remove_from_cart(&ctx.tenant_id, &ctx.session_id, &product_id)?;

        Ok(json!({
            "removed": {
                "product_id": product_id.0,
                "product_name": removed_name,
            },
            "cart": cart_json(&cart),
        }))
    }
}

pub struct ViewCartHandler;

#[async_trait]
impl ActionHandler for ViewCartHandler {
    async fn call(&self, ctx: &ActionContext, _arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let snapshot = ctx.sessions.snapshot(&ctx.tenant_id, &ctx.session_id);
        Ok(json!({ "cart": cart_json(&snapshot.cart) }))
    }
}

pub struct CheckoutHandler;

#[async_trait]
impl ActionHandler for CheckoutHandler {
    async fn call(&self, ctx: &ActionContext, _arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let order = ctx.sessions.checkout(&ctx.tenant_id, &ctx.session_id)?;
        Ok(json!({ "order": order_json(&order) }))
    }
}

pub struct OrderStatusHandler;

#[async_trait]
impl ActionHandler for OrderStatusHandler {
    async fn call(&self, ctx: &ActionContext, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        let order = match arg_str(arguments, "order_id") {
            Some(order_id) => {
                ctx.sessions.find_order(&ctx.tenant_id, &ctx.session_id, &order_id)?
            }
            None => ctx
                .sessions
                .orders(&ctx.tenant_id, &ctx.session_id)
                .into_iter()
                .last()
                .ok_or_else(|| anyhow::anyhow!("this session has no orders yet"))?,
        };
        Ok(json!({ "order": order_json(&order) }))
    }
}

async fn resolve_product(
    ctx: &ActionContext,
    arguments: &Map<String, Value>,
) -> anyhow::Result<Product> {
    if let Some(id) = arg_str(arguments, "product_id") {
        let product_id = ProductId(id.clone());
        return ctx
            .catalog
            .find(&ctx.tenant_id, &product_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("product `{id}` is not in the catalog"));
    }

    let query = arg_str(arguments, "query")
        .ok_or_else(|| anyhow::anyhow!("add_to_cart needs a product_id or a query"))?;
    let products = ctx.catalog.list_products(&ctx.tenant_id).await?;

    if let Some(product) = find_by_mention(&products, &query) {
        return Ok(product);
    }
    rank_by_query(products, &query)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no product matches `{query}`"))
}

fn find_by_mention(products: &[Product], mention: &str) -> Option<Product> {
    let normalized_mention = normalize_text(mention);
    products
        .iter()
        .find(|product| normalized_mention.contains(&normalize_text(&product.name)))
        .or_else(|| {
            products.iter().find(|product| normalize_text(&product.name) == normalized_mention)
        })
        .cloned()
}

fn push_unique(items: &mut Vec<Product>, product: Product) {
    if !items.iter().any(|existing| existing.id == product.id) {
        items.push(product);
    }
}

/// Token-overlap ranking: every query token that hits name, category, a tag,
/// or a color counts. Zero-hit products drop out unless the query is empty.
fn rank_by_query(products: Vec<Product>, query: &str) -> Vec<Product> {
    let tokens = tokenize(&normalize_text(query));
    let mut scored: Vec<(usize, Product)> = products
        .into_iter()
        .filter_map(|product| {
            if tokens.is_empty() {
                return Some((0, product));
            }
            let score = score_tokens(&product, &tokens);
            (score > 0).then_some((score, product))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0).then_with(|| a.1.price.cmp(&b.1.price)).then_with(|| a.1.name.cmp(&b.1.name))
    });
    scored.into_iter().map(|(_, product)| product).collect()
}

fn score_tokens(product: &Product, tokens: &[String]) -> usize {
    let name = normalize_text(&product.name);
    let category = normalize_text(&product.category);
    tokens
        .iter()
        .filter(|token| {
            name.contains(token.as_str())
                || category_matches(&category, token)
                || product.tags.iter().any(|tag| normalize_text(tag) == **token)
                || product.colors.iter().any(|color| normalize_text(color) == **token)
        })
        .count()
}

fn matches_tokens(product: &Product, tokens: &[String]) -> bool {
    !tokens.is_empty() && score_tokens(product, tokens) > 0
}

fn category_matches(category: &str, token: &str) -> bool {
    // `sneaker` should hit the `sneakers` category and vice versa.
    category == token || category.trim_end_matches('s') == token.trim_end_matches('s')
}

fn arg_str(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn arg_u32(arguments: &Map<String, Value>, key: &str) -> Option<u32> {
    arguments.get(key).and_then(Value::as_u64).and_then(|value| u32::try_from(value).ok())
}

fn arg_decimal(arguments: &Map<String, Value>, key: &str) -> anyhow::Result<Option<Decimal>> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => {
            let float = number
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("`{key}` is not a representable number"))?;
            Decimal::from_f64_retain(float)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("`{key}` is out of range"))
        }
        Some(Value::String(raw)) => raw
            .trim()
            .trim_start_matches('$')
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("`{key}` is not a valid amount: `{raw}`")),
        Some(other) => anyhow::bail!("`{key}` must be a number, got {other}"),
    }
}

fn product_json(product: &Product) -> Value {
    json!({
        "id": product.id.0,
        "name": product.name,
        "price": product.price.to_string(),
        "currency": product.currency,
        "category": product.category,
        "tags": product.tags,
        "colors": product.colors,
    })
}

fn cart_json(cart: &Cart) -> Value {
    let lines: Vec<Value> = cart
        .lines
        .iter()
        .map(|line| {
            json!({
                "product_id": line.product_id.0,
                "product_name": line.product_name,
                "quantity": line.quantity,
                "price_snapshot": line.price_snapshot.to_string(),
                "line_total": line.line_total().to_string(),
            })
        })
        .collect();

    json!({
        "lines": lines,
        "total": cart.total().to_string(),
        "currency": cart.currency,
    })
}

fn order_json(order: &Order) -> Value {
    let lines: Vec<Value> = order
        .lines
        .iter()
        .map(|line| {
            json!({
                "product_id": line.product_id.0,
                "product_name": line.product_name,
                "quantity": line.quantity,
                "price_snapshot": line.price_snapshot.to_string(),
            })
        })
        .collect();

    json!({
        "order_id": order.id.0,
        "status": order.status,
        "lines": lines,
        "total_amount": order.total_amount.to_string(),
        "currency": order.currency,
        "created_at": order.created_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map, Value};

    use concierge_core::catalog::InMemoryCatalog;
    use concierge_core::session::SessionStore;

    use crate::actions::{ActionContext, ActionHandler};

    use super::{
        AddOutfitHandler, AddToCartHandler, CheckoutHandler, CompareHandler, OrderStatusHandler,
        OutfitHandler, RecommendHandler, SearchHandler, ViewCartHandler,
    };

    fn context() -> ActionContext {
        ActionContext {
            tenant_id: "acme".to_string(),
            session_id: "sess-1".to_string(),
            catalog: Arc::new(InMemoryCatalog::demo()),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn item_names(result: &Value) -> Vec<String> {
        result["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn search_honors_price_cap_and_query() {
        let ctx = context();
        let result = SearchHandler
            .call(&ctx, &args(&[("query", json!("sneakers")), ("max_price", json!(100.0))]))
            .await
            .expect("search");

        let names = item_names(&result);
        assert!(!names.is_empty());
        assert!(names.contains(&"Aero Glide 90".to_string()));
        assert!(!names.contains(&"Aero Glide 120".to_string()), "129.99 exceeds the cap");
        assert_eq!(result["max_price"], "100");
    }

    #[tokio::test]
    async fn compare_finds_both_catalog_products() {
        let ctx = context();
        let result = CompareHandler
            .call(&ctx, &args(&[("query", json!("compare Aero Glide 90 and Court Classic Low"))]))
            .await
            .expect("compare");

        let names = item_names(&result);
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Aero Glide 90".to_string()));
        assert!(names.contains(&"Court Classic Low".to_string()));
        assert_eq!(result["comparison"]["price_min"], "74.99");
        assert_eq!(result["comparison"]["price_max"], "89.99");
    }

    #[tokio::test]
    async fn compare_with_one_known_product_fails_honestly() {
        let ctx = context();
        let error = CompareHandler
            .call(&ctx, &args(&[("query", json!("compare Aero Glide 90 and Nonexistent Shoe"))]))
            .await
            .expect_err("single match must fail");
        assert!(error.to_string().contains("two products"));
    }

    #[tokio::test]
    async fn add_search_checkout_flow_preserves_totals() {
        let ctx = context();

        AddToCartHandler
            .call(&ctx, &args(&[("query", json!("Aero Glide 90")), ("quantity", json!(2))]))
            .await
            .expect("add");
        let cart_view = ViewCartHandler.call(&ctx, &Map::new()).await.expect("view");
        assert_eq!(cart_view["cart"]["total"], "179.98");

        let checkout = CheckoutHandler.call(&ctx, &Map::new()).await.expect("checkout");
        assert_eq!(checkout["order"]["total_amount"], "179.98");
        assert_eq!(checkout["order"]["status"], "pending");

        let cart_after = ViewCartHandler.call(&ctx, &Map::new()).await.expect("view after");
        assert_eq!(cart_after["cart"]["total"], "0");

        let status = OrderStatusHandler.call(&ctx, &Map::new()).await.expect("status");
        assert_eq!(status["order"]["order_id"], checkout["order"]["order_id"]);
    }

    #[tokio::test]
    async fn outfit_spans_categories_without_touching_the_cart() {
        let ctx = context();
        let result = OutfitHandler
            .call(&ctx, &args(&[("query", json!("casual weekend outfit"))]))
            .await
            .expect("outfit");

        let names = item_names(&result);
        assert!(names.len() >= 3, "demo catalog covers four slots, got {names:?}");
        let cart = ViewCartHandler.call(&ctx, &Map::new()).await.expect("view");
        assert_eq!(cart["cart"]["total"], "0");
    }

    #[tokio::test]
    async fn add_outfit_lands_every_piece_in_the_cart_at_once() {
        let ctx = context();
        let result = AddOutfitHandler
            .call(&ctx, &args(&[("query", json!("running outfit"))]))
            .await
            .expect("add outfit");

        let names = item_names(&result);
        let cart_lines = result["cart"]["lines"].as_array().expect("lines");
        assert_eq!(names.len(), cart_lines.len());
        assert!(names.len() >= 3);

        let snapshot = ctx.sessions.snapshot("acme", "sess-1");
        assert_eq!(snapshot.cart.lines.len(), names.len());
    }

    #[tokio::test]
    async fn checkout_with_empty_cart_is_an_error() {
        let ctx = context();
        let error = CheckoutHandler.call(&ctx, &Map::new()).await.expect_err("empty cart");
        assert!(error.to_string().contains("non-empty cart"));
    }

    #[tokio::test]
    async fn recommendations_follow_the_preference_profile() {
        let ctx = context();
        let sneakers: Vec<_> = concierge_core::catalog::demo_products()
            .into_iter()
            .filter(|product| product.category == "sneakers")
            .collect();
        ctx.sessions.update_profile("acme", "sess-1", &sneakers);

        let result = RecommendHandler.call(&ctx, &Map::new()).await.expect("recommend");
        assert_eq!(result["basis"], "preferences");

        let names = item_names(&result);
        assert!(
            names.iter().filter(|name| name.contains("Glide") || name.contains("Court") || name.contains("Trail")).count()
                >= 3,
            "sneaker-heavy profile should surface sneakers, got {names:?}"
        );
    }

    #[tokio::test]
    async fn cold_session_recommendations_fall_back_to_catalog() {
        let ctx = context();
        let result = RecommendHandler.call(&ctx, &Map::new()).await.expect("recommend");
        assert_eq!(result["basis"], "catalog");
        assert!(!item_names(&result).is_empty());
    }
}
