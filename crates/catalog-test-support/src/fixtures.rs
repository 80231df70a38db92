//! Schemas, rows and pages shared by engine and client suites.

use catalog_engine::{FetchResult, FieldSpec, FilterSchema, Row, RowKey};
use serde_json::{Value, json};

/// Page size used by the product schema.
pub const PAGE_SIZE: u32 = 25;

/// Product list schema: search, sort, categories, wishlist, liked flag and
/// paging.
///
/// # Panics
///
/// Panics if the fixed declaration stops being valid.
#[must_use]
pub fn product_schema() -> FilterSchema {
    FilterSchema::new(vec![
        FieldSpec::text("q", ""),
        FieldSpec::enumeration("sort", ["newest", "price_asc", "price_desc"], "newest"),
        FieldSpec::list("categories"),
        FieldSpec::integer("wishlist", 0, Some(0), None),
        FieldSpec::boolean("liked", false),
        FieldSpec::page("page"),
        FieldSpec::page_size("pageSize", PAGE_SIZE, 200),
    ])
    .and_then(|schema| schema.with_pagination("page", "pageSize"))
    .expect("product schema is valid")
}

/// Raw product item as the list endpoint returns it.
#[must_use]
pub fn product(id: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Product {id}"),
        "liked": false,
        "status": "draft",
    })
}

/// Row built from [`product`].
///
/// # Panics
///
/// Panics if `id` is empty.
#[must_use]
pub fn product_row(id: &str) -> Row {
    RowKey::single("id")
        .row(product(id))
        .expect("product items carry an id")
}

/// Page of product rows.
#[must_use]
pub fn page_of(ids: &[&str], total: u64, page: u32, page_size: u32) -> FetchResult {
    FetchResult {
        items: ids.iter().map(|id| product_row(id)).collect(),
        total,
        page,
        page_size,
    }
}
