// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures shared by the catalog, cart, order and category stores,
// plus the request/response bodies of the HTTP API.
//
// Every persisted type serializes with camelCase field names: the stored
// documents and the JSON API share one wire shape, so a record read from the
// local JSON file and one read from PostgreSQL are interchangeable.
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

// =============================================================================
// PRODUCT
// =============================================================================

/// A catalog product.
///
/// When `has_color_variants` is set, `color_variants` is non-empty and the
/// per-variant stock and images take precedence over `stock` / `images` for
/// display and cart purposes (see `variant.rs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub price: Decimal,
    pub stock: u32,
    /// `images[0]` is the primary/display image
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub has_color_variants: bool,
    #[serde(default)]
    pub color_variants: Vec<ColorVariant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Primary image, if any
    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

/// A colored sub-SKU of a product with its own images and stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorVariant {
    pub id: String,
    pub color_name: String,
    pub color_hex: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub stock: u32,
}

// -----------------------------------------------------------------------------
// PRODUCT INPUT (admin create / update body)
// -----------------------------------------------------------------------------
/// Admin-submitted product fields.
///
/// `id`, `hasColorVariants` and the timestamps are never taken from input;
/// the catalog derives or stamps them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub sku: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub size: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color_variants: Vec<ColorVariantInput>,
}

/// Variant fields as submitted. An existing `id` is kept on edit so variant
/// identity survives a product update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorVariantInput {
    #[serde(default)]
    pub id: Option<String>,
    pub color_name: String,
    pub color_hex: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub stock: u32,
}

// =============================================================================
// VARIANT DISPLAY UNIT
// =============================================================================
/// What a product card shows right now: the active variant's images and
/// stock, or the product's own when it has no variants.
///
/// Always produced as one value so images, stock and the selected index can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUnit {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_hex: Option<String>,
    pub images: Vec<String>,
    pub stock: u32,
}

// =============================================================================
// CART LINE ITEM
// =============================================================================
/// One cart (or order) entry: a by-value snapshot of the product fields at
/// the moment it was added, plus quantity and the chosen color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    /// Product id the snapshot was taken from
    #[serde(rename = "id", deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_color_hex: Option<String>,
}

impl CartLineItem {
    /// Merge identity: same product and same color (or both uncolored).
    pub fn same_line(&self, other: &CartLineItem) -> bool {
        self.product_id == other.product_id && self.selected_color == other.selected_color
    }

    /// `price × quantity`, or `None` when it does not fit in a `Decimal`.
    pub fn subtotal(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// `Σ price × quantity` over `items`, refusing amounts too large to represent.
pub fn line_total(items: &[CartLineItem]) -> AppResult<Decimal> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| {
            item.subtotal().and_then(|subtotal| total.checked_add(subtotal))
        })
        .ok_or_else(|| AppError::Validation("Order amount is too large".into()))
}

/// Product ids written by older clients may be numeric
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

// =============================================================================
// ORDER STATUS
// =============================================================================
// The literal strings below are a wire contract: they are used as filter
// keys by both the admin and the customer views.
//
//   pending -> accepted -> processing -> out-for-delivery -> delivered
//      \__________\____________\_______________\______-> cancelled
// =============================================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Processing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Processing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Processing => "processing",
            OrderStatus::OutForDelivery => "out-for-delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// The single "advance" transition, if the state has one.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Accepted),
            OrderStatus::Accepted => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Advance by one step, or cancel from any non-terminal state.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == OrderStatus::Cancelled || self.next() == Some(target)
    }

    /// Label and description shown on the customer order tracker.
    pub fn info(&self) -> StatusInfo {
        let (label, description) = match self {
            OrderStatus::Pending => ("Pending", "Order received, waiting for confirmation"),
            OrderStatus::Accepted => ("Accepted", "Order confirmed and accepted"),
            OrderStatus::Processing => ("Processing", "Order is being prepared"),
            OrderStatus::OutForDelivery => ("Out for Delivery", "Order is on the way"),
            OrderStatus::Delivered => ("Delivered", "Order successfully delivered"),
            OrderStatus::Cancelled => ("Cancelled", "Order cancelled"),
        };
        StatusInfo {
            status: *self,
            label,
            description,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Display metadata for a status
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub status: OrderStatus,
    pub label: &'static str,
    pub description: &'static str,
}

// =============================================================================
// ORDER
// =============================================================================

/// Customer fields captured at checkout. `user_id` is the identity handed
/// over by the auth provider, when the customer is signed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    #[serde(default)]
    pub user_id: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_address: String,
}

/// A placed order. Only `status` and `updated_at` ever change after
/// creation; `items` and `total_amount` are snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    #[serde(flatten)]
    pub customer: CustomerDetails,
    pub items: Vec<CartLineItem>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Everything needed to create an order.
///
/// `total_amount`, when given, must match the total computed from `items`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    #[serde(flatten)]
    pub customer: CustomerDetails,
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// =============================================================================
// CATEGORIES
// =============================================================================

/// The single `settings/categories` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryList {
    #[serde(default)]
    pub list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Admin category card
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub slug: String,
    pub display_name: String,
    pub product_count: usize,
    pub reserved: bool,
}

// =============================================================================
// API REQUEST STRUCTURES
// =============================================================================

/// Body for `POST /api/v1/cart/items`. The variant is never named here: the
/// session's current selection for the product is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: String,
}

/// Body for `PUT /api/v1/cart/items/:index`. Signed so that a decrement past
/// zero arrives intact and is clamped.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectVariantRequest {
    pub index: usize,
}

/// Body for `POST /api/v1/checkout`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddCategoryRequest {
    pub name: String,
}

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

/// Cart contents with the two folds the cart badge and checkout need
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineItem>,
    pub total: Decimal,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedResponse {
    pub success: bool,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Order counts per status for the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    pub total: usize,
    pub by_status: Vec<StatusCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: usize,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    /// "remote" or "local"
    pub backend: String,
    pub backend_healthy: bool,
    /// `None` when no cache is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error body: `{ "success": false, "error": "...", "code": "..." }`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Human-readable message, including the backend's own text when the
    /// failure came from the store
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code: code.into(),
        }
    }
}
