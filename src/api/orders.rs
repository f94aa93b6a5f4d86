//! Order and profile endpoints.
//!
//! These handlers know nothing about realtime delivery. Which of them emit
//! events is declared separately in [`super::events`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub item: String,
    pub quantity: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub item: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

/// In-memory order storage
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: DashMap<Uuid, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: String, quantity: u32) -> Order {
        let order = Order {
            id: Uuid::new_v4(),
            item,
            quantity,
            status: OrderStatus::Created,
            created_at: Utc::now(),
        };
        self.orders.insert(order.id, order.clone());
        order
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.clone())
    }

    /// Mark an order cancelled; cancelling twice is a no-op
    pub fn cancel(&self, id: Uuid) -> Option<Order> {
        self.orders.get_mut(&id).map(|mut entry| {
            entry.status = OrderStatus::Cancelled;
            entry.clone()
        })
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let item = request.item.trim();
    if item.is_empty() {
        return Err(AppError::Validation("item must not be empty".to_string()));
    }
    if request.quantity == 0 {
        return Err(AppError::Validation("quantity must be at least 1".to_string()));
    }

    let order = state.orders.insert(item.to_string(), request.quantity);
    tracing::info!(order_id = %order.id, item = %order.item, "Order created");

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/v1/orders/{order_id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>> {
    state
        .orders
        .get(order_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))
}

/// POST /api/v1/orders/{order_id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>> {
    let order = state
        .orders
        .cancel(order_id)
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

    tracing::info!(order_id = %order.id, "Order cancelled");
    Ok(Json(order))
}

/// PUT /api/v1/users/{user_id}/profile
pub async fn update_profile(
    Path(user_id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>> {
    if request.display_name.trim().is_empty() {
        return Err(AppError::Validation("display_name must not be empty".to_string()));
    }

    Ok(Json(Profile {
        user_id,
        display_name: request.display_name,
        updated_at: Utc::now(),
    }))
}
