// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

//! Inbound provider notification endpoint.
//!
//! Deliveries are at-least-once and may arrive after another trigger has
//! already settled the request. A notification for an already-final request
//! must still answer 200, or the provider keeps redelivering a no-op.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{error::ApiError, registry::RequestStatus, state::AppState};

/// Provider notification payload.
///
/// The carried status is a hint; settlement is re-verified with the
/// provider before anything is applied.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentNotification {
    /// Provider-issued tracking identifier.
    #[serde(alias = "Authority")]
    pub authority: String,
    /// Provider's claimed settlement status.
    #[serde(alias = "Status")]
    pub status: Option<String>,
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationAck {
    pub received: bool,
    /// Request the notification was matched to.
    pub request_id: String,
    /// Request status after processing.
    pub status: RequestStatus,
}

/// Process a provider payment notification.
///
/// Verifies the settlement with the provider and finalizes the matched
/// request if the answer is definitive. Duplicate and late notifications
/// are acknowledged with 200 and change nothing.
#[utoipa::path(
    post,
    path = "/v1/webhooks/payments",
    tag = "Webhooks",
    request_body = PaymentNotification,
    responses(
        (status = 200, description = "Notification processed", body = NotificationAck),
        (status = 404, description = "Unknown authority")
    )
)]
pub async fn payment_notification(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<NotificationAck>, ApiError> {
    let record = state
        .engine
        .apply_webhook(&notification.authority, notification.status.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("No payment request with this authority"))?;
    Ok(Json(NotificationAck {
        received: true,
        request_id: record.request_id,
        status: record.status,
    }))
}
