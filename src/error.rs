// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Payvault

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::providers::ProviderError;
use crate::rates::RateError;
use crate::reconcile::EngineError;
use crate::storage::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::AccountNotFound(_) | StoreError::RequestNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            StoreError::InsufficientFunds { .. } | StoreError::SelfTransfer => {
                ApiError::bad_request(err.to_string())
            }
            StoreError::AlreadyExists(_) => ApiError::conflict(err.to_string()),
            _ => {
                tracing::error!(error = %err, "storage failure");
                ApiError::internal(format!("storage failure: {err}"))
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(store) => store.into(),
            EngineError::Provider(ProviderError::Rejected(reason)) => {
                ApiError::bad_request(format!("provider rejected the request: {reason}"))
            }
            EngineError::Provider(provider) => ApiError::service_unavailable(provider.to_string()),
            EngineError::Recipient(recipient) => ApiError::bad_request(recipient.to_string()),
            EngineError::Rate(rate @ RateError::UnsupportedPair { .. }) => {
                ApiError::bad_request(rate.to_string())
            }
            EngineError::Rate(rate) => ApiError::service_unavailable(rate.to_string()),
            err @ (EngineError::ProviderNotConfigured(_) | EngineError::ConversionDisabled) => {
                ApiError::service_unavailable(err.to_string())
            }
            err => ApiError::bad_request(err.to_string()),
        }
    }
}
