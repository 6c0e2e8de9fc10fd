// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static registration table of the API's capabilities and their routes.

use crate::http::OperationSpec;

pub const AUTHENTICATION: &str = "authentication";

/// Operation on [`AUTHENTICATION`] that exchanges a refresh token.
pub const REFRESH_OPERATION: &str = "refresh";

/// Every capability name, in registration order.
pub const CAPABILITIES: [&str; 14] = [
    "account",
    "analytics",
    AUTHENTICATION,
    "billingAddress",
    "health",
    "paymentMethods",
    "publicPaymentMethods",
    "publicSubscriptionsPlans",
    "publicURLs",
    "sessions",
    "subscriptions",
    "transactions",
    "urls",
    "user",
];

/// Routes served by `capability`, or `None` for an unknown name.
pub fn operations(capability: &str) -> Option<Vec<OperationSpec>> {
    let ops = match capability {
        "account" => vec![
            OperationSpec::post("changePassword", "/api/v1/account/change-password"),
            OperationSpec::post("logout", "/api/v1/account/logout"),
            OperationSpec::post("verifyResend", "/api/v1/account/verify/resend"),
        ],
        "analytics" => vec![
            OperationSpec::get("getSummary", "/api/v1/analytics/summary"),
            OperationSpec::get("getByUrl", "/api/v1/analytics/urls/{id}"),
        ],
        AUTHENTICATION => vec![
            OperationSpec::post("login", "/api/v1/auth/login"),
            OperationSpec::post("register", "/api/v1/auth/register"),
            OperationSpec::get("verify", "/api/v1/auth/verify"),
            OperationSpec::post(REFRESH_OPERATION, "/api/v1/auth/refresh"),
        ],
        "billingAddress" => vec![
            OperationSpec::get("getAll", "/api/v1/billing-address"),
            OperationSpec::get("getById", "/api/v1/billing-address/{id}"),
            OperationSpec::post("create", "/api/v1/billing-address"),
            OperationSpec::patch("update", "/api/v1/billing-address/{id}"),
        ],
        "health" => vec![OperationSpec::get("check", "/api/v1/health")],
        "paymentMethods" => vec![
            OperationSpec::get("getAll", "/api/v1/payment-methods"),
            OperationSpec::get("getById", "/api/v1/payment-methods/{id}"),
            OperationSpec::post("validate", "/api/v1/payment-methods/validate"),
            OperationSpec::delete("remove", "/api/v1/payment-methods/{id}"),
        ],
        "publicPaymentMethods" => {
            vec![OperationSpec::get("getAll", "/api/v1/public/payment-methods")]
        }
        "publicSubscriptionsPlans" => {
            vec![OperationSpec::get("getAll", "/api/v1/public/subscriptions/plans")]
        }
        "publicURLs" => vec![OperationSpec::get("resolve", "/api/v1/public/urls/{code}")],
        "sessions" => vec![
            OperationSpec::get("getAll", "/api/v1/sessions"),
            OperationSpec::delete("revokeById", "/api/v1/sessions/{id}"),
            OperationSpec::delete("revokeAll", "/api/v1/sessions"),
        ],
        "subscriptions" => vec![
            OperationSpec::get("getAll", "/api/v1/subscriptions"),
            OperationSpec::get("getActive", "/api/v1/subscriptions/active"),
            OperationSpec::get("getById", "/api/v1/subscriptions/{id}"),
            OperationSpec::get("getAllActiveSubscriptionCycles", "/api/v1/subscriptions/active/cycles"),
            OperationSpec::get("getUpgradeOptions", "/api/v1/subscriptions/{id}/upgrade-options"),
            OperationSpec::post("upgrade", "/api/v1/subscriptions/{id}/upgrade"),
        ],
        "transactions" => vec![
            OperationSpec::get("getAll", "/api/v1/transactions"),
            OperationSpec::get("getById", "/api/v1/transactions/{id}"),
        ],
        "urls" => vec![
            OperationSpec::get("getAll", "/api/v1/urls"),
            OperationSpec::get("getById", "/api/v1/urls/{id}"),
            OperationSpec::post("create", "/api/v1/urls"),
            OperationSpec::patch("update", "/api/v1/urls/{id}"),
            OperationSpec::delete("remove", "/api/v1/urls/{id}"),
        ],
        "user" => vec![
            OperationSpec::get("me", "/api/v1/user/me"),
            OperationSpec::get("getById", "/api/v1/user/{id}"),
            OperationSpec::patch("update", "/api/v1/user/{id}"),
        ],
        _ => return None,
    };
    Some(ops)
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
