//! Success envelope. Errors use the `{error, code}` body from
//! [`crate::error::AppError`] instead.

use serde::Serialize;

/// `{ "data": T }`, where `T` is a record, a list or a [`Page`](cadence_core::pagination::Page).
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
