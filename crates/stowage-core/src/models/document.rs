use serde::{Deserialize, Serialize};

use crate::constants::CURRENT_RENDER_VERSION;

/// A persisted rich-text document that may embed upload URLs.
///
/// `raw` is the author's source, `cooked` the cached HTML render. A `render_version`
/// of `None` means the render has been invalidated and a background job will
/// regenerate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Document {
    pub id: i64,
    pub raw: String,
    pub cooked: String,
    pub render_version: Option<i32>,
}

impl Document {
    pub fn needs_rerender(&self) -> bool {
        self.render_version
            .map(|v| v != CURRENT_RENDER_VERSION)
            .unwrap_or(true)
    }
}
