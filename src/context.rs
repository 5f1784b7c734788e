//! Per-call options carried alongside every operation

use std::collections::HashMap;

/// Identifier of a pending transaction on a transactional manipulator
pub type TransactionId = String;

/// Options applied to a single manipulator call
///
/// Options that the backend understands are translated into request
/// parameters; the rest are ignored by backends that have no use for them
/// (`transaction_id` is only meaningful to transactional manipulators).
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub filter: Option<String>,
    pub parameters: HashMap<String, String>,
    pub order: Vec<String>,
    pub version: Option<u64>,
    pub override_protection: bool,
    pub tracking_id: Option<String>,
    pub external_tracking_type: Option<String>,
    pub transaction_id: Option<TransactionId>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a copy of this context, to be further specialized
    pub fn derive(&self) -> Self {
        self.clone()
    }

    pub fn with_page(mut self, page: u64, page_size: u64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Set an opaque filter expression passed through to the backend
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_order(mut self, fields: &[&str]) -> Self {
        self.order = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_override_protection(mut self) -> Self {
        self.override_protection = true;
        self
    }

    pub fn with_tracking(
        mut self,
        tracking_id: impl Into<String>,
        external_type: Option<String>,
    ) -> Self {
        self.tracking_id = Some(tracking_id.into());
        self.external_tracking_type = external_type;
        self
    }

    pub fn with_transaction_id(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    /// Translate the context into request parameters
    pub(crate) fn query_parameters(&self) -> HashMap<String, String> {
        let mut parameters = self.parameters.clone();

        if let Some(page) = self.page {
            parameters.insert("page".to_string(), page.to_string());
        }
        if let Some(page_size) = self.page_size {
            parameters.insert("pagesize".to_string(), page_size.to_string());
        }
        if let Some(filter) = &self.filter {
            parameters.insert("filter".to_string(), filter.clone());
        }
        if !self.order.is_empty() {
            parameters.insert("order".to_string(), self.order.join(","));
        }
        if let Some(version) = self.version {
            parameters.insert("version".to_string(), version.to_string());
        }
        if self.override_protection {
            parameters.insert("overrideprotection".to_string(), "true".to_string());
        }
        if let Some(tracking_id) = &self.tracking_id {
            parameters.insert("trackingid".to_string(), tracking_id.clone());
        }
        if let Some(external_type) = &self.external_tracking_type {
            parameters.insert("externaltrackingtype".to_string(), external_type.clone());
        }

        parameters
    }
}
