pub mod orders;
pub mod webhooks;

use crate::mpesa::c2b::C2bClient;
use crate::mpesa::stk::{DebugStore, StkClient};
use crate::mpesa::tenant::TenantResolver;
use crate::orders::OrderGateway;
use crate::services::reconciliation::ReconciliationEngine;
use crate::services::reversal::ReversalService;
use std::sync::Arc;

/// Everything the request handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn TenantResolver>,
    pub stk: Arc<StkClient>,
    pub c2b: Arc<C2bClient>,
    pub engine: Arc<ReconciliationEngine>,
    pub reversal: Arc<ReversalService>,
    pub orders: Arc<dyn OrderGateway>,
    pub debug: Arc<DebugStore>,
    /// Order-system statuses that trigger a reversal.
    pub reversal_statuses: Vec<String>,
}
