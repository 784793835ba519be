use std::sync::Arc;

use crate::contingency::ContingencyService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub service: Arc<ContingencyService>,
    pub admin_token: String,
}
