use std::sync::Arc;

use crate::alert::AlertEngine;
use crate::baseline::BaselineStore;
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub engine: Arc<AlertEngine>,
    pub baselines: Arc<BaselineStore>,
}
