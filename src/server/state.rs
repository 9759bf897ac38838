use std::sync::Arc;

use crate::engine::SearchEngine;

/// 应用状态
pub struct AppState {
    /// 检索引擎
    pub engine: Arc<SearchEngine>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(engine: Arc<SearchEngine>) -> Arc<Self> {
        Arc::new(AppState { engine })
    }
}
