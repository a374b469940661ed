use std::sync::Arc;

use application::{ChatHub, MessageBroadcaster};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    /// 服务层扇出入口，默认就是枢纽本身
    pub broadcaster: Arc<dyn MessageBroadcaster>,
}

impl AppState {
    pub fn new(hub: Arc<ChatHub>) -> Self {
        Self {
            broadcaster: hub.clone(),
            hub,
        }
    }
}
