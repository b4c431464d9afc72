//! 共享计划句柄
//!
//! 编排器是唯一写者，只在修改时短暂持有写锁（不跨越步骤执行）；
//! 观察者通过 snapshot 拿到完整副本，不会看到写了一半的状态。

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::plan::Plan;

#[derive(Debug, Clone)]
pub struct PlanHandle {
    id: String,
    inner: Arc<RwLock<Plan>>,
}

impl PlanHandle {
    pub fn new(plan: Plan) -> Self {
        Self {
            id: plan.id.clone(),
            inner: Arc::new(RwLock::new(plan)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 当前计划的完整副本
    pub async fn snapshot(&self) -> Plan {
        self.inner.read().await.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Plan> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Plan> {
        self.inner.write().await
    }
}

impl From<Plan> for PlanHandle {
    fn from(plan: Plan) -> Self {
        Self::new(plan)
    }
}
