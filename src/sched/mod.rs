// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// vgpu_sched is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

mod sched_tbs;

pub use self::sched_tbs::{TbsScheduler, SCHED_PERIOD_NS};

use crate::error::Result;
use crate::vgpu::Vgpu;

/// One hardware execution engine (render, blitter, ...), identified by its
/// index in the fixed set handed to the scheduler at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineId(pub usize);

impl EngineId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Workload-queue collaborator.
///
/// The scheduler never owns workloads; the submission/dispatch subsystem
/// implements this trait to answer pending-work queries and to receive the
/// wake-up that completes a hand-off.
pub trait WorkloadQueue: Send + Sync {
    /// true if at least one submitted-but-undispatched workload exists for
    /// this vgpu/engine pair
    fn has_pending_workload(&self, vgpu_id: usize, engine: EngineId) -> bool;
    /// wake the dispatch thread waiting on this engine's queue, it may now
    /// dispatch for the new owner
    ///
    /// Called with the scheduler lock held: the implementation must only
    /// signal and return, never call back into the scheduler. Dispatch
    /// queries like [`SchedPolicy::need_reschedule`] belong on the woken
    /// thread.
    fn wake_dispatch(&self, engine: EngineId);
}

/// Snapshot of one vgpu's scheduling accounts on one engine, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// total scheduled time, in ns
    pub actual_ns: u64,
    /// remaining budget for the current sub-period; negative means debt
    pub left_ns: i64,
    /// budget assigned by the most recent balancer reset
    pub alloc_ns: i64,
}

// Must Implement SchedPolicy for the real scheduler object
/// Scheduler policy trait, used to define a common interface for different
/// vgpu scheduling policies.
pub trait SchedPolicy {
    /// allocate per-engine scheduling state for a new vgpu
    fn register_vgpu(&self, vgpu: &Vgpu) -> Result<()>;
    /// drop a vgpu from all run queues and owner slots, free its state
    fn unregister_vgpu(&self, vgpu: &Vgpu);
    /// enqueue the vgpu on every engine and make sure the timer runs
    fn start_scheduling(&self, vgpu: &Vgpu, now_ns: u64);
    /// dequeue the vgpu from every engine; does not wait for in-flight work
    fn stop_scheduling(&self, vgpu: &Vgpu);
    /// flag a reschedule without taking the scheduler lock
    fn request_reschedule(&self);
    /// true if a flagged request is still waiting for a tick
    fn has_pending_request(&self) -> bool;
    /// true while the dispatch thread must not start new workloads for the
    /// outgoing vgpu on this engine
    fn need_reschedule(&self, engine: EngineId) -> bool;
    /// the dispatch thread started a workload on this engine
    fn notify_workload_dispatched(&self, engine: EngineId);
    /// the in-flight workload on this engine finished; re-triggers the
    /// scheduler so a deferred switch can complete
    fn notify_workload_complete(&self, engine: EngineId);
    /// periodic timer entry, polls the timer and runs a tick when due
    fn on_timer(&self, now_ns: u64);
    /// the core scheduling pass over every engine
    fn tick(&self, now_ns: u64);
    /// which vgpu currently owns the engine, for diagnostics
    fn current_owner(&self, engine: EngineId) -> Option<usize>;
    /// scheduling accounts for one vgpu/engine pair, for diagnostics
    fn sched_stats(&self, vgpu_id: usize, engine: EngineId) -> Option<SchedStats>;
    /// cancel the timer; call after all vgpus have been unregistered
    fn teardown(&self);
}
