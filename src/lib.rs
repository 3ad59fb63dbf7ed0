// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// vgpu_sched is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! vgpu_sched is a time-based-share (TBS) scheduler for virtual GPU instances
//! multiplexed onto a fixed set of shared hardware engines. Every 100 ms it
//! redistributes each engine's time budget across the queued vgpus in
//! proportion to their weights, picks the next owner per engine with an
//! LRU-ordered run queue, and hands engines over in coordination with an
//! asynchronous workload-dispatch thread.
//! The introduces of all modules are showed below:
//! * [sched]: The scheduling policy interface and the TBS policy, including the
//!   fair-share balancer, the per-engine run queues and picker, and the
//!   hand-off state machine driven by the periodic tick.
//! * [timer]: The periodic timer abstraction the embedder polls to drive ticks.
//! * [vgpu]: The virtual GPU handle and the idle placeholder.
//! * [error]: Defines the error type for the scheduler.
//!
//! Workload submission, context-switch mechanics and VM lifecycle are owned by
//! external collaborators: the embedder implements [`sched::WorkloadQueue`] and
//! feeds time into [`sched::SchedPolicy::on_timer`] from its own timer source.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;

pub mod error;
pub mod sched;
pub mod timer;
pub mod vgpu;

pub use error::{Error, ErrorKind, Result};
pub use sched::{EngineId, SchedPolicy, SchedStats, TbsScheduler, WorkloadQueue, SCHED_PERIOD_NS};
pub use vgpu::{Vgpu, IDLE_VGPU_ID};
