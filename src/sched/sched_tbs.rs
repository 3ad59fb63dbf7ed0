// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// vgpu_sched is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::error::{ErrorKind, Result};
use crate::sched::{EngineId, SchedPolicy, SchedStats, WorkloadQueue};
use crate::timer::PeriodicTimer;
use crate::vgpu::{Vgpu, IDLE_VGPU_ID};

/// Default re-dispatch check period: 1 ms.
pub const SCHED_PERIOD_NS: u64 = 1_000_000;
/// Budgets are redistributed over one engine's run queue every 100 ms.
const TS_BALANCE_PERIOD_MS: u64 = 100;
/// Sub-periods per full balance cycle. Stage 0 resets every budget, stages
/// 1..9 re-add the allocation on top of whatever is left, so debt rolls
/// forward within a cycle but never across a reset.
const TS_BALANCE_STAGE_NUM: u64 = 10;

const NSEC_PER_MSEC: u64 = 1_000_000;

/// Per vgpu-per-engine scheduling accounts, owned by the scheduler arena.
struct VgpuSchedData {
    /// when this vgpu was most recently given the engine
    sched_in_ns: u64,
    /// running total of scheduled time on this engine
    actual_ns: u64,
    /// remaining budget for the current sub-period, may go negative
    left_ns: i64,
    /// budget assigned by the most recent balancer reset
    alloc_ns: i64,
    /// run-queue membership guard, a state is in at most one queue
    queued: bool,
}

impl VgpuSchedData {
    const fn new() -> Self {
        Self {
            sched_in_ns: 0,
            actual_ns: 0,
            left_ns: 0,
            alloc_ns: 0,
            queued: false,
        }
    }
}

struct VgpuEntry {
    vgpu: Vgpu,
    /// one state per engine, indexed by engine index
    data: Vec<VgpuSchedData>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Hand-off state of one engine, derived from its owner slots.
enum HandOff {
    NoNext,
    SameAsCurrent,
    SwitchInFlight,
    Switch,
}

/// Everything the global scheduler lock guards.
struct SchedState {
    num_engines: usize,
    /// single shared timestamp gating the balance pass for all engines
    last_balance_check_ns: u64,
    /// per-engine stage counter, counted modulo [`TS_BALANCE_STAGE_NUM`]
    stage_counter: Vec<u64>,
    /// per-engine run queue of vgpu ids, least-recently-scheduled first
    run_queue: Vec<VecDeque<usize>>,
    current: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
    /// tells the dispatch thread to stop feeding the outgoing vgpu
    need_reschedule: Vec<bool>,
    /// set between workload dispatch and completion notifications
    workload_inflight: Vec<bool>,
    vgpus: BTreeMap<usize, VgpuEntry>,
    timer: PeriodicTimer,
}

impl SchedState {
    /// Settle the accounts of the vgpu that held the engine since its last
    /// update. Must run before any budget-dependent decision for this tick.
    fn update_running_time(&mut self, vgpu_id: usize, engine: usize, now_ns: u64) {
        if vgpu_id == IDLE_VGPU_ID {
            return;
        }
        if let Some(entry) = self.vgpus.get_mut(&vgpu_id) {
            let data = &mut entry.data[engine];
            let delta = now_ns.saturating_sub(data.sched_in_ns);
            data.actual_ns += delta;
            data.left_ns -= delta as i64;
            data.sched_in_ns = now_ns;
        }
    }

    /// One balance stage for one engine: stage 0 recomputes every queued
    /// vgpu's fair share of the 100 ms window, the other stages re-add it.
    fn balance_timeslice(&mut self, engine: usize) {
        let stage = self.stage_counter[engine] % TS_BALANCE_STAGE_NUM;
        self.stage_counter[engine] += 1;

        let queued: Vec<usize> = self.run_queue[engine].iter().copied().collect();
        if stage == 0 {
            let total_weight: u64 = queued
                .iter()
                .filter_map(|id| self.vgpus.get(id))
                .map(|entry| entry.vgpu.weight() as u64)
                .sum();
            if total_weight == 0 && !queued.is_empty() {
                warn!("engine {}: total weight is 0, all queued vgpus get zero budget", engine);
            }
            let period_ns = TS_BALANCE_PERIOD_MS * NSEC_PER_MSEC;
            for id in queued {
                if let Some(entry) = self.vgpus.get_mut(&id) {
                    let fair_ns = if total_weight > 0 {
                        (period_ns * entry.vgpu.weight() as u64 / total_weight) as i64
                    } else {
                        0
                    };
                    let data = &mut entry.data[engine];
                    data.alloc_ns = fair_ns;
                    // debt from the previous cycle is discarded here
                    data.left_ns = fair_ns;
                }
            }
        } else {
            for id in queued {
                if let Some(entry) = self.vgpus.get_mut(&id) {
                    let data = &mut entry.data[engine];
                    data.left_ns += data.alloc_ns;
                }
            }
        }
    }

    fn enqueue(&mut self, engine: usize, vgpu_id: usize) {
        match self.vgpus.get_mut(&vgpu_id) {
            Some(entry) => {
                if entry.data[engine].queued {
                    warn!("vgpu {} is already queued on engine {}", vgpu_id, engine);
                    return;
                }
                entry.data[engine].queued = true;
            }
            None => return,
        }
        self.run_queue[engine].push_back(vgpu_id);
    }

    fn dequeue(&mut self, engine: usize, vgpu_id: usize) {
        match self.vgpus.get_mut(&vgpu_id) {
            Some(entry) => {
                if !entry.data[engine].queued {
                    return;
                }
                entry.data[engine].queued = false;
            }
            None => return,
        }
        let queue = &mut self.run_queue[engine];
        if let Some(idx) = queue.iter().position(|&id| id == vgpu_id) {
            queue.remove(idx);
        }
    }

    fn move_to_tail(&mut self, engine: usize, vgpu_id: usize) {
        let queue = &mut self.run_queue[engine];
        if let Some(idx) = queue.iter().position(|&id| id == vgpu_id) {
            queue.remove(idx);
            queue.push_back(vgpu_id);
        }
    }

    /// Scan the run queue oldest-scheduled first and return the first vgpu
    /// with pending work and a positive budget. Pure queue-order tie-break.
    fn find_candidate(&self, engine: usize, workload_queue: &dyn WorkloadQueue) -> Option<usize> {
        for &id in self.run_queue[engine].iter() {
            if !workload_queue.has_pending_workload(id, EngineId(engine)) {
                continue;
            }
            if let Some(entry) = self.vgpus.get(&id) {
                if entry.data[engine].left_ns > 0 {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Choose the next owner of the engine, falling back to the idle
    /// placeholder when the queue yields no eligible vgpu.
    fn pick_next(&mut self, engine: usize, workload_queue: &dyn WorkloadQueue) {
        // a previous tick already chose one awaiting hand-off
        if self.next[engine].is_some() {
            return;
        }
        if self.run_queue[engine].is_empty() {
            return;
        }
        match self.find_candidate(engine, workload_queue) {
            Some(id) => {
                self.next[engine] = Some(id);
                // least-favored for the next pick
                self.move_to_tail(engine, id);
            }
            None => {
                self.next[engine] = Some(IDLE_VGPU_ID);
            }
        }
    }

    fn hand_off_state(&self, engine: usize) -> HandOff {
        match self.next[engine] {
            None => HandOff::NoNext,
            Some(next) if Some(next) == self.current[engine] => HandOff::SameAsCurrent,
            Some(_) if self.workload_inflight[engine] => HandOff::SwitchInFlight,
            Some(_) => HandOff::Switch,
        }
    }

    /// Complete (or defer) the hand-off chosen by the picker.
    fn try_schedule_next(&mut self, engine: usize, now_ns: u64, workload_queue: &dyn WorkloadQueue) {
        match self.hand_off_state(engine) {
            HandOff::NoNext => {}
            HandOff::SameAsCurrent => {
                self.next[engine] = None;
            }
            HandOff::SwitchInFlight => {
                // pause dispatch for the outgoing vgpu; the switch is retried
                // on a later tick once the in-flight workload finishes
                self.need_reschedule[engine] = true;
            }
            HandOff::Switch => {
                self.need_reschedule[engine] = true;
                if let Some(cur) = self.current[engine] {
                    self.update_running_time(cur, engine, now_ns);
                }
                if let Some(next) = self.next[engine].take() {
                    if let Some(entry) = self.vgpus.get_mut(&next) {
                        entry.data[engine].sched_in_ns = now_ns;
                    }
                    trace!("engine {}: switch to vgpu {}", engine, next);
                    self.current[engine] = Some(next);
                }
                self.need_reschedule[engine] = false;
                workload_queue.wake_dispatch(EngineId(engine));
            }
        }
    }
}

/// Time-based-share scheduler: weighted time-slice allocation across vgpus
/// sharing a fixed set of hardware engines.
pub struct TbsScheduler {
    workload_queue: Arc<dyn WorkloadQueue>,
    /// timer-driven request, gates the balance pass
    request_sched: AtomicBool,
    /// event kicks, only coalesce redundant wake-ups
    request_event_sched: AtomicBool,
    state: Mutex<SchedState>,
}

impl TbsScheduler {
    /// Create a scheduler for `num_engines` engines, re-dispatching every
    /// `period_ns` (see [`SCHED_PERIOD_NS`]) and arm its periodic timer.
    pub fn new(num_engines: usize, period_ns: u64, workload_queue: Arc<dyn WorkloadQueue>) -> Result<Self> {
        if num_engines == 0 || period_ns == 0 {
            return ErrorKind::InvalidParam.into();
        }
        let mut timer = PeriodicTimer::new(period_ns);
        timer.arm(0);
        let state = SchedState {
            num_engines,
            last_balance_check_ns: 0,
            stage_counter: vec![0; num_engines],
            run_queue: (0..num_engines).map(|_| VecDeque::new()).collect(),
            current: vec![None; num_engines],
            next: vec![None; num_engines],
            need_reschedule: vec![false; num_engines],
            workload_inflight: vec![false; num_engines],
            vgpus: BTreeMap::new(),
            timer,
        };
        info!("tbs scheduler init ok, {} engines, period {} ns", num_engines, period_ns);
        Ok(Self {
            workload_queue,
            request_sched: AtomicBool::new(false),
            request_event_sched: AtomicBool::new(false),
            state: Mutex::new(state),
        })
    }
}

impl SchedPolicy for TbsScheduler {
    fn register_vgpu(&self, vgpu: &Vgpu) -> Result<()> {
        if vgpu.id() == IDLE_VGPU_ID || vgpu.weight() == 0 {
            return ErrorKind::InvalidParam.into();
        }
        let mut state = self.state.lock();
        if state.vgpus.contains_key(&vgpu.id()) {
            return ErrorKind::AlreadyExists.into();
        }
        let data = (0..state.num_engines).map(|_| VgpuSchedData::new()).collect();
        state.vgpus.insert(
            vgpu.id(),
            VgpuEntry {
                vgpu: vgpu.clone(),
                data,
            },
        );
        Ok(())
    }

    fn unregister_vgpu(&self, vgpu: &Vgpu) {
        let mut state = self.state.lock();
        if !state.vgpus.contains_key(&vgpu.id()) {
            warn!("unregister_vgpu: vgpu {} is not registered", vgpu.id());
            return;
        }
        for engine in 0..state.num_engines {
            state.dequeue(engine, vgpu.id());
            if state.next[engine] == Some(vgpu.id()) {
                state.next[engine] = None;
            }
            if state.current[engine] == Some(vgpu.id()) {
                // stop here and let the next tick pick a new owner
                state.current[engine] = None;
            }
        }
        state.vgpus.remove(&vgpu.id());
        if state.run_queue.iter().all(|queue| queue.is_empty()) {
            state.timer.cancel();
        }
    }

    fn start_scheduling(&self, vgpu: &Vgpu, now_ns: u64) {
        let mut state = self.state.lock();
        if !state.vgpus.contains_key(&vgpu.id()) {
            warn!("start_scheduling: vgpu {} is not registered", vgpu.id());
            return;
        }
        info!("vgpu {} starts scheduling", vgpu.id());
        for engine in 0..state.num_engines {
            state.enqueue(engine, vgpu.id());
        }
        state.timer.arm(now_ns);
    }

    fn stop_scheduling(&self, vgpu: &Vgpu) {
        let mut state = self.state.lock();
        if !state.vgpus.contains_key(&vgpu.id()) {
            warn!("stop_scheduling: vgpu {} is not registered", vgpu.id());
            return;
        }
        info!("vgpu {} stops scheduling", vgpu.id());
        for engine in 0..state.num_engines {
            state.dequeue(engine, vgpu.id());
            // never hand an engine to a dequeued vgpu
            if state.next[engine] == Some(vgpu.id()) {
                state.next[engine] = None;
            }
        }
        if state.run_queue.iter().all(|queue| queue.is_empty()) {
            state.timer.cancel();
        }
    }

    fn request_reschedule(&self) {
        self.request_event_sched.store(true, Ordering::Release);
    }

    fn has_pending_request(&self) -> bool {
        self.request_sched.load(Ordering::Acquire) || self.request_event_sched.load(Ordering::Acquire)
    }

    fn need_reschedule(&self, engine: EngineId) -> bool {
        let state = self.state.lock();
        if engine.index() >= state.num_engines {
            error!("need_reschedule: engine {} out of range", engine.index());
            return false;
        }
        state.need_reschedule[engine.index()]
    }

    fn notify_workload_dispatched(&self, engine: EngineId) {
        let mut state = self.state.lock();
        if engine.index() >= state.num_engines {
            error!("notify_workload_dispatched: engine {} out of range", engine.index());
            return;
        }
        state.workload_inflight[engine.index()] = true;
    }

    fn notify_workload_complete(&self, engine: EngineId) {
        {
            let mut state = self.state.lock();
            if engine.index() >= state.num_engines {
                error!("notify_workload_complete: engine {} out of range", engine.index());
                return;
            }
            state.workload_inflight[engine.index()] = false;
        }
        // a deferred switch is retried on the tick this flag provokes
        self.request_event_sched.store(true, Ordering::Release);
    }

    fn on_timer(&self, now_ns: u64) {
        let fired = self.state.lock().timer.poll(now_ns);
        if !fired {
            return;
        }
        self.request_sched.store(true, Ordering::Release);
        self.tick(now_ns);
    }

    fn tick(&self, now_ns: u64) {
        let mut state = self.state.lock();
        if self.request_sched.load(Ordering::Acquire)
            && now_ns.saturating_sub(state.last_balance_check_ns) >= TS_BALANCE_PERIOD_MS * NSEC_PER_MSEC
        {
            state.last_balance_check_ns = now_ns;
            for engine in 0..state.num_engines {
                state.balance_timeslice(engine);
            }
            self.request_sched.store(false, Ordering::Release);
        }
        self.request_event_sched.store(false, Ordering::Release);

        for engine in 0..state.num_engines {
            if let Some(cur) = state.current[engine] {
                state.update_running_time(cur, engine, now_ns);
            }
            state.pick_next(engine, self.workload_queue.as_ref());
            state.try_schedule_next(engine, now_ns, self.workload_queue.as_ref());
        }
    }

    fn current_owner(&self, engine: EngineId) -> Option<usize> {
        let state = self.state.lock();
        if engine.index() >= state.num_engines {
            error!("current_owner: engine {} out of range", engine.index());
            return None;
        }
        state.current[engine.index()]
    }

    fn sched_stats(&self, vgpu_id: usize, engine: EngineId) -> Option<SchedStats> {
        let state = self.state.lock();
        let entry = state.vgpus.get(&vgpu_id)?;
        let data = entry.data.get(engine.index())?;
        Some(SchedStats {
            actual_ns: data.actual_ns,
            left_ns: data.left_ns,
            alloc_ns: data.alloc_ns,
        })
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        state.timer.cancel();
        if !state.vgpus.is_empty() {
            warn!("teardown with {} vgpus still registered", state.vgpus.len());
        }
    }
}

impl Drop for TbsScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use core::sync::atomic::AtomicUsize;
    use rstest::rstest;

    const MS: u64 = NSEC_PER_MSEC;

    struct TestQueue {
        pending: Mutex<BTreeSet<(usize, usize)>>,
        wakes: AtomicUsize,
    }

    impl TestQueue {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(BTreeSet::new()),
                wakes: AtomicUsize::new(0),
            })
        }

        fn set_pending(&self, vgpu_id: usize, engine: usize, pending: bool) {
            let mut set = self.pending.lock();
            if pending {
                set.insert((vgpu_id, engine));
            } else {
                set.remove(&(vgpu_id, engine));
            }
        }

        fn wakes(&self) -> usize {
            self.wakes.load(Ordering::Relaxed)
        }
    }

    impl WorkloadQueue for TestQueue {
        fn has_pending_workload(&self, vgpu_id: usize, engine: EngineId) -> bool {
            self.pending.lock().contains(&(vgpu_id, engine.index()))
        }

        fn wake_dispatch(&self, _engine: EngineId) {
            self.wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Two registered vgpus, both continuously busy on a single engine.
    fn busy_pair(weights: (u32, u32)) -> (TbsScheduler, Arc<TestQueue>, Vgpu, Vgpu) {
        let queue = TestQueue::new();
        let sched = TbsScheduler::new(1, SCHED_PERIOD_NS, queue.clone()).unwrap();
        let a = Vgpu::new(1, weights.0);
        let b = Vgpu::new(2, weights.1);
        sched.register_vgpu(&a).unwrap();
        sched.register_vgpu(&b).unwrap();
        queue.set_pending(1, 0, true);
        queue.set_pending(2, 0, true);
        sched.start_scheduling(&a, 0);
        sched.start_scheduling(&b, 0);
        (sched, queue, a, b)
    }

    #[test]
    fn register_validates_id_and_weight() {
        let queue = TestQueue::new();
        let sched = TbsScheduler::new(2, SCHED_PERIOD_NS, queue).unwrap();

        let reserved = Vgpu::new(IDLE_VGPU_ID, 4);
        assert_eq!(
            sched.register_vgpu(&reserved).unwrap_err().kind(),
            ErrorKind::InvalidParam
        );

        let weightless = Vgpu::new(1, 0);
        assert_eq!(
            sched.register_vgpu(&weightless).unwrap_err().kind(),
            ErrorKind::InvalidParam
        );

        let vgpu = Vgpu::new(1, 4);
        sched.register_vgpu(&vgpu).unwrap();
        assert_eq!(
            sched.register_vgpu(&vgpu).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn new_rejects_degenerate_configs() {
        assert_eq!(
            TbsScheduler::new(0, SCHED_PERIOD_NS, TestQueue::new())
                .err()
                .unwrap()
                .kind(),
            ErrorKind::InvalidParam
        );
        assert_eq!(
            TbsScheduler::new(1, 0, TestQueue::new()).err().unwrap().kind(),
            ErrorKind::InvalidParam
        );
    }

    #[rstest]
    #[case::one_to_three((1, 3), (25, 75))]
    #[case::even((2, 2), (50, 50))]
    #[case::one_to_four((1, 4), (20, 80))]
    fn balancer_splits_period_by_weight(#[case] weights: (u32, u32), #[case] split_ms: (u64, u64)) {
        let (sched, _queue, _a, _b) = busy_pair(weights);

        // first timer fire past the balance period triggers a reset stage
        sched.on_timer(100 * MS);

        let s1 = sched.sched_stats(1, EngineId(0)).unwrap();
        let s2 = sched.sched_stats(2, EngineId(0)).unwrap();
        assert_eq!(s1.alloc_ns, (split_ms.0 * MS) as i64);
        assert_eq!(s2.alloc_ns, (split_ms.1 * MS) as i64);
    }

    #[test]
    fn full_cycle_resets_to_the_same_split() {
        let (sched, _queue, _a, _b) = busy_pair((1, 3));

        // run both to exhaustion through a full 10-stage cycle, then into the
        // next cycle's reset stage
        for t in 1..=1100 {
            sched.on_timer(t * MS);
        }

        let s1 = sched.sched_stats(1, EngineId(0)).unwrap();
        let s2 = sched.sched_stats(2, EngineId(0)).unwrap();
        assert_eq!(s1.alloc_ns, (25 * MS) as i64);
        assert_eq!(s2.alloc_ns, (75 * MS) as i64);
        // the tick that performed the reset also accounted up to one period
        // of running time against the engine's owner
        for stats in [s1, s2] {
            assert!(stats.left_ns >= stats.alloc_ns - MS as i64);
            assert!(stats.left_ns <= stats.alloc_ns);
        }
    }

    #[test]
    fn fairness_converges_to_weight_ratio() {
        let (sched, _queue, _a, _b) = busy_pair((1, 3));

        // the engine idles until the first balance pass at t = 100 ms, then
        // 1000 ms of continuously-busy scheduling follow
        for t in 1..=1100 {
            sched.on_timer(t * MS);
        }

        let s1 = sched.sched_stats(1, EngineId(0)).unwrap();
        let s2 = sched.sched_stats(2, EngineId(0)).unwrap();
        let tol = (10 * MS) as i64;
        assert!(
            (s1.actual_ns as i64 - (250 * MS) as i64).abs() <= tol,
            "vgpu 1 ran {} ns, expected about 250 ms",
            s1.actual_ns
        );
        assert!(
            (s2.actual_ns as i64 - (750 * MS) as i64).abs() <= tol,
            "vgpu 2 ran {} ns, expected about 750 ms",
            s2.actual_ns
        );
        // accumulated time only ever advances for the single current owner
        let total = s1.actual_ns + s2.actual_ns;
        assert!(total <= 1000 * MS && total >= 980 * MS, "total was {} ns", total);
    }

    #[test]
    fn idle_fallback_when_no_budget() {
        let (sched, _queue, _a, _b) = busy_pair((1, 3));

        // no balance pass has run yet, both budgets are zero
        sched.request_reschedule();
        sched.tick(1 * MS);

        assert_eq!(sched.current_owner(EngineId(0)), Some(IDLE_VGPU_ID));
    }

    #[test]
    fn idle_fallback_when_no_pending_work() {
        let (sched, queue, _a, _b) = busy_pair((1, 3));

        sched.on_timer(100 * MS);
        assert_eq!(sched.current_owner(EngineId(0)), Some(1));

        queue.set_pending(1, 0, false);
        queue.set_pending(2, 0, false);
        sched.on_timer(101 * MS);
        sched.on_timer(102 * MS);

        assert_eq!(sched.current_owner(EngineId(0)), Some(IDLE_VGPU_ID));
    }

    #[test]
    fn no_double_queue_after_start_stop_sequences() {
        let (sched, _queue, a, b) = busy_pair((1, 3));

        // double start must not duplicate the run-queue entry
        sched.start_scheduling(&a, 0);
        {
            let state = sched.state.lock();
            let hits = state.run_queue[0].iter().filter(|&&id| id == 1).count();
            assert_eq!(hits, 1);
        }

        sched.stop_scheduling(&a);
        sched.stop_scheduling(&a);
        sched.start_scheduling(&a, 0);
        {
            let state = sched.state.lock();
            let hits = state.run_queue[0].iter().filter(|&&id| id == 1).count();
            assert_eq!(hits, 1);
            assert_eq!(state.run_queue[0].len(), 2);
        }

        sched.stop_scheduling(&a);
        sched.stop_scheduling(&b);
        let state = sched.state.lock();
        assert!(state.run_queue[0].is_empty());
        assert!(!state.timer.is_armed());
    }

    #[test]
    fn reset_discards_debt_carry_over_preserves_it() {
        let (sched, _queue, _a, _b) = busy_pair((1, 3));
        let mut state = sched.state.lock();

        state.balance_timeslice(0);
        let alloc = state.vgpus.get(&1).unwrap().data[0].alloc_ns;
        assert_eq!(alloc, (25 * MS) as i64);

        // debt rolls forward within the cycle
        state.vgpus.get_mut(&1).unwrap().data[0].left_ns = -(5 * MS as i64);
        state.balance_timeslice(0);
        assert_eq!(state.vgpus.get(&1).unwrap().data[0].left_ns, alloc - 5 * MS as i64);

        // stages 2..9, then the next reset stage drops the debt entirely
        for _ in 2..TS_BALANCE_STAGE_NUM {
            state.balance_timeslice(0);
        }
        state.vgpus.get_mut(&1).unwrap().data[0].left_ns = -(7 * MS as i64);
        state.balance_timeslice(0);
        assert_eq!(state.vgpus.get(&1).unwrap().data[0].left_ns, alloc);
    }

    #[test]
    fn deferred_switch_completes_after_workload_completion() {
        let (sched, queue, _a, _b) = busy_pair((1, 1));

        sched.on_timer(100 * MS);
        assert_eq!(sched.current_owner(EngineId(0)), Some(1));
        let wakes_after_first_switch = queue.wakes();

        // vgpu 1 has a workload on the hardware and nothing more to submit
        sched.notify_workload_dispatched(EngineId(0));
        queue.set_pending(1, 0, false);

        sched.request_reschedule();
        sched.tick(101 * MS);

        // switch to vgpu 2 is deferred, dispatch is told to pause
        assert_eq!(sched.current_owner(EngineId(0)), Some(1));
        assert!(sched.need_reschedule(EngineId(0)));
        assert_eq!(queue.wakes(), wakes_after_first_switch);

        sched.notify_workload_complete(EngineId(0));
        assert!(sched.has_pending_request());
        sched.tick(102 * MS);

        assert_eq!(sched.current_owner(EngineId(0)), Some(2));
        assert!(!sched.need_reschedule(EngineId(0)));
        assert!(queue.wakes() > wakes_after_first_switch);
        let state = sched.state.lock();
        assert_eq!(state.next[0], None);
    }

    #[test]
    fn unregister_clears_owner_slots() {
        let (sched, _queue, a, _b) = busy_pair((1, 3));

        sched.on_timer(100 * MS);
        assert_eq!(sched.current_owner(EngineId(0)), Some(1));

        sched.unregister_vgpu(&a);
        assert_eq!(sched.current_owner(EngineId(0)), None);
        assert!(sched.sched_stats(1, EngineId(0)).is_none());

        // the survivor takes over on the next tick
        sched.request_reschedule();
        sched.tick(101 * MS);
        assert_eq!(sched.current_owner(EngineId(0)), Some(2));
    }

    #[test]
    fn owner_is_unique_across_engines() {
        let queue = TestQueue::new();
        let sched = TbsScheduler::new(2, SCHED_PERIOD_NS, queue.clone()).unwrap();
        let a = Vgpu::new(1, 1);
        let b = Vgpu::new(2, 1);
        sched.register_vgpu(&a).unwrap();
        sched.register_vgpu(&b).unwrap();
        for engine in 0..2 {
            queue.set_pending(1, engine, true);
            queue.set_pending(2, engine, true);
        }
        sched.start_scheduling(&a, 0);
        sched.start_scheduling(&b, 0);

        for t in 1..=300 {
            sched.on_timer(t * MS);
            for engine in 0..2 {
                let owner = sched.current_owner(EngineId(engine));
                assert!(matches!(owner, None | Some(IDLE_VGPU_ID) | Some(1) | Some(2)));
            }
        }
        // both engines balanced and handed off independently
        assert!(sched.current_owner(EngineId(0)).is_some());
        assert!(sched.current_owner(EngineId(1)).is_some());
    }

    #[test]
    fn teardown_cancels_timer() {
        let (sched, _queue, a, b) = busy_pair((1, 3));
        sched.stop_scheduling(&a);
        sched.stop_scheduling(&b);
        sched.unregister_vgpu(&a);
        sched.unregister_vgpu(&b);
        sched.teardown();
        let state = sched.state.lock();
        assert!(!state.timer.is_armed());
        assert!(state.vgpus.is_empty());
    }

    #[test]
    fn out_of_range_engine_is_ignored() {
        let (sched, _queue, _a, _b) = busy_pair((1, 3));
        sched.notify_workload_dispatched(EngineId(7));
        sched.notify_workload_complete(EngineId(7));
        assert_eq!(sched.current_owner(EngineId(7)), None);
        assert!(!sched.need_reschedule(EngineId(7)));
    }
}
