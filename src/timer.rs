// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// vgpu_sched is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Periodic timer abstraction driving the scheduler tick.
//!
//! The embedder owns the actual time source (an hrtimer, a host timer thread,
//! a test loop) and polls this state on every interrupt. Cancellation is
//! explicit so teardown never leaves an armed timer referencing freed state.

/// Software state of the periodic scheduler timer.
pub struct PeriodicTimer {
    period_ns: u64,
    next_fire_ns: u64,
    armed: bool,
}

impl PeriodicTimer {
    pub fn new(period_ns: u64) -> Self {
        Self {
            period_ns,
            next_fire_ns: 0,
            armed: false,
        }
    }

    /// Arm the timer to fire one period from `now_ns`. No-op while armed.
    pub fn arm(&mut self, now_ns: u64) {
        if self.armed {
            return;
        }
        self.armed = true;
        self.next_fire_ns = now_ns + self.period_ns;
    }

    pub fn cancel(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Check whether the timer is due at `now_ns`, re-arming for the next
    /// period when it is. A late poll yields a single fire, never a burst.
    pub fn poll(&mut self, now_ns: u64) -> bool {
        if !self.armed || now_ns < self.next_fire_ns {
            return false;
        }
        self.next_fire_ns = now_ns + self.period_ns;
        true
    }
}
