// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// vgpu_sched is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use alloc::sync::Arc;

/// Id reserved for the idle placeholder, the always-available vgpu an engine
/// falls back to when no real vgpu is eligible. Real vgpus use ids above it.
pub const IDLE_VGPU_ID: usize = 0;

struct VgpuInner {
    id: usize,      // stable vgpu id
    weight: u32,    // relative share, immutable for the instance's lifetime
}

#[derive(Clone)]
/// Virtual GPU handle struct
///
/// The vgpu itself is owned by the surrounding VM-lifecycle subsystem; the
/// scheduler only ever holds clones of this handle. All mutable scheduling
/// state lives in the scheduler's own arena, keyed by [`Vgpu::id`].
pub struct Vgpu {
    inner: Arc<VgpuInner>,
}

impl PartialEq for Vgpu {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Vgpu {
    pub fn new(id: usize, weight: u32) -> Self {
        Self {
            inner: Arc::new(VgpuInner { id, weight }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn weight(&self) -> u32 {
        self.inner.weight
    }

    pub fn is_idle(&self) -> bool {
        self.inner.id == IDLE_VGPU_ID
    }
}

impl core::fmt::Debug for Vgpu {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Vgpu")
            .field("id", &self.inner.id)
            .field("weight", &self.inner.weight)
            .finish()
    }
}
