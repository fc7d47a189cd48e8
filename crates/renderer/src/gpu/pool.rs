use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::debug;

use super::TARGET_FORMAT;

pub type TargetId = u64;

/// An offscreen texture plus the view the GPU draws into. Owned by the
/// pool; passes hold clones of the handle only for the duration of one
/// render call.
#[derive(Clone)]
pub struct RenderTarget {
    pub id: TargetId,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

/// Two same-size targets alternately used as read source and write
/// destination across iterative passes.
pub struct PingPongPair {
    targets: [RenderTarget; 2],
    flip: usize,
}

impl PingPongPair {
    /// Toggles and returns the next write destination.
    pub fn next(&mut self) -> RenderTarget {
        self.flip = 1 - self.flip;
        self.targets[self.flip].clone()
    }

    pub fn ids(&self) -> [TargetId; 2] {
        [self.targets[0].id, self.targets[1].id]
    }
}

enum Checkout {
    Reuse(TargetId),
    Allocate(TargetId),
}

/// Pure bookkeeping behind the pool: free lists keyed by dimensions, the
/// in-flight set for the current frame, and the frame live-set consumed by
/// reclamation. Split out so the hand-out discipline is testable without a
/// GPU device.
#[derive(Default)]
struct PoolLedger {
    free: HashMap<(u32, u32), Vec<TargetId>>,
    in_flight: HashMap<TargetId, (u32, u32)>,
    frame_live: HashSet<TargetId>,
    next_id: TargetId,
    allocations: usize,
}

impl PoolLedger {
    fn alloc_id(&mut self) -> TargetId {
        self.next_id += 1;
        self.next_id
    }

    /// Returns every in-flight target to the free lists. The previous
    /// frame's kept output rejoins circulation here, at the top of the next
    /// frame, so a stable resolution reuses it instead of allocating.
    fn begin_frame(&mut self) {
        let ids: Vec<TargetId> = self.in_flight.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
        self.frame_live.clear();
    }

    fn checkout(&mut self, width: u32, height: u32, exclude: &HashSet<TargetId>) -> Checkout {
        if let Some(list) = self.free.get_mut(&(width, height)) {
            if let Some(pos) = list.iter().position(|id| !exclude.contains(id)) {
                let id = list.remove(pos);
                self.in_flight.insert(id, (width, height));
                self.frame_live.insert(id);
                return Checkout::Reuse(id);
            }
        }
        let id = self.alloc_id();
        self.allocations += 1;
        self.in_flight.insert(id, (width, height));
        self.frame_live.insert(id);
        Checkout::Allocate(id)
    }

    fn release(&mut self, id: TargetId) {
        if let Some(size) = self.in_flight.remove(&id) {
            self.free.entry(size).or_default().push(id);
        }
    }

    fn mark_live(&mut self, id: TargetId) {
        self.frame_live.insert(id);
    }

    fn end_frame(&mut self, keep: Option<TargetId>) -> HashSet<TargetId> {
        let mut live = std::mem::take(&mut self.frame_live);
        if let Some(id) = keep {
            live.insert(id);
        }
        let ids: Vec<TargetId> = self.in_flight.keys().copied().collect();
        for id in ids {
            if Some(id) != keep {
                self.release(id);
            }
        }
        live
    }

    /// Drops free-listed ids absent from `live`; returns them for resource
    /// deletion. In-flight targets are never reclaimed.
    fn reclaim_all_except(&mut self, live: &HashSet<TargetId>) -> Vec<TargetId> {
        let mut dropped = Vec::new();
        for list in self.free.values_mut() {
            list.retain(|id| {
                if live.contains(id) {
                    true
                } else {
                    dropped.push(*id);
                    false
                }
            });
        }
        self.free.retain(|_, list| !list.is_empty());
        self.allocations -= dropped.len();
        dropped
    }
}

/// Owns every pooled render target. Lends temporaries to passes during a
/// frame and reclaims targets the completed frame did not reference, which
/// bounds memory growth across resolution changes without reallocation
/// churn at a stable resolution.
pub struct RenderTargetPool {
    device: wgpu::Device,
    ledger: PoolLedger,
    targets: HashMap<TargetId, RenderTarget>,
    pairs: HashMap<(u32, u32), PingPongPair>,
}

impl RenderTargetPool {
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            ledger: PoolLedger::default(),
            targets: HashMap::new(),
            pairs: HashMap::new(),
        }
    }

    pub fn begin_frame(&mut self) {
        self.ledger.begin_frame();
    }

    /// Hands out an unused target of the requested size, allocating when the
    /// free lists hold none outside `exclude`. The target stays out of
    /// circulation until released or until the frame ends.
    pub fn acquire_temporary(
        &mut self,
        width: u32,
        height: u32,
        exclude: &HashSet<TargetId>,
    ) -> Result<RenderTarget> {
        match self.ledger.checkout(width, height, exclude) {
            Checkout::Reuse(id) => Ok(self.targets[&id].clone()),
            Checkout::Allocate(id) => {
                debug!(width, height, id, "allocating render target");
                let target = self.make_target(id, width, height)?;
                self.targets.insert(id, target.clone());
                Ok(target)
            }
        }
    }

    /// Returns a temporary to the free lists mid-frame. The id stays in the
    /// frame live-set, so reclamation will not delete it.
    pub fn release(&mut self, target: &RenderTarget) {
        self.ledger.release(target.id);
    }

    /// `release` by id, for callers holding a [`crate::PipelineState`]
    /// rather than the target itself.
    pub fn release_id(&mut self, id: TargetId) {
        self.ledger.release(id);
    }

    /// Stable two-buffer toggle for fixed-size iterative algorithms. Pairs
    /// persist across frames keyed by size; both members are marked live for
    /// the current frame on every access.
    pub fn ping_pong_pair(&mut self, width: u32, height: u32) -> Result<&mut PingPongPair> {
        if !self.pairs.contains_key(&(width, height)) {
            let a_id = self.ledger.alloc_id();
            let b_id = self.ledger.alloc_id();
            let a = self.make_target(a_id, width, height)?;
            let b = self.make_target(b_id, width, height)?;
            self.ledger.allocations += 2;
            debug!(width, height, "allocating ping-pong pair");
            self.pairs.insert(
                (width, height),
                PingPongPair {
                    targets: [a, b],
                    flip: 0,
                },
            );
        }
        let pair = self.pairs.get_mut(&(width, height)).expect("pair inserted above");
        self.ledger.mark_live(pair.targets[0].id);
        self.ledger.mark_live(pair.targets[1].id);
        Ok(pair)
    }

    /// Ends the frame, holding `keep` (the frame's final output) out of
    /// circulation, and returns the live-set for reclamation.
    pub fn end_frame(&mut self, keep: Option<TargetId>) -> HashSet<TargetId> {
        self.ledger.end_frame(keep)
    }

    /// Deletes every pooled target not referenced by `live`. Called once per
    /// completed frame.
    pub fn reclaim_all_except(&mut self, live: &HashSet<TargetId>) {
        for id in self.ledger.reclaim_all_except(live) {
            debug!(id, "reclaiming render target");
            self.targets.remove(&id);
        }
        let ledger = &mut self.ledger;
        self.pairs.retain(|size, pair| {
            let keep = pair.ids().iter().any(|id| live.contains(id));
            if !keep {
                debug!(width = size.0, height = size.1, "reclaiming ping-pong pair");
                ledger.allocations -= 2;
            }
            keep
        });
    }

    /// Live GPU allocations, pairs included. Exposed for tests.
    pub fn allocation_count(&self) -> usize {
        self.ledger.allocations
    }

    fn make_target(&self, id: TargetId, width: u32, height: u32) -> Result<RenderTarget> {
        // Allocation failure is fatal; surface it with the driver message
        // rather than degrading silently.
        self.device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pooled render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            anyhow::bail!("render target allocation failed ({width}x{height}): {err}");
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(RenderTarget {
            id,
            texture,
            view,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_exclude() -> HashSet<TargetId> {
        HashSet::new()
    }

    #[test]
    fn reuses_released_target_within_frame() {
        let mut ledger = PoolLedger::default();
        ledger.begin_frame();
        let first = match ledger.checkout(64, 64, &no_exclude()) {
            Checkout::Allocate(id) => id,
            Checkout::Reuse(_) => panic!("empty pool cannot reuse"),
        };
        ledger.release(first);
        match ledger.checkout(64, 64, &no_exclude()) {
            Checkout::Reuse(id) => assert_eq!(id, first),
            Checkout::Allocate(_) => panic!("released target should be reused"),
        }
        assert_eq!(ledger.allocations, 1);
    }

    #[test]
    fn exclusion_set_is_honored() {
        let mut ledger = PoolLedger::default();
        let id = match ledger.checkout(8, 8, &no_exclude()) {
            Checkout::Allocate(id) => id,
            Checkout::Reuse(_) => unreachable!(),
        };
        ledger.release(id);
        let exclude: HashSet<TargetId> = [id].into_iter().collect();
        match ledger.checkout(8, 8, &exclude) {
            Checkout::Allocate(other) => assert_ne!(other, id),
            Checkout::Reuse(_) => panic!("excluded target was handed out"),
        }
    }

    #[test]
    fn allocation_count_is_bounded_by_distinct_sizes_across_frames() {
        let mut ledger = PoolLedger::default();
        for _ in 0..5 {
            ledger.begin_frame();
            let a = match ledger.checkout(100, 50, &no_exclude()) {
                Checkout::Reuse(id) | Checkout::Allocate(id) => id,
            };
            let _b = match ledger.checkout(32, 32, &no_exclude()) {
                Checkout::Reuse(id) | Checkout::Allocate(id) => id,
            };
            let live = ledger.end_frame(Some(a));
            ledger.reclaim_all_except(&live);
        }
        assert_eq!(ledger.allocations, 2);
    }

    #[test]
    fn kept_output_survives_frame_end_and_rejoins_next_frame() {
        let mut ledger = PoolLedger::default();
        ledger.begin_frame();
        let out = match ledger.checkout(16, 16, &no_exclude()) {
            Checkout::Reuse(id) | Checkout::Allocate(id) => id,
        };
        let live = ledger.end_frame(Some(out));
        assert!(live.contains(&out));
        assert!(ledger.in_flight.contains_key(&out));

        ledger.begin_frame();
        match ledger.checkout(16, 16, &no_exclude()) {
            Checkout::Reuse(id) => assert_eq!(id, out),
            Checkout::Allocate(_) => panic!("kept output should circulate next frame"),
        }
    }

    #[test]
    fn reclaim_drops_stale_sizes_only() {
        let mut ledger = PoolLedger::default();
        ledger.begin_frame();
        let old = match ledger.checkout(640, 480, &no_exclude()) {
            Checkout::Reuse(id) | Checkout::Allocate(id) => id,
        };
        let live = ledger.end_frame(None);
        ledger.reclaim_all_except(&live);
        assert_eq!(ledger.allocations, 1);

        // Resolution change: the old size goes unused this frame.
        ledger.begin_frame();
        let new = match ledger.checkout(320, 240, &no_exclude()) {
            Checkout::Reuse(id) | Checkout::Allocate(id) => id,
        };
        assert_ne!(new, old);
        let live = ledger.end_frame(Some(new));
        let dropped = ledger.reclaim_all_except(&live);
        assert_eq!(dropped, vec![old]);
        assert_eq!(ledger.allocations, 1);
    }

    #[test]
    fn in_flight_targets_are_never_handed_out_twice() {
        let mut ledger = PoolLedger::default();
        ledger.begin_frame();
        let a = match ledger.checkout(8, 8, &no_exclude()) {
            Checkout::Reuse(id) | Checkout::Allocate(id) => id,
        };
        let b = match ledger.checkout(8, 8, &no_exclude()) {
            Checkout::Reuse(id) | Checkout::Allocate(id) => id,
        };
        assert_ne!(a, b);
    }
}
