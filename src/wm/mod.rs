//! C3 — the X11 window manager: claim/mode/primary-election/geometry logic
//! (§4.3). This module is pure state + a list of [`Effect`]s to apply; it
//! never touches an X connection or a Lua callback directly. [`connection`]
//! executes the X-facing half of an [`Effect`] against a live display;
//! virtual-window effects are instead queued onto the deferred-task queue
//! by the caller, satisfying the "callbacks must not reenter the WM, use
//! `run_later`" rule of §4.3.5.

pub mod connection;
pub mod geometry;
pub mod window;

use std::time::Instant;

use crate::script::handles::PluginInstanceKey;
use crate::slab::Slab;
use geometry::{root_geometry, Margins, MinGeometry, Size};
use window::{Backing, Mode, PrimaryDemotionAction, WindowEntry, WindowKey};

/// A side effect the manager wants applied. Real-window effects hit X
/// immediately (X cannot call back into us); virtual-window effects must
/// be deferred (§4.3.2, §4.3.5, §8 scenario S3).
#[derive(Debug, Clone)]
pub enum Effect {
    ConfigureReal {
        xid: u32,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    MapReal {
        xid: u32,
    },
    UnmapReal {
        xid: u32,
    },
    ResizeRoot {
        width: u32,
        height: u32,
    },
    VirtualSetGeometry {
        window: WindowKey,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        alignment: &'static str,
        z_index: u32,
    },
    VirtualMap {
        window: WindowKey,
    },
    VirtualUnmap {
        window: WindowKey,
    },
}

struct XWindowInfo {
    xid: u32,
    wm_class: String,
    map_order: u64,
}

/// A window a claim search settled on: still in the unmanaged pool, or
/// already under management and only reachable because the caller passed
/// `ignore_managed = true`.
#[derive(Debug, Clone, Copy)]
enum Candidate {
    Unmanaged(usize),
    ManagedReal(WindowKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingClaimId(u64);

struct PendingClaim {
    id: PendingClaimId,
    owner: PluginInstanceKey,
    class_substring: String,
    ignore_managed: bool,
    min_geometry: MinGeometry,
    deadline: Instant,
}

pub struct WindowManager {
    windows: Slab<WindowEntry>,
    max_stack: Vec<WindowKey>,
    min_order: Vec<WindowKey>,
    unmanaged: Vec<XWindowInfo>,
    next_map_order: u64,
    pending_claims: Vec<PendingClaim>,
    next_claim_id: u64,
    default_root_size: Size,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Satisfied {
        window: WindowKey,
        effects: Vec<Effect>,
    },
    TimedOut,
}

impl WindowManager {
    pub fn new(default_root_size: Size) -> Self {
        Self {
            windows: Slab::new(),
            max_stack: Vec::new(),
            min_order: Vec::new(),
            unmanaged: Vec::new(),
            next_map_order: 0,
            pending_claims: Vec::new(),
            next_claim_id: 0,
            default_root_size,
        }
    }

    // -- discovery -------------------------------------------------------

    /// Called when the X connection observes a new top-level window with a
    /// resolved `WM_CLASS` (a `CreateNotify`/`PropertyNotify` pair in the
    /// real connection). Returns any pending claims this satisfies.
    pub fn observe_window(
        &mut self,
        xid: u32,
        wm_class: String,
    ) -> Vec<(PendingClaimId, WindowKey, PluginInstanceKey, Vec<Effect>)> {
        let map_order = self.next_map_order;
        self.next_map_order += 1;
        self.unmanaged.push(XWindowInfo {
            xid,
            wm_class,
            map_order,
        });
        self.resolve_pending()
    }

    pub fn forget_unmanaged(&mut self, xid: u32) {
        self.unmanaged.retain(|w| w.xid != xid);
    }

    fn find_unmanaged(&self, class_substring: &str) -> Option<usize> {
        self.unmanaged
            .iter()
            .enumerate()
            .filter(|(_, w)| w.wm_class.contains(class_substring))
            .max_by_key(|(_, w)| w.map_order)
            .map(|(i, _)| i)
    }

    /// Among already-managed real windows, the one with matching `WM_CLASS`
    /// and the highest `map_order` — the pool `claim_window` with
    /// `ignore_managed = true` may additionally draw from (§4.3.1).
    fn find_managed_real(&self, class_substring: &str) -> Option<(WindowKey, u64)> {
        self.windows
            .iter()
            .filter_map(|(key, entry)| {
                let wm_class = entry.wm_class.as_ref()?;
                let map_order = entry.map_order?;
                wm_class.contains(class_substring).then_some((key, map_order))
            })
            .max_by_key(|(_, map_order)| *map_order)
    }

    /// Picks the best candidate for a claim: the most-recently-observed
    /// unmanaged window matching `class_substring`, or — when
    /// `ignore_managed` is set — whichever of that window and the
    /// most-recently-claimed already-managed real window with a matching
    /// class has the higher `map_order` (§4.3.1 "excluding windows already
    /// in the management table unless ignore_managed").
    fn find_candidate(&self, class_substring: &str, ignore_managed: bool) -> Option<Candidate> {
        let unmanaged = self.find_unmanaged(class_substring).map(|idx| {
            (Candidate::Unmanaged(idx), self.unmanaged[idx].map_order)
        });
        let managed = if ignore_managed {
            self.find_managed_real(class_substring)
                .map(|(key, order)| (Candidate::ManagedReal(key), order))
        } else {
            None
        };

        match (unmanaged, managed) {
            (Some((cand, order)), Some((cand2, order2))) => {
                Some(if order2 > order { cand2 } else { cand })
            }
            (Some((cand, _)), None) => Some(cand),
            (None, Some((cand, _))) => Some(cand),
            (None, None) => None,
        }
    }

    /// Builds a fresh [`WindowEntry`] claiming a window a [`Candidate`]
    /// resolved to, re-reading its xid/`WM_CLASS`/`map_order` from wherever
    /// it currently lives (the unmanaged pool, or — for `ignore_managed`
    /// re-claims — an existing management-table entry).
    fn claim_candidate(
        &mut self,
        owner: PluginInstanceKey,
        candidate: Candidate,
        min_geometry: MinGeometry,
    ) -> WindowKey {
        let (xid, wm_class, map_order) = match candidate {
            Candidate::Unmanaged(idx) => {
                let info = self.unmanaged.remove(idx);
                (info.xid, info.wm_class, info.map_order)
            }
            Candidate::ManagedReal(existing) => {
                let entry = self
                    .windows
                    .get(existing)
                    .expect("candidate came from a live scan of `windows`");
                let Backing::Real { xid } = &entry.backing else {
                    unreachable!("find_managed_real only yields Backing::Real entries")
                };
                (
                    *xid,
                    entry.wm_class.clone().unwrap_or_default(),
                    entry.map_order.unwrap_or(0),
                )
            }
        };
        self.windows
            .insert(WindowEntry::new_real(owner, xid, wm_class, map_order, min_geometry))
    }

    // -- claiming ----------------------------------------------------------

    /// Attempts an immediate claim. `None` means the caller should register
    /// a pending claim (if blocking is desired) via [`Self::register_pending`].
    pub fn try_claim(
        &mut self,
        owner: PluginInstanceKey,
        class_substring: &str,
        min_geometry: MinGeometry,
        ignore_managed: bool,
    ) -> Option<(WindowKey, Vec<Effect>)> {
        let candidate = self.find_candidate(class_substring, ignore_managed)?;
        let key = self.claim_candidate(owner, candidate, min_geometry);
        let effects = self.place_min(key);
        Some((key, effects))
    }

    pub fn register_pending(
        &mut self,
        owner: PluginInstanceKey,
        class_substring: String,
        ignore_managed: bool,
        min_geometry: MinGeometry,
        deadline: Instant,
    ) -> PendingClaimId {
        let id = PendingClaimId(self.next_claim_id);
        self.next_claim_id += 1;
        self.pending_claims.push(PendingClaim {
            id,
            owner,
            class_substring,
            ignore_managed,
            min_geometry,
            deadline,
        });
        id
    }

    /// Drains pending claims that are now satisfiable. Called whenever a
    /// new window is observed, and from the loop's idle tick for timeouts.
    fn resolve_pending(&mut self) -> Vec<(PendingClaimId, WindowKey, PluginInstanceKey, Vec<Effect>)> {
        let mut resolved = Vec::new();
        let mut remaining = Vec::new();
        // Taken rather than drained in place: the loop body calls back into
        // `self` (`find_candidate`, `claim_candidate`), which a live borrow
        // from `self.pending_claims.drain(..)` would conflict with.
        for pending in std::mem::take(&mut self.pending_claims) {
            match self.find_candidate(&pending.class_substring, pending.ignore_managed) {
                Some(candidate) => {
                    let key = self.claim_candidate(pending.owner, candidate, pending.min_geometry);
                    let effects = self.place_min(key);
                    resolved.push((pending.id, key, pending.owner, effects));
                }
                None => remaining.push(pending),
            }
        }
        self.pending_claims = remaining;
        resolved
    }

    /// Called periodically (once per idle tick, mirroring the teacher's
    /// `State::schedule` poll-until-true primitive) to expire timed-out
    /// claims. Returns the ids that timed out.
    pub fn expire_pending(&mut self, now: Instant) -> Vec<(PendingClaimId, PluginInstanceKey)> {
        let mut expired = Vec::new();
        self.pending_claims.retain(|pending| {
            if pending.deadline <= now {
                expired.push((pending.id, pending.owner));
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn has_pending_claims(&self) -> bool {
        !self.pending_claims.is_empty()
    }

    // -- virtual windows ---------------------------------------------------

    pub fn create_virtual_window(
        &mut self,
        owner: PluginInstanceKey,
        sink: Box<dyn window::VirtualWindowSink>,
        min_geometry: MinGeometry,
        demotion_policy: PrimaryDemotionAction,
    ) -> WindowKey {
        self.windows
            .insert(WindowEntry::new_virtual(owner, sink, min_geometry, demotion_policy))
    }

    // -- mode transitions (§4.3.3) ------------------------------------------

    pub fn max(&mut self, window: WindowKey, size: Size, margins: Margins) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.windows.get_mut(window) else {
            return effects;
        };
        let was_max = entry.mode == Mode::Max;
        entry.mode = Mode::Max;
        entry.max_size = Some(size);
        entry.max_margins = margins;

        if !was_max {
            self.remove_from_min_order(window);
            self.max_stack.push(window);
            self.reelect_after_promotion(&mut effects);
        } else if self.is_primary(window) {
            // Re-max of the current primary: refresh geometry/root in place.
            effects.extend(self.place_primary(window));
        }

        effects
    }

    pub fn min(&mut self, window: WindowKey) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.windows.get(window) else {
            return effects;
        };
        let was_primary = entry.mode == Mode::Max && self.is_primary(window);
        if let Some(entry) = self.windows.get_mut(window) {
            entry.mode = Mode::Min;
        }
        self.max_stack.retain(|&w| w != window);
        self.push_min_order(window);
        effects.extend(self.place_min(window));
        if was_primary {
            self.reelect_after_removal(&mut effects);
        }
        effects
    }

    pub fn hide(&mut self, window: WindowKey) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.windows.get(window) else {
            return effects;
        };
        let was_primary = entry.mode == Mode::Max && self.is_primary(window);
        if let Some(entry) = self.windows.get_mut(window) {
            entry.mode = Mode::Hidden;
        }
        self.remove_from_min_order(window);
        self.max_stack.retain(|&w| w != window);
        effects.extend(self.unmap_effect(window));
        if was_primary {
            self.reelect_after_removal(&mut effects);
        }
        effects
    }

    pub fn unclaim(&mut self, window: WindowKey) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = self.windows.get(window) else {
            return effects;
        };
        let was_primary = entry.mode == Mode::Max && self.is_primary(window);
        self.remove_from_min_order(window);
        self.max_stack.retain(|&w| w != window);
        if let Some(Backing::Real { xid }) = self.windows.get(window).map(|e| &e.backing) {
            self.unmanaged.retain(|w| w.xid != *xid);
        }
        self.windows.remove(window);
        if was_primary {
            self.reelect_after_removal(&mut effects);
        }
        effects
    }

    pub fn is_primary(&self, window: WindowKey) -> bool {
        self.max_stack.last() == Some(&window)
    }

    pub fn primary(&self) -> Option<WindowKey> {
        self.max_stack.last().copied()
    }

    pub fn root_size(&self) -> Size {
        let primary = self.primary().and_then(|key| {
            let entry = self.windows.get(key)?;
            Some((entry.max_size?, entry.max_margins))
        });
        root_geometry(primary, self.default_root_size)
    }

    /// Finds the managed window backed by a given real X window id, if any
    /// (§6.5; used to reconcile the management table when the underlying X
    /// window is destroyed out from under us).
    pub fn find_real_by_xid(&self, xid: u32) -> Option<WindowKey> {
        self.windows.iter().find_map(|(key, entry)| match &entry.backing {
            Backing::Real { xid: entry_xid } if *entry_xid == xid => Some(key),
            _ => None,
        })
    }

    pub fn owner_of(&self, window: WindowKey) -> Option<PluginInstanceKey> {
        self.windows.get(window).map(|e| e.owner)
    }

    pub fn mode_of(&self, window: WindowKey) -> Option<Mode> {
        self.windows.get(window).map(|e| e.mode)
    }

    // -- internals -----------------------------------------------------------

    /// A window was just pushed onto the back of `max_stack` (a min/hidden
    /// window was promoted to max). The element now one-from-the-back, if
    /// any, is the primary it displaced — still mode Max, since it did not
    /// itself change mode — and must run its demotion policy (§4.3.3,
    /// §4.3.4, §8 S3).
    fn reelect_after_promotion(&mut self, effects: &mut Vec<Effect>) {
        let new_primary = self.max_stack.last().copied();
        let displaced = self.max_stack.iter().rev().nth(1).copied();

        if let (Some(displaced), Some(new_primary)) = (displaced, new_primary) {
            if displaced != new_primary {
                self.apply_demotion_policy(displaced, effects);
            }
        }

        if let Some(primary) = self.max_stack.last().copied() {
            effects.extend(self.place_primary(primary));
        }
    }

    /// The previous primary just explicitly left max mode (or was
    /// unclaimed) and has already been removed from `max_stack`; place
    /// whichever window is now primary, or fall back to the default root
    /// geometry if none remains (§4.3.4).
    fn reelect_after_removal(&mut self, effects: &mut Vec<Effect>) {
        match self.max_stack.last().copied() {
            Some(primary) => effects.extend(self.place_primary(primary)),
            None => effects.push(Effect::ResizeRoot {
                width: self.default_root_size.width,
                height: self.default_root_size.height,
            }),
        }
    }

    fn apply_demotion_policy(&mut self, window: WindowKey, effects: &mut Vec<Effect>) {
        let Some(entry) = self.windows.get(window) else {
            return;
        };
        match entry.demotion_policy {
            PrimaryDemotionAction::DoNothing => {}
            PrimaryDemotionAction::MakeMin => {
                effects.extend(self.min(window));
            }
            PrimaryDemotionAction::Hide => {
                effects.extend(self.hide(window));
            }
        }
    }

    fn place_primary(&mut self, window: WindowKey) -> Vec<Effect> {
        let Some(entry) = self.windows.get(window) else {
            return Vec::new();
        };
        let Some(size) = entry.max_size else {
            return Vec::new();
        };
        let margins = entry.max_margins;
        let root = self.root_size();
        let mut effects = vec![Effect::ResizeRoot {
            width: root.width,
            height: root.height,
        }];
        match &entry.backing {
            Backing::Real { xid } => {
                effects.push(Effect::ConfigureReal {
                    xid: *xid,
                    x: margins.left as i32,
                    y: margins.top as i32,
                    width: size.width,
                    height: size.height,
                });
                effects.push(Effect::MapReal { xid: *xid });
            }
            Backing::Virtual { .. } => {
                effects.push(Effect::VirtualSetGeometry {
                    window,
                    x: margins.left as i32,
                    y: margins.top as i32,
                    width: size.width,
                    height: size.height,
                    alignment: "lt",
                    z_index: 0,
                });
                effects.push(Effect::VirtualMap { window });
            }
        }
        effects
    }

    fn place_min(&mut self, window: WindowKey) -> Vec<Effect> {
        let root = self.root_size();
        let Some(entry) = self.windows.get(window) else {
            return Vec::new();
        };
        let (x, y) = entry.min_geometry.placement(root.width, root.height);
        let width = entry.min_geometry.width;
        let height = entry.min_geometry.height;
        let alignment = entry.min_geometry.alignment();
        let z_index = self
            .min_order
            .iter()
            .position(|&w| w == window)
            .unwrap_or(self.min_order.len()) as u32;

        match &entry.backing {
            Backing::Real { xid } => vec![
                Effect::ConfigureReal {
                    xid: *xid,
                    x,
                    y,
                    width,
                    height,
                },
                Effect::MapReal { xid: *xid },
            ],
            Backing::Virtual { .. } => vec![
                Effect::VirtualSetGeometry {
                    window,
                    x,
                    y,
                    width,
                    height,
                    alignment,
                    z_index,
                },
                Effect::VirtualMap { window },
            ],
        }
    }

    fn unmap_effect(&self, window: WindowKey) -> Vec<Effect> {
        let Some(entry) = self.windows.get(window) else {
            return Vec::new();
        };
        match &entry.backing {
            Backing::Real { xid } => vec![Effect::UnmapReal { xid: *xid }],
            Backing::Virtual { .. } => vec![Effect::VirtualUnmap { window }],
        }
    }

    fn push_min_order(&mut self, window: WindowKey) {
        if !self.min_order.contains(&window) {
            self.min_order.push(window);
        }
    }

    fn remove_from_min_order(&mut self, window: WindowKey) {
        self.min_order.retain(|&w| w != window);
    }

    /// Runs the virtual-window half of an effect batch against the sink
    /// stored in each window's [`Backing::Virtual`]. Must only be called
    /// from the deferred-task queue, never from inside `max`/`min`/`hide`/
    /// `unclaim` themselves (§4.3.5) — a sink callback is free to call back
    /// into the window manager, and doing so while still inside one of
    /// those methods would reenter `&mut self`.
    pub fn invoke_virtual_effect(&self, effect: &Effect) {
        let window = match effect {
            Effect::VirtualSetGeometry { window, .. }
            | Effect::VirtualMap { window }
            | Effect::VirtualUnmap { window } => *window,
            _ => return,
        };
        let Some(entry) = self.windows.get(window) else {
            return;
        };
        let Backing::Virtual { sink } = &entry.backing else {
            return;
        };
        match effect {
            Effect::VirtualSetGeometry {
                x,
                y,
                width,
                height,
                alignment,
                z_index,
                ..
            } => sink.set_geometry(*x, *y, *width, *height, alignment, *z_index),
            Effect::VirtualMap { .. } => sink.map(),
            Effect::VirtualUnmap { .. } => sink.unmap(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::handles::PluginInstanceKey as PK;
    use crate::slab::Slab as GenericSlab;

    fn owner() -> PluginInstanceKey {
        let mut slab = GenericSlab::<()>::new();
        slab.insert(())
    }

    fn size(w: u32, h: u32) -> Size {
        Size {
            width: w,
            height: h,
        }
    }

    #[test]
    fn claim_places_window_in_min_mode() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "ssvncviewer".into());
        let (key, effects) = wm.try_claim(owner, "ssvncviewer", MinGeometry::default_min(), false).unwrap();
        assert_eq!(wm.mode_of(key), Some(Mode::Min));
        assert!(effects.iter().any(|e| matches!(e, Effect::MapReal { xid: 1 })));
    }

    #[test]
    fn claim_without_ignore_managed_does_not_see_already_managed_windows() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "ssvncviewer".into());
        wm.try_claim(owner, "ssvncviewer", MinGeometry::default_min(), false)
            .unwrap();
        assert!(wm
            .try_claim(owner, "ssvncviewer", MinGeometry::default_min(), false)
            .is_none());
    }

    #[test]
    fn claim_with_ignore_managed_reclaims_an_already_managed_window() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "ssvncviewer".into());
        let (first, _) = wm
            .try_claim(owner, "ssvncviewer", MinGeometry::default_min(), false)
            .unwrap();
        let (second, effects) = wm
            .try_claim(owner, "ssvncviewer", MinGeometry::default_min(), true)
            .unwrap();
        assert_ne!(first, second);
        assert!(effects.iter().any(|e| matches!(e, Effect::MapReal { xid: 1 })));
        // Both handles stay independently managed.
        assert_eq!(wm.mode_of(first), Some(Mode::Min));
        assert_eq!(wm.mode_of(second), Some(Mode::Min));
    }

    #[test]
    fn at_most_one_primary_and_most_recent_wins() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "a".into());
        wm.observe_window(2, "b".into());
        let (a, _) = wm.try_claim(owner, "a", MinGeometry::default_min(), false).unwrap();
        let (b, _) = wm.try_claim(owner, "b", MinGeometry::default_min(), false).unwrap();

        wm.max(a, size(1920, 1080), Margins::default());
        wm.max(b, size(1920, 1080), Margins::default());

        assert!(!wm.is_primary(a));
        assert!(wm.is_primary(b));

        wm.min(b);
        assert!(wm.is_primary(a));
        assert_eq!(wm.mode_of(b), Some(Mode::Min));
    }

    #[test]
    fn root_geometry_follows_primary_margins() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "a".into());
        let (a, _) = wm.try_claim(owner, "a", MinGeometry::default_min(), false).unwrap();
        let margins = Margins {
            top: 10,
            right: 20,
            bottom: 30,
            left: 40,
        };
        wm.max(a, size(1920, 1080), margins);
        assert_eq!(wm.root_size(), size(1980, 1120));
        wm.unclaim(a);
        assert_eq!(wm.root_size(), size(1024, 768));
    }

    #[test]
    fn claim_unclaim_is_idempotent_modulo_min_transition() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        wm.observe_window(1, "a".into());
        let (a, _) = wm.try_claim(owner, "a", MinGeometry::default_min(), false).unwrap();
        assert_eq!(wm.mode_of(a), Some(Mode::Min));
        wm.unclaim(a);
        assert_eq!(wm.mode_of(a), None);
        assert!(wm.primary().is_none());
    }

    struct RecordingSink {
        log: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl window::VirtualWindowSink for RecordingSink {
        fn set_geometry(&self, x: i32, y: i32, width: u32, height: u32, alignment: &str, z: u32) {
            self.log
                .borrow_mut()
                .push(format!("set_geometry {x} {y} {width} {height} {alignment} {z}"));
        }

        fn map(&self) {
            self.log.borrow_mut().push("map".into());
        }

        fn unmap(&self) {
            self.log.borrow_mut().push("unmap".into());
        }
    }

    #[test]
    fn displaced_primary_with_make_min_policy_is_demoted() {
        let mut wm = WindowManager::new(size(1024, 768));
        let owner = owner();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Box::new(RecordingSink { log: log.clone() });
        let virt = wm.create_virtual_window(
            owner,
            sink,
            MinGeometry::parse("320x240-0-0").unwrap(),
            PrimaryDemotionAction::MakeMin,
        );
        wm.max(virt, size(1280, 720), Margins::default());
        assert!(wm.is_primary(virt));

        wm.observe_window(9, "other".into());
        let (other, _) = wm.try_claim(owner, "other", MinGeometry::default_min(), false).unwrap();
        let effects = wm.max(other, size(1920, 1080), Margins::default());

        assert!(wm.is_primary(other));
        assert_eq!(wm.mode_of(virt), Some(Mode::Min));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::VirtualSetGeometry { window, .. } if *window == virt)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::VirtualMap { window } if *window == virt)));
    }
}
