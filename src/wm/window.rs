//! Window handles, modes, and the virtual-window callback seam (§3,
//! §4.3.2, §4.3.3).

use crate::script::handles::PluginInstanceKey;
use crate::slab::Key;
use crate::wm::geometry::{Margins, MinGeometry, Size};

pub type WindowKey = Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Max,
    Min,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryDemotionAction {
    #[default]
    DoNothing,
    MakeMin,
    Hide,
}

/// What the window manager must *do* to place a window: issue X requests
/// for a real window, or invoke script-provided callbacks for a virtual one
/// (§4.3.2). The window manager never talks to Lua directly; it calls this
/// trait, which the scripting bridge implements over a registered Lua
/// callback table.
pub trait VirtualWindowSink {
    fn set_geometry(&self, x: i32, y: i32, width: u32, height: u32, alignment: &str, z_index: u32);
    fn map(&self);
    fn unmap(&self);
}

pub enum Backing {
    Real { xid: u32 },
    Virtual { sink: Box<dyn VirtualWindowSink> },
}

pub struct WindowEntry {
    pub owner: PluginInstanceKey,
    pub backing: Backing,
    pub mode: Mode,
    pub min_geometry: MinGeometry,
    pub max_size: Option<Size>,
    pub max_margins: Margins,
    pub demotion_policy: PrimaryDemotionAction,
    /// `WM_CLASS` and creation order of a real window, carried over from
    /// [`super::XWindowInfo`] at claim time so a later `claim_window` with
    /// `ignore_managed = true` can still find and re-match it (§4.3.1).
    /// `None` for virtual windows.
    pub wm_class: Option<String>,
    pub map_order: Option<u64>,
}

impl WindowEntry {
    pub fn new_real(
        owner: PluginInstanceKey,
        xid: u32,
        wm_class: String,
        map_order: u64,
        min_geometry: MinGeometry,
    ) -> Self {
        Self {
            owner,
            backing: Backing::Real { xid },
            mode: Mode::Min,
            min_geometry,
            max_size: None,
            max_margins: Margins::default(),
            demotion_policy: PrimaryDemotionAction::DoNothing,
            wm_class: Some(wm_class),
            map_order: Some(map_order),
        }
    }

    pub fn new_virtual(
        owner: PluginInstanceKey,
        sink: Box<dyn VirtualWindowSink>,
        min_geometry: MinGeometry,
        demotion_policy: PrimaryDemotionAction,
    ) -> Self {
        Self {
            owner,
            backing: Backing::Virtual { sink },
            mode: Mode::Hidden,
            min_geometry,
            max_size: None,
            max_margins: Margins::default(),
            demotion_policy,
            wm_class: None,
            map_order: None,
        }
    }
}
