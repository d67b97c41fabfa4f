//! The live half of the window manager: owns the X11 connection, becomes
//! the substructure-redirecting client on the root window, translates
//! [`super::Effect::ConfigureReal`]/`MapReal`/`UnmapReal`/`ResizeRoot` into
//! X requests, and decodes `CreateNotify`/`MapRequest`/`PropertyNotify`
//! into [`super::WindowManager::observe_window`] calls (§4.3, §6.5).

use anyhow::Context;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConfigureWindowAux, ConnectionExt as _, EventMask,
    Window,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use super::geometry::Size;
use super::Effect;

pub struct XConnection {
    conn: RustConnection,
    root: Window,
    wm_class_atom: Atom,
    default_root_size: Size,
}

impl XConnection {
    /// Connects to `DISPLAY` and becomes the window manager for the root
    /// window. Fails fatally (§7 `XFatal`) if another WM already holds
    /// substructure redirect.
    pub fn connect() -> anyhow::Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(None).context("failed to connect to the X server")?;
        let screen = conn.setup().roots[screen_num].clone();
        let root = screen.root;
        let default_root_size = Size {
            width: screen.width_in_pixels as u32,
            height: screen.height_in_pixels as u32,
        };

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::SUBSTRUCTURE_REDIRECT
                    | EventMask::SUBSTRUCTURE_NOTIFY
                    | EventMask::PROPERTY_CHANGE,
            ),
        )
        .context("failed to request substructure redirect")?
        .check()
        .context("another window manager is already running on this display")?;

        let wm_class_atom = conn
            .intern_atom(false, b"WM_CLASS")
            .context("failed to intern WM_CLASS")?
            .reply()?
            .atom;

        conn.flush()?;

        Ok(Self {
            conn,
            root,
            wm_class_atom,
            default_root_size,
        })
    }

    /// The display's default geometry, reported at connect time (§4.3.3
    /// "Root size", §6.5). Used as the root's geometry whenever no window
    /// is primary.
    pub fn default_root_size(&self) -> Size {
        self.default_root_size
    }

    pub fn file_descriptor(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.conn.stream().as_raw_fd()
    }

    /// Applies the X-facing half of a batch of effects. Virtual-window
    /// effects are skipped; the caller is responsible for deferring those
    /// via `run_later` (§4.3.5).
    pub fn apply(&self, effects: &[Effect]) -> anyhow::Result<()> {
        for effect in effects {
            match effect {
                Effect::ConfigureReal {
                    xid,
                    x,
                    y,
                    width,
                    height,
                } => {
                    self.conn.configure_window(
                        *xid,
                        &ConfigureWindowAux::new()
                            .x(*x)
                            .y(*y)
                            .width(*width)
                            .height(*height),
                    )?;
                }
                Effect::MapReal { xid } => {
                    self.conn.map_window(*xid)?;
                }
                Effect::UnmapReal { xid } => {
                    self.conn.unmap_window(*xid)?;
                }
                Effect::ResizeRoot { width, height } => {
                    self.resize_root(*width, *height)?;
                }
                Effect::VirtualSetGeometry { .. }
                | Effect::VirtualMap { .. }
                | Effect::VirtualUnmap { .. } => {}
            }
        }
        self.conn.flush()?;
        Ok(())
    }

    fn resize_root(&self, width: u32, height: u32) -> anyhow::Result<()> {
        // Xrandr's ScreenSize request reports both pixel and millimeter
        // dimensions; millimeters are derived assuming a nominal 96 DPI
        // since Neopult's virtual displays have no physical size.
        let mm_width = (width as f32 / 96.0 * 25.4) as u16;
        let mm_height = (height as f32 / 96.0 * 25.4) as u16;
        self.conn
            .randr_set_screen_size(self.root, width as u16, height as u16, mm_width, mm_height)?;
        Ok(())
    }

    /// Reads the next batch of X events without blocking past `timeout`.
    pub fn poll_events(&self) -> anyhow::Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.conn.poll_for_event()? {
            events.push(event);
        }
        Ok(events)
    }

    pub fn query_wm_class(&self, window: Window) -> anyhow::Result<Option<String>> {
        let reply = self
            .conn
            .get_property(false, window, self.wm_class_atom, AtomEnum::STRING, 0, 1024)?
            .reply()?;
        if reply.value.is_empty() {
            return Ok(None);
        }
        // WM_CLASS is two NUL-terminated strings: instance then class.
        // We surface the whole buffer (both parts) so `class_substring`
        // matching in §4.3.1 can match either half, like real window
        // managers do.
        let text = String::from_utf8_lossy(&reply.value).replace('\0', " ");
        Ok(Some(text.trim().to_string()))
    }
}
