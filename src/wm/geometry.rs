//! Geometry descriptors used by the window manager (§3, §4.3.3).

lazy_static::lazy_static! {
    /// Implementation-defined default min geometry (§4.3.1), parsed once at
    /// first use rather than on every claim without a `min_geometry`
    /// override (SPEC_FULL.md "Configuration & bootstrap" — process-wide
    /// globals held behind `lazy_static`, matching the teacher).
    static ref DEFAULT_MIN_GEOMETRY: MinGeometry =
        MinGeometry::parse("480x360-0-0").expect("default min geometry literal is well-formed");
}

/// A corner-anchored rectangle: `WxH±X±Y`, e.g. `480x360-0-0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinGeometry {
    pub width: u32,
    pub height: u32,
    pub x_offset: i32,
    pub y_offset: i32,
    /// `true` when the x offset is measured from the right edge.
    pub x_from_right: bool,
    /// `true` when the y offset is measured from the bottom edge.
    pub y_from_bottom: bool,
}

impl MinGeometry {
    /// Implementation-defined default: a small rectangle anchored to the
    /// bottom-right corner — both offsets in `480x360-0-0` are `-`, which
    /// anchors from the right/bottom edge at zero offset (§4.3.1, §9 Open
    /// Question 3).
    pub fn default_min() -> Self {
        *DEFAULT_MIN_GEOMETRY
    }

    /// The `lt|rt|rb|lb` alignment tag delivered to virtual windows
    /// (§4.3.3).
    pub fn alignment(&self) -> &'static str {
        match (self.x_from_right, self.y_from_bottom) {
            (false, false) => "lt",
            (true, false) => "rt",
            (true, true) => "rb",
            (false, true) => "lb",
        }
    }

    /// Computes the top-left placement of this geometry within a root of
    /// the given size.
    pub fn placement(&self, root_width: u32, root_height: u32) -> (i32, i32) {
        let x = if self.x_from_right {
            root_width as i32 - self.width as i32 - self.x_offset
        } else {
            self.x_offset
        };
        let y = if self.y_from_bottom {
            root_height as i32 - self.height as i32 - self.y_offset
        } else {
            self.y_offset
        };
        (x, y)
    }

    pub fn parse(descriptor: &str) -> Option<Self> {
        let (dims, rest) = descriptor.split_once(['+', '-']).map(|(dims, _)| {
            let split_at = dims.len();
            (dims, &descriptor[split_at..])
        })?;
        let (width, height) = dims.split_once('x')?;
        let width: u32 = width.parse().ok()?;
        let height: u32 = height.parse().ok()?;

        let (x_from_right, rest) = match rest.as_bytes().first()? {
            b'+' => (false, &rest[1..]),
            b'-' => (true, &rest[1..]),
            _ => return None,
        };
        let y_sign_index = rest.find(['+', '-'])?;
        let x_offset: i32 = rest[..y_sign_index].parse().ok()?;
        let (y_from_bottom, y_str) = match rest.as_bytes().get(y_sign_index)? {
            b'+' => (false, &rest[y_sign_index + 1..]),
            b'-' => (true, &rest[y_sign_index + 1..]),
            _ => return None,
        };
        let y_offset: i32 = y_str.parse().ok()?;

        Some(Self {
            width,
            height,
            x_offset,
            y_offset,
            x_from_right,
            y_from_bottom,
        })
    }
}

/// Margins around a maxed primary window (§4.3.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Margins {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// The root window's geometry law (§4.3.3, §8 property 3).
pub fn root_geometry(primary: Option<(Size, Margins)>, default: Size) -> Size {
    match primary {
        Some((size, margins)) => Size {
            width: size.width + margins.left + margins.right,
            height: size.height + margins.top + margins.bottom,
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bottom_right_descriptor() {
        let g = MinGeometry::parse("480x360-0-0").unwrap();
        assert_eq!(g.width, 480);
        assert_eq!(g.height, 360);
        assert_eq!(g.alignment(), "rb");
    }

    #[test]
    fn parses_mixed_sign_descriptor() {
        let g = MinGeometry::parse("320x240+10-20").unwrap();
        assert_eq!(g.x_offset, 10);
        assert!(!g.x_from_right);
        assert_eq!(g.y_offset, 20);
        assert!(g.y_from_bottom);
        assert_eq!(g.alignment(), "lb");
    }

    #[test]
    fn placement_anchors_to_requested_corner() {
        let g = MinGeometry::parse("100x50-0-0").unwrap();
        assert_eq!(g.placement(1920, 1080), (1820, 1030));
        let g = MinGeometry::parse("100x50+0+0").unwrap();
        assert_eq!(g.placement(1920, 1080), (0, 0));
    }

    #[test]
    fn root_geometry_law() {
        let size = Size {
            width: 1920,
            height: 1080,
        };
        let margins = Margins {
            top: 10,
            right: 20,
            bottom: 30,
            left: 40,
        };
        let default = Size {
            width: 1024,
            height: 768,
        };
        assert_eq!(
            root_geometry(Some((size, margins)), default),
            Size {
                width: 1980,
                height: 1120
            }
        );
        assert_eq!(root_geometry(None, default), default);
    }
}
