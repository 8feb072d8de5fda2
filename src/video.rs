//! Firmware video-mode capability and the `exactly`/`at-least` picker (spec §4.6).
//!
//! The teacher talks to real VESA BIOS calls (`bios/flib/src/video_io/vesa/mode.rs`'s
//! `VbeInfoBlock`/`ModeInfoBlock`, real-mode `int 0x10` thunks) to enumerate and set modes.
//! None of that firmware plumbing belongs here; `VideoMode`'s fields are named after
//! `ModeInfoBlock`'s `width`/`height`/`bits_per_pixel`/`framebuffer` so a BIOS- or UEFI-GOP-backed
//! `VideoServices` implementation maps onto it directly, but the capability itself is a plain
//! trait so the picker is host-testable.

use crate::error::ResourceError;
use crate::mem::addr::PhyAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct FramebufferDescriptor {
    pub address: PhyAddr,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
    pub pitch: u32,
}

/// The firmware-facing video capability: native resolution, mode enumeration, and mode set.
pub trait VideoServices {
    fn native_resolution(&self) -> (u32, u32);

    /// All modes the firmware can enumerate, in firmware-native (source) order.
    fn modes(&self) -> &[VideoMode];

    /// Set the given mode and return its framebuffer descriptor.
    fn set_mode(&mut self, mode: VideoMode) -> Option<FramebufferDescriptor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Exactly,
    AtLeast,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoRequest {
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
    pub constraint: Constraint,
}

impl VideoRequest {
    /// The `"auto"` default: 1024x768 @ 32bpp, `at-least`.
    pub const AUTO: Self = Self {
        width: 1024,
        height: 768,
        bpp: 32,
        constraint: Constraint::AtLeast,
    };
}

/// Select a mode per spec §4.6: `exactly` takes the first exact match; `at-least` keeps the
/// last mode that is at least the requested size/depth and at most the native resolution,
/// preserving whatever order `modes` reports them in.
pub fn pick_mode(services: &dyn VideoServices, request: VideoRequest) -> Result<VideoMode, ResourceError> {
    let (native_w, native_h) = services.native_resolution();

    match request.constraint {
        Constraint::Exactly => services
            .modes()
            .iter()
            .find(|m| m.width == request.width && m.height == request.height && m.bpp == request.bpp)
            .copied()
            .ok_or(ResourceError::NoMatchingVideoMode),
        Constraint::AtLeast => {
            let mut winner = None;
            for m in services.modes() {
                let meets_request = m.width >= request.width && m.height >= request.height && m.bpp >= request.bpp;
                let within_native = m.width <= native_w && m.height <= native_h;
                if meets_request && within_native {
                    winner = Some(*m);
                }
            }
            winner.ok_or(ResourceError::NoMatchingVideoMode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockVideoServices {
        native: (u32, u32),
        modes: alloc::vec::Vec<VideoMode>,
    }

    impl VideoServices for MockVideoServices {
        fn native_resolution(&self) -> (u32, u32) {
            self.native
        }

        fn modes(&self) -> &[VideoMode] {
            &self.modes
        }

        fn set_mode(&mut self, mode: VideoMode) -> Option<FramebufferDescriptor> {
            Some(FramebufferDescriptor {
                address: PhyAddr::new(0xE000_0000),
                width: mode.width,
                height: mode.height,
                bpp: mode.bpp,
                pitch: mode.width * u32::from(mode.bpp / 8),
            })
        }
    }

    #[test]
    fn exactly_picks_first_exact_match() {
        let svc = MockVideoServices {
            native: (1920, 1080),
            modes: alloc::vec![
                VideoMode { id: 1, width: 800, height: 600, bpp: 32 },
                VideoMode { id: 2, width: 1024, height: 768, bpp: 32 },
                VideoMode { id: 3, width: 1024, height: 768, bpp: 32 },
            ],
        };
        let req = VideoRequest { width: 1024, height: 768, bpp: 32, constraint: Constraint::Exactly };
        let picked = pick_mode(&svc, req).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn at_least_keeps_last_qualifying_candidate() {
        let svc = MockVideoServices {
            native: (1920, 1080),
            modes: alloc::vec![
                VideoMode { id: 1, width: 1024, height: 768, bpp: 32 },
                VideoMode { id: 2, width: 1280, height: 720, bpp: 32 },
                VideoMode { id: 3, width: 1920, height: 1080, bpp: 32 },
                VideoMode { id: 4, width: 3840, height: 2160, bpp: 32 },
            ],
        };
        let req = VideoRequest { width: 1024, height: 768, bpp: 24, constraint: Constraint::AtLeast };
        let picked = pick_mode(&svc, req).unwrap();
        assert_eq!(picked.id, 3);
    }

    #[test]
    fn no_matching_mode_is_fatal() {
        let svc = MockVideoServices {
            native: (1024, 768),
            modes: alloc::vec![VideoMode { id: 1, width: 640, height: 480, bpp: 16 }],
        };
        let req = VideoRequest { width: 1920, height: 1080, bpp: 32, constraint: Constraint::Exactly };
        assert!(pick_mode(&svc, req).is_err());
    }

    #[test]
    fn auto_request_matches_spec_defaults() {
        assert_eq!(VideoRequest::AUTO.width, 1024);
        assert_eq!(VideoRequest::AUTO.height, 768);
        assert_eq!(VideoRequest::AUTO.bpp, 32);
        assert_eq!(VideoRequest::AUTO.constraint, Constraint::AtLeast);
    }
}
