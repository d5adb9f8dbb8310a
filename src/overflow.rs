//! Detects content that spills past a surface's expected box. Diagnostic only: the guard
//! marks the surface and reports, it never resizes or rescales anything.

use crate::capture::SurfaceHandle;
use serde::Serialize;
use tracing::warn;

/// Measured box of a rendered surface, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceExtent {
    pub scroll_width: u32,
    pub scroll_height: u32,
    pub client_width: u32,
    pub client_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverflowReport {
    pub pass: bool,
    pub overflow_width: u32,
    pub overflow_height: u32,
}

pub trait OverflowProbe: Send + Sync {
    fn measure(&self, surface: &SurfaceHandle) -> SurfaceExtent;
    /// Adds a visible marker to a surface that failed the check.
    fn annotate(&self, surface: &SurfaceHandle, report: &OverflowReport);
}

pub struct OverflowGuard;

impl OverflowGuard {
    pub fn check(
        probe: &dyn OverflowProbe,
        surface: &SurfaceHandle,
        expected_width: u32,
        expected_height: u32,
    ) -> OverflowReport {
        let report = Self::evaluate(probe.measure(surface), expected_width, expected_height);
        if !report.pass {
            warn!(
                surface = %surface.id,
                overflow_width = report.overflow_width,
                overflow_height = report.overflow_height,
                expected_width,
                expected_height,
                "surface content overflows its box"
            );
            probe.annotate(surface, &report);
        }
        report
    }

    pub fn evaluate(extent: SurfaceExtent, expected_width: u32, expected_height: u32) -> OverflowReport {
        let overflow_width = axis_overflow(extent.scroll_width, extent.client_width, expected_width);
        let overflow_height =
            axis_overflow(extent.scroll_height, extent.client_height, expected_height);
        OverflowReport {
            pass: overflow_width == 0 && overflow_height == 0,
            overflow_width,
            overflow_height,
        }
    }
}

fn axis_overflow(scroll: u32, client: u32, expected: u32) -> u32 {
    let internal = scroll.saturating_sub(client);
    let external = scroll.max(client).saturating_sub(expected);
    internal.max(external)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOverflowProbe;

    fn extent(scroll: (u32, u32), client: (u32, u32)) -> SurfaceExtent {
        SurfaceExtent {
            scroll_width: scroll.0,
            scroll_height: scroll.1,
            client_width: client.0,
            client_height: client.1,
        }
    }

    #[test]
    fn exact_fit_passes() {
        let report = OverflowGuard::evaluate(extent((1587, 1123), (1587, 1123)), 1587, 1123);
        assert_eq!(
            report,
            OverflowReport {
                pass: true,
                overflow_width: 0,
                overflow_height: 0
            }
        );
    }

    #[test]
    fn single_pixel_of_scroll_fails() {
        let report = OverflowGuard::evaluate(extent((1587, 1124), (1587, 1123)), 1587, 1123);
        assert!(!report.pass);
        assert_eq!(report.overflow_height, 1);
        assert_eq!(report.overflow_width, 0);
    }

    #[test]
    fn surface_larger_than_expected_box_fails() {
        let report = OverflowGuard::evaluate(extent((1700, 1123), (1700, 1123)), 1587, 1123);
        assert!(!report.pass);
        assert_eq!(report.overflow_width, 113);
    }

    #[test]
    fn failing_check_annotates_the_surface() {
        let probe = FakeOverflowProbe::new(extent((1587, 1300), (1587, 1123)));
        let surface = SurfaceHandle::new("panel-3", 1587, 1123);
        let report = OverflowGuard::check(&probe, &surface, 1587, 1123);
        assert_eq!(report.overflow_height, 177);
        assert_eq!(probe.annotated(), vec!["panel-3".to_string()]);

        let clean = FakeOverflowProbe::new(extent((800, 600), (800, 600)));
        assert!(OverflowGuard::check(&clean, &surface, 1587, 1123).pass);
        assert!(clean.annotated().is_empty());
    }
}
