// SPDX-License-Identifier: GPL-3.0-only

//! Frame-number overlay
//!
//! Two consumers share one renderer:
//!
//! - [`FrameOverlay`] is the camera post-callback. It draws the recording
//!   frame counter into the encoder-visible `main` buffer in place, only
//!   while recording is active, and is registered exactly once at camera
//!   initialization. Its counter resets at each recording start so the
//!   burned-in number matches the timing CSV.
//! - The processor uses [`OverlayRenderer`] directly to draw the display
//!   frame number onto preview pixels, so the preview shows the counter even
//!   when not recording.
//!
//! Glyphs are laid out with `rusttype` using the embedded FiraCode face and
//! alpha-blended straight into the RGB888 plane, honoring the row stride.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rusttype::{Font, Scale, point};
use tracing::info;

use crate::camera::driver::{MappedRequest, PlaneMut, PostCallback};
use crate::config::OverlayConfig;

/// Pixel height of the rendered text at `font_scale_base = 1.0`.
const BASE_TEXT_HEIGHT_PX: f32 = 32.0;

/// Stateless text renderer for RGB888 planes.
pub struct OverlayRenderer {
    font: Font<'static>,
    config: OverlayConfig,
}

impl OverlayRenderer {
    pub fn new(config: OverlayConfig) -> Self {
        let font = Font::try_from_bytes(ttf_firacode::REGULAR as &[u8])
            .expect("embedded font is valid");
        Self { font, config }
    }

    /// Whether the frame-number overlay is enabled at all.
    pub fn enabled(&self) -> bool {
        self.config.show_frame_number
    }

    /// Draw `Frame: {n}` at the configured position.
    pub fn draw_frame_number(&self, plane: &mut PlaneMut<'_>, frame_number: u64) {
        if !self.config.show_frame_number {
            return;
        }
        let text = format!("Frame: {frame_number}");
        self.draw_text(plane, &text);
    }

    /// Alpha-blend `text` into the plane at the configured margin/baseline.
    pub fn draw_text(&self, plane: &mut PlaneMut<'_>, text: &str) {
        let cfg = &self.config;
        let scale = Scale::uniform(cfg.font_scale_base * BASE_TEXT_HEIGHT_PX);
        let baseline = point(cfg.margin_left as f32, cfg.line_start_y as f32);
        let color = [cfg.text_color_r, cfg.text_color_g, cfg.text_color_b];

        // Extra passes at 1px x-offsets approximate stroke thickness.
        let passes = cfg.thickness_base.max(1);
        for pass in 0..passes {
            let origin = point(baseline.x + pass as f32, baseline.y);
            for glyph in self.font.layout(text, scale, origin) {
                let Some(bb) = glyph.pixel_bounding_box() else {
                    continue;
                };
                glyph.draw(|gx, gy, coverage| {
                    let x = gx as i64 + bb.min.x as i64;
                    let y = gy as i64 + bb.min.y as i64;
                    blend_pixel(plane, x, y, color, coverage);
                });
            }
        }
    }
}

/// Blend one pixel into an RGB888 plane, clipping out-of-bounds coordinates.
fn blend_pixel(plane: &mut PlaneMut<'_>, x: i64, y: i64, color: [u8; 3], coverage: f32) {
    if x < 0 || y < 0 || x >= plane.width as i64 || y >= plane.height as i64 {
        return;
    }
    let offset = y as usize * plane.stride as usize + x as usize * 3;
    if offset + 3 > plane.data.len() {
        return;
    }
    let alpha = coverage.clamp(0.0, 1.0);
    for (i, &c) in color.iter().enumerate() {
        let old = plane.data[offset + i] as f32;
        plane.data[offset + i] = (old * (1.0 - alpha) + c as f32 * alpha).round() as u8;
    }
}

/// Post-callback state: counts encoded frames and draws the counter on the
/// `main` stream while recording.
pub struct FrameOverlay {
    camera_id: usize,
    renderer: OverlayRenderer,
    frame_counter: AtomicU64,
    recording: AtomicBool,
}

impl FrameOverlay {
    pub fn new(camera_id: usize, config: OverlayConfig) -> Arc<Self> {
        Arc::new(Self {
            camera_id,
            renderer: OverlayRenderer::new(config),
            frame_counter: AtomicU64::new(0),
            recording: AtomicBool::new(false),
        })
    }

    /// Build the driver post-callback. Registered once per device lifetime.
    pub fn post_callback(self: &Arc<Self>) -> PostCallback {
        let overlay = Arc::clone(self);
        Arc::new(move |request: &mut MappedRequest<'_>| {
            overlay.on_request(request);
        })
    }

    fn on_request(&self, request: &mut MappedRequest<'_>) {
        if !self.recording.load(Ordering::SeqCst) || !self.renderer.enabled() {
            return;
        }
        // Counter advances only on frames the encoder will see, so it tracks
        // the recorder's written-frame count.
        let n = self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.renderer.draw_frame_number(&mut request.main, n);
    }

    /// Reset the counter for a new recording so main-stream numbers and the
    /// timing CSV stay aligned.
    pub fn reset(&self) {
        self.frame_counter.store(0, Ordering::SeqCst);
        info!(camera = self.camera_id, "Overlay frame counter reset");
    }

    /// Gate main-stream drawing on recording state.
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    /// Frames stamped since the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }
}
