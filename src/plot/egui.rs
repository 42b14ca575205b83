//! Native render backend: one `egui_plot` panel per series in an `eframe`
//! window.
//!
//! The window polls [`PlotShared`] each frame and re-renders every series
//! from its current snapshot; closing the window marks all series closed,
//! which the scan engine treats as a cancellation request. When the bridge
//! raises the stop flag the window closes itself.

use super::{PlotShared, RenderSurface, REDRAW_INTERVAL};
use std::sync::Arc;
use std::time::Duration;

/// `eframe`/`egui_plot` window surface.
pub struct EguiSurface {
    title: String,
    repaint_interval: Duration,
}

impl EguiSurface {
    /// A surface repainting at the default cadence.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            repaint_interval: REDRAW_INTERVAL,
        }
    }
}

struct PlotApp {
    shared: Arc<PlotShared>,
    repaint_interval: Duration,
}

impl eframe::App for PlotApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.shared.stop_requested() {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        let frames = self.shared.snapshot();
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                for frame in &frames {
                    ui.heading(&frame.spec.label);
                    ui.label(format!(
                        "{} vs. {}",
                        frame.spec.y_label, frame.spec.x_label
                    ));
                    let points: egui_plot::PlotPoints = frame
                        .x
                        .iter()
                        .zip(&frame.y)
                        .map(|(&x, &y)| [x, y])
                        .collect();
                    egui_plot::Plot::new(frame.spec.label.clone())
                        .height(240.0)
                        .x_axis_label(frame.spec.x_label.clone())
                        .y_axis_label(frame.spec.y_label.clone())
                        .show(ui, |plot_ui| {
                            plot_ui.line(egui_plot::Line::new(points));
                        });
                    ui.separator();
                }
            });
        });

        // Wake up for fresh points even without input events.
        ctx.request_repaint_after(self.repaint_interval);
    }
}

impl RenderSurface for EguiSurface {
    fn run(self: Box<Self>, shared: Arc<PlotShared>) -> anyhow::Result<()> {
        let app = PlotApp {
            shared: shared.clone(),
            repaint_interval: self.repaint_interval,
        };
        let options = eframe::NativeOptions::default();
        eframe::run_native(
            &self.title,
            options,
            Box::new(move |_cc| Ok(Box::new(app))),
        )
        .map_err(|e| anyhow::anyhow!("eframe event loop failed: {e}"))?;

        // run_native returning without a stop request means the user
        // dismissed the window.
        if !shared.stop_requested() {
            shared.mark_all_closed();
        }
        Ok(())
    }
}
