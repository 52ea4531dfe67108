//! Training curves as a standalone SVG.
//!
//! Four panels in a 2x2 grid: train accuracy, test accuracy, train loss and
//! test loss, each against its own step index. Rendering only reads the
//! series.

use std::path::{Path, PathBuf};

use crate::error::{Result, SegError};
use crate::training::MetricSeries;

const WIDTH: f64 = 1200.0;
const HEIGHT: f64 = 800.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 25.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 55.0;

/// Default curve file for a class: `<outf>/curves_<class>.svg`.
pub fn curves_path(outf: &Path, class_choice: &str) -> PathBuf {
    outf.join(format!("curves_{class_choice}.svg"))
}

struct Panel<'a> {
    title: &'static str,
    y_label: &'static str,
    values: &'a [f64],
    color: &'static str,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn fmt_tick(v: f64) -> String {
    if v != 0.0 && (v.abs() < 1e-2 || v.abs() >= 1e4) {
        format!("{v:.2e}")
    } else {
        format!("{v:.3}")
    }
}

fn render_panel(svg: &mut String, panel: &Panel<'_>, x0: f64, y0: f64, w: f64, h: f64) {
    let left = x0 + MARGIN_LEFT;
    let top = y0 + MARGIN_TOP;
    let plot_w = w - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = h - MARGIN_TOP - MARGIN_BOTTOM;

    svg.push_str(&format!(
        "<rect x=\"{left:.1}\" y=\"{top:.1}\" width=\"{plot_w:.1}\" height=\"{plot_h:.1}\" fill=\"none\" stroke=\"#444\"/>\n"
    ));
    svg.push_str(&format!(
        "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"16\">{}</text>\n",
        left + plot_w / 2.0,
        y0 + MARGIN_TOP - 14.0,
        panel.title
    ));
    svg.push_str(&format!(
        "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"13\">Iteration</text>\n",
        left + plot_w / 2.0,
        top + plot_h + 40.0
    ));
    let (lx, ly) = (x0 + 18.0, top + plot_h / 2.0);
    svg.push_str(&format!(
        "<text x=\"{lx:.1}\" y=\"{ly:.1}\" text-anchor=\"middle\" font-size=\"13\" transform=\"rotate(-90 {lx:.1} {ly:.1})\">{}</text>\n",
        panel.y_label
    ));

    let points: Vec<(usize, f64)> = panel
        .values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .collect();
    if points.is_empty() {
        svg.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"13\" fill=\"#888\">no data</text>\n",
            left + plot_w / 2.0,
            top + plot_h / 2.0
        ));
        return;
    }

    let last = panel.values.len().saturating_sub(1).max(1) as f64;
    let mut lo = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let mut hi = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    if (hi - lo).abs() < 1e-12 {
        lo -= 0.5;
        hi += 0.5;
    }
    let sx = |i: usize| left + i as f64 / last * plot_w;
    let sy = |v: f64| top + (hi - v) / (hi - lo) * plot_h;

    // y ticks at min/max, x ticks at first/last step.
    for (v, y) in [(lo, top + plot_h), (hi, top)] {
        svg.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\" font-size=\"11\">{}</text>\n",
            left - 6.0,
            y + 4.0,
            fmt_tick(v)
        ));
    }
    for (i, anchor) in [(0usize, "start"), (panel.values.len().saturating_sub(1), "end")] {
        svg.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"{anchor}\" font-size=\"11\">{i}</text>\n",
            sx(i),
            top + plot_h + 16.0
        ));
    }

    if points.len() == 1 {
        let (i, v) = points[0];
        svg.push_str(&format!(
            "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"3\" fill=\"{}\"/>\n",
            sx(i),
            sy(v),
            panel.color
        ));
        return;
    }
    let coords: Vec<String> = points
        .iter()
        .map(|&(i, v)| format!("{:.2},{:.2}", sx(i), sy(v)))
        .collect();
    svg.push_str(&format!(
        "<polyline fill=\"none\" stroke=\"{}\" stroke-width=\"1.5\" points=\"{}\"/>\n",
        panel.color,
        coords.join(" ")
    ));
}

/// Render the 2x2 curve figure as an SVG document.
pub fn render_curves(series: &MetricSeries, title: &str) -> String {
    let panels = [
        Panel {
            title: "Train accuracy",
            y_label: "Accuracy",
            values: series.train_accuracy(),
            color: "#1f77b4",
        },
        Panel {
            title: "Test accuracy",
            y_label: "Accuracy",
            values: series.test_accuracy(),
            color: "#ff7f0e",
        },
        Panel {
            title: "Train loss",
            y_label: "Loss",
            values: series.train_loss(),
            color: "#1f77b4",
        },
        Panel {
            title: "Test loss",
            y_label: "Loss",
            values: series.test_loss(),
            color: "#ff7f0e",
        },
    ];

    let header = 30.0;
    let (w, h) = (WIDTH / 2.0, (HEIGHT - header) / 2.0);
    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\" font-family=\"sans-serif\">\n"
    );
    svg.push_str("<rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n");
    svg.push_str(&format!(
        "<text x=\"{:.1}\" y=\"22\" text-anchor=\"middle\" font-size=\"18\">{}</text>\n",
        WIDTH / 2.0,
        escape(title)
    ));
    for (idx, panel) in panels.iter().enumerate() {
        let x0 = (idx % 2) as f64 * w;
        let y0 = header + (idx / 2) as f64 * h;
        render_panel(&mut svg, panel, x0, y0, w, h);
    }
    svg.push_str("</svg>\n");
    svg
}

/// Render and write the curves to `path`.
pub fn write_curves(series: &MetricSeries, title: &str, path: &Path) -> Result<PathBuf> {
    std::fs::write(path, render_curves(series, title)).map_err(|e| SegError::io(path, e))?;
    tracing::info!(path = %path.display(), "Curves written");
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::StepMetrics;

    fn series() -> MetricSeries {
        let mut s = MetricSeries::new();
        for i in 0..5 {
            s.push_train(StepMetrics {
                loss: 2.0 / (i + 1) as f64,
                accuracy: 0.2 * i as f64,
            });
        }
        s.push_test(StepMetrics {
            loss: 1.0,
            accuracy: 0.4,
        });
        s
    }

    #[test]
    fn test_render_has_four_labelled_panels() {
        let svg = render_curves(&series(), "Chair");
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        for title in ["Train accuracy", "Test accuracy", "Train loss", "Test loss"] {
            assert!(svg.contains(title), "missing {title}");
        }
        assert_eq!(svg.matches(">Iteration<").count(), 4);
        assert_eq!(svg.matches(">Accuracy<").count(), 2);
        assert_eq!(svg.matches(">Loss<").count(), 2);
        // Two train panels with lines, two single-point test panels.
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert_eq!(svg.matches("<circle").count(), 2);
    }

    #[test]
    fn test_empty_series_renders_placeholders() {
        let svg = render_curves(&MetricSeries::new(), "Chair");
        assert_eq!(svg.matches("no data").count(), 4);
    }

    #[test]
    fn test_title_is_escaped() {
        let svg = render_curves(&MetricSeries::new(), "Cup & <Mug>");
        assert!(svg.contains("Cup &amp; &lt;Mug&gt;"));
    }

    #[test]
    fn test_write_does_not_touch_series() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = series();
        let before = s.clone();
        let path = write_curves(&s, "Chair", &curves_path(tmp.path(), "Chair")).unwrap();
        assert!(path.ends_with("curves_Chair.svg"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("<polyline"));
        assert_eq!(s, before);
    }
}
