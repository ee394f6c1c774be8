use std::path::Path;

use depthfill::diagnostics::ErrorHistogram;
use plotters::{coord::types::RangedCoordf64, prelude::*};

const CURVE_COLOR: RGBColor = RGBColor(0x58, 0x50, 0x8d);
const MEDIAN_COLOR: RGBColor = RGBColor(0xff, 0x63, 0x61);

const LABEL_STYLE: (&str, i32) = ("sans-serif", 30);

/// Chart the fraction of pixels whose error is below each threshold.
pub fn save_png(histogram: &ErrorHistogram, chart_name: &str, output_path: &Path) -> anyhow::Result<()> {
    let rows = histogram.rows();
    let max_threshold = rows.last().map_or(1.0, |(t, _)| *t);

    let width = 800;
    let height = 600;
    let dpi_scale = 2;
    let root = BitMapBackend::new(output_path, (width * dpi_scale, height * dpi_scale))
        .into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .x_label_area_size(80)
        .y_label_area_size(100)
        .caption(chart_name, ("sans-serif", 50))
        .build_cartesian_2d(0.0..max_threshold, 0.0..1.0)?;

    draw_axes(&mut chart)?;

    chart.draw_series(LineSeries::new(
        rows.iter().copied(),
        CURVE_COLOR.stroke_width(3),
    ))?;

    let median = histogram.stats().median;
    if median <= max_threshold {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(median, 0.0), (median, 1.0)],
            MEDIAN_COLOR.stroke_width(2),
        )))?;
        chart.draw_series([Text::new(
            format!("median {median:.3}"),
            (median, 0.1),
            LABEL_STYLE.into_font(),
        )])?;
    }

    root.present()?;
    println!("Plot saved to {}", output_path.display());
    Ok(())
}

fn draw_axes<DB: DrawingBackend>(
    chart: &mut ChartContext<DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
) -> anyhow::Result<()>
where
    <DB as plotters::prelude::DrawingBackend>::ErrorType: 'static,
{
    chart
        .configure_mesh()
        .x_desc("Absolute depth error")
        .y_desc("Fraction of pixels")
        .label_style(LABEL_STYLE)
        .axis_desc_style(LABEL_STYLE)
        .draw()?;
    Ok(())
}
