//! Plots the loss curves of a training run
//!
//! By convention the training loss is plotted in red and the validation loss in blue.

use std::error::Error;

use plotters::{
    chart::{ChartBuilder, SeriesLabelPosition},
    prelude::{BitMapBackend, Circle, IntoDrawingArea, PathElement},
    series::LineSeries,
    style::{BLACK, BLUE, Color, RED, WHITE},
};

use crate::training::EpochStats;

/// Saves the per epoch training and validation losses as a line chart to `file_name`
pub fn plot_history(history: &[EpochStats], file_name: &str) -> Result<(), Box<dyn Error>> {
    if history.is_empty() {
        log::warn!("No epochs to plot, skipping '{}'", file_name);
        return Ok(());
    }

    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let finite = |v: f64| v.is_finite().then_some(v);
    let max_loss = history
        .iter()
        .flat_map(|s| [finite(s.train_loss), finite(s.valid_loss)])
        .flatten()
        .fold(0.0f64, f64::max);
    let max_epoch = history.len() as f64;

    let mut chart = ChartBuilder::on(&root_area)
        .caption("Loss per epoch", ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.5f64..max_epoch + 0.5, 0.0f64..(max_loss * 1.1).max(1e-3))?;

    chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc("loss")
        .draw()?;

    let train = history
        .iter()
        .map(|s| (s.epoch as f64, s.train_loss))
        .collect::<Vec<_>>();
    let valid = history
        .iter()
        .map(|s| (s.epoch as f64, s.valid_loss))
        .collect::<Vec<_>>();

    chart
        .draw_series(LineSeries::new(train.iter().copied(), &RED))?
        .label("train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart.draw_series(
        train
            .iter()
            .map(|&point| Circle::new(point, 3, RED.filled())),
    )?;

    chart
        .draw_series(LineSeries::new(valid.iter().copied(), &BLUE))?
        .label("valid")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart.draw_series(
        valid
            .iter()
            .map(|&point| Circle::new(point, 3, BLUE.filled())),
    )?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root_area.present()?;
    log::info!("Loss plot has been saved to '{}'.", file_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("losses.png");
        plot_history(&[], path.to_str().unwrap()).unwrap();
        assert!(!path.exists());
    }
}
