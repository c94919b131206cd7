use crate::segment::Segment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Markers(MarkerSeries),
}

/// Backend-agnostic figure; rendering lives with the caller (the CLI draws
/// via plotters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// QC figure for one segment: the cleaned trace with the detected R-peaks
/// marked on top. The trace is decimated for drawing; peaks are kept as-is
/// so every detected beat stays visible.
pub fn figure_from_segment(segment: &Segment, max_points: usize) -> Figure {
    let t = &segment.table;
    let trace: Vec<[f64; 2]> = t
        .seconds
        .iter()
        .zip(t.clean.iter())
        .map(|(&x, &y)| [x, y])
        .collect();
    let peaks: Vec<[f64; 2]> = t
        .peak_indices()
        .into_iter()
        .map(|i| [t.seconds[i], t.clean[i]])
        .collect();

    let mut fig = Figure::new(Some(segment.name.clone()));
    fig.x.label = Some("seconds".into());
    fig.add_series(Series::Line(LineSeries {
        name: "clean".into(),
        points: decimate_points(&trace, max_points),
        style: Style {
            width: 1.4,
            color: Color(0x2266AA),
        },
    }));
    fig.add_series(Series::Markers(MarkerSeries {
        name: "peaks".into(),
        points: peaks,
        style: Style {
            width: 3.0,
            color: Color(0xCC2200),
        },
    }));
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalTable;

    #[test]
    fn segment_figure_carries_trace_and_peaks() {
        let n = 5000;
        let fs = 100.0;
        let mut table = SignalTable {
            fs,
            seconds: (0..n).map(|i| i as f64 / fs).collect(),
            raw: vec![0.0; n],
            clean: (0..n).map(|i| (i as f64 / 10.0).sin()).collect(),
            quality: vec![f64::NAN; n],
            peaks: vec![false; n],
            event: vec![None; n],
            event_description: vec![None; n],
        };
        table.peaks[100] = true;
        table.peaks[200] = true;
        let segment = Segment {
            name: "baseline".into(),
            onset_s: 0.0,
            table,
        };
        let fig = figure_from_segment(&segment, 1024);
        assert_eq!(fig.title.as_deref(), Some("baseline"));
        assert_eq!(fig.series.len(), 2);
        match &fig.series[0] {
            Series::Line(line) => assert!(line.points.len() <= 1024),
            other => panic!("expected line series, got {:?}", other),
        }
        match &fig.series[1] {
            Series::Markers(markers) => assert_eq!(markers.points.len(), 2),
            other => panic!("expected marker series, got {:?}", other),
        }
    }

    #[test]
    fn decimation_caps_point_count() {
        let points: Vec<[f64; 2]> = (0..10_000).map(|i| [i as f64, 0.0]).collect();
        let decimated = decimate_points(&points, 256);
        assert!(decimated.len() <= 256);
        assert_eq!(decimated[0], [0.0, 0.0]);
    }
}
