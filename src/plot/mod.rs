//! Rendering summary data to PNG charts. Renderers are looked up by
//! tag in a `PlotRegistry`; the built-in ones are in `render`, more
//! can be registered at runtime.

pub mod render;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use kstring::KString;
use strum::IntoEnumIterator;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Lower and upper end of an error bar
    pub err: Option<(f64, f64)>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, err: None }
    }

    /// With a symmetric error bar of `+-err`.
    pub fn with_err(x: f64, y: f64, err: Option<f64>) -> Self {
        Self {
            x,
            y,
            err: err.map(|e| (y - e, y + e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub points: Vec<Point>,
}

/// One subplot: several series sharing the axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub ylabel: String,
    pub ylim: Option<(f64, f64)>,
    pub series: Vec<Series>,
}

/// A column of stacked panels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub title: String,
    pub panels: Vec<Panel>,
}

/// Five number summary of one box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSummary {
    pub label: String,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlotData {
    Series(Vec<Series>),
    Panels(Vec<Panel>),
    Frames(Vec<Frame>),
    Boxes(Vec<BoxSummary>),
    /// (x, y, z) with z drawn vertically
    Points(Vec<(f64, f64, f64)>),
}

impl PlotData {
    pub fn shape_name(&self) -> &'static str {
        match self {
            PlotData::Series(_) => "series",
            PlotData::Panels(_) => "panels",
            PlotData::Frames(_) => "frames",
            PlotData::Boxes(_) => "boxes",
            PlotData::Points(_) => "points",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotOptions {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    /// Vertical axis of 3-D plots
    pub zlabel: String,
    pub ylim: Option<(f64, f64)>,
    /// Horizontal reference line, e.g. the workload objective
    pub axhline: Option<f64>,
    pub filename: String,
    pub size: (u32, u32),
}

impl PlotOptions {
    pub fn new(filename: &str) -> Self {
        Self {
            title: String::new(),
            xlabel: String::new(),
            ylabel: String::new(),
            zlabel: String::new(),
            ylim: None,
            axhline: None,
            filename: filename.into(),
            size: (1200, 800),
        }
    }
}

/// Renders `data` to the image file at the given path.
pub type PlotFn = fn(&PlotData, &PlotOptions, &Path) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum_macros::EnumIter, strum_macros::IntoStaticStr, strum_macros::EnumString)]
pub enum PlotKind {
    #[strum(serialize = "basic")]
    Basic,
    #[strum(serialize = "stacked")]
    Stacked,
    #[strum(serialize = "single_frame")]
    SingleFrame,
    #[strum(serialize = "stacked_frames")]
    StackedFrames,
    #[strum(serialize = "whisker")]
    Whisker,
    #[strum(serialize = "3d")]
    ThreeD,
}

impl PlotKind {
    pub fn tag(self) -> &'static str {
        self.into()
    }

    pub fn renderer(self) -> PlotFn {
        match self {
            PlotKind::Basic => render::basic,
            PlotKind::Stacked => render::stacked,
            PlotKind::SingleFrame => render::single_frame,
            PlotKind::StackedFrames => render::stacked_frames,
            PlotKind::Whisker => render::whisker,
            PlotKind::ThreeD => render::three_d,
        }
    }
}

pub struct PlotRegistry {
    renderers: BTreeMap<KString, PlotFn>,
}

impl Default for PlotRegistry {
    fn default() -> Self {
        let mut registry = Self {
            renderers: BTreeMap::new(),
        };
        for kind in PlotKind::iter() {
            registry.register(kind.tag(), kind.renderer());
        }
        registry
    }
}

impl PlotRegistry {
    /// Add or replace the renderer for `tag`, returning the replaced
    /// one.
    pub fn register(&mut self, tag: &str, renderer: PlotFn) -> Option<PlotFn> {
        self.renderers.insert(KString::from_ref(tag), renderer)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.renderers.keys().map(|k| k.as_str())
    }

    /// Render to `dir/options.filename`, creating `dir`. An unknown
    /// tag is an `UnknownStrategy` error.
    pub fn generate(
        &self,
        data: &PlotData,
        plot_type: &str,
        options: &PlotOptions,
        dir: &Path,
    ) -> Result<PathBuf> {
        let renderer = self.renderers.get(plot_type).ok_or_else(|| {
            anyhow::Error::from(PipelineError::UnknownStrategy {
                kind: "plot",
                tag: plot_type.into(),
                available: self.tags().map(String::from).collect(),
            })
        })?;
        std::fs::create_dir_all(dir).with_context(|| anyhow!("creating directory {dir:?}"))?;
        let path = dir.join(&options.filename);
        renderer(data, options, &path)
            .with_context(|| anyhow!("rendering {plot_type} plot to {path:?}"))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_marker(data: &PlotData, _options: &PlotOptions, path: &Path) -> Result<()> {
        std::fs::write(path, data.shape_name())?;
        Ok(())
    }

    #[test]
    fn t_builtin_tags() {
        let registry = PlotRegistry::default();
        assert_eq!(
            registry.tags().collect::<Vec<_>>(),
            ["3d", "basic", "single_frame", "stacked", "stacked_frames", "whisker"]
        );
        assert_eq!("3d".parse::<PlotKind>().ok(), Some(PlotKind::ThreeD));
    }

    #[test]
    fn t_unknown_tag() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = PlotRegistry::default();
        let e = registry
            .generate(
                &PlotData::Series(vec![]),
                "pie",
                &PlotOptions::new("x.png"),
                dir.path(),
            )
            .unwrap_err();
        match PipelineError::find(&e) {
            Some(PipelineError::UnknownStrategy { kind, tag, available }) => {
                assert_eq!(*kind, "plot");
                assert_eq!(tag, "pie");
                assert_eq!(available.len(), 6);
            }
            _ => panic!("expected UnknownStrategy, got {e:?}"),
        }
        assert!(!dir.path().join("x.png").exists());
        Ok(())
    }

    #[test]
    fn t_register_at_runtime() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut registry = PlotRegistry::default();
        assert!(registry.register("marker", write_marker).is_none());
        let path = registry.generate(
            &PlotData::Boxes(vec![]),
            "marker",
            &PlotOptions::new("m.txt"),
            &dir.path().join("plots"),
        )?;
        assert_eq!(std::fs::read_to_string(path)?, "boxes");
        Ok(())
    }

    #[test]
    fn t_shape_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = PlotRegistry::default();
        for tag in ["basic", "stacked", "stacked_frames", "whisker", "3d"] {
            let data = if tag == "basic" {
                PlotData::Points(vec![])
            } else {
                PlotData::Series(vec![])
            };
            let r = registry.generate(&data, tag, &PlotOptions::new("s.png"), dir.path());
            assert!(r.is_err(), "{tag}");
        }
        assert!(!dir.path().join("s.png").exists());
        Ok(())
    }

    fn sample_data(kind: PlotKind) -> PlotData {
        let series = |label: &str, scale: f64| Series {
            label: label.into(),
            points: (1..=4)
                .map(|x| Point::with_err(f64::from(x), f64::from(x) * scale, Some(scale / 4.)))
                .collect(),
        };
        let panel = |ylabel: &str| Panel {
            ylabel: ylabel.into(),
            ylim: None,
            series: vec![series("a", 10.), series("b", 20.)],
        };
        match kind {
            PlotKind::Basic => PlotData::Series(vec![series("Throughput", 100.)]),
            PlotKind::SingleFrame => PlotData::Series(vec![series("a", 1.), series("b", 2.)]),
            PlotKind::Stacked => PlotData::Panels(vec![panel("Throughput"), panel("BusyTime")]),
            PlotKind::StackedFrames => PlotData::Frames(vec![
                Frame {
                    title: "1 TM".into(),
                    panels: vec![panel("Throughput"), panel("BusyTime")],
                },
                Frame {
                    title: "2 TM".into(),
                    panels: vec![panel("Throughput")],
                },
            ]),
            PlotKind::Whisker => PlotData::Boxes(vec![
                BoxSummary {
                    label: "1 TM".into(),
                    min: 1.,
                    q1: 2.,
                    median: 3.,
                    q3: 4.,
                    max: 5.,
                },
                BoxSummary {
                    label: "2 TM".into(),
                    min: 2.,
                    q1: 4.,
                    median: 5.,
                    q3: 7.,
                    max: 9.,
                },
            ]),
            PlotKind::ThreeD => PlotData::Points(
                [(2., 4.), (2., 8.), (4., 4.), (4., 8.), (8., 8.)]
                    .into_iter()
                    .map(|(cores, gib)| (cores, gib, cores * 1000. + gib * 10.))
                    .collect(),
            ),
        }
    }

    #[test]
    fn t_render_every_kind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = PlotRegistry::default();
        for kind in PlotKind::iter() {
            let mut options = PlotOptions::new(&format!("{}.png", kind.tag()));
            options.title = kind.tag().into();
            options.axhline = Some(50.);
            let path = registry.generate(&sample_data(kind), kind.tag(), &options, dir.path())?;
            assert_eq!(path, dir.path().join(&options.filename));
            assert!(std::fs::metadata(&path)?.len() > 0, "{}", kind.tag());
        }
        Ok(())
    }
}
