use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dyad_lib::{
    config::{
        self, read_config, read_overrides, resolve_ecg, resolve_segmentation, OverrideTable,
        PipelineConfig, Role,
    },
    io::{
        events as event_io,
        export::{self, MetricsTable, SubjectMeta},
        naming::{self, DyadFiles, RecordingId, RecordingKind},
        recording as recording_io,
    },
    metrics::outliers::{
        impute_by_segment, plausible_to_nan, unstable_segments, zscore_outliers_by_segment,
        ImputeMethod,
    },
    pipeline::{analyze_subject, preprocess_channel, SubjectAnalysis},
    plot::{figure_from_segment, Figure, Series},
    signal::estimate_fs,
};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "dyad",
    version,
    about = "Dual-channel ECG segmentation and windowed HRV pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliRole {
    Child,
    Mother,
}

impl From<CliRole> for Role {
    fn from(role: CliRole) -> Role {
        match role {
            CliRole::Child => Role::Child,
            CliRole::Mother => Role::Mother,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process every recording/event pair found in a raw-data directory
    Process {
        /// Directory holding *_mc.txt and *_event.txt inputs
        #[arg(long)]
        raw_dir: PathBuf,
        /// Directory for metric and signal tables (created if absent)
        #[arg(long)]
        out_dir: PathBuf,
        /// Directory for QC figures (created if absent)
        #[arg(long)]
        reports_dir: PathBuf,
        /// Base configuration TOML; defaults to the built-in study config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Per-dyad override table TOML
        #[arg(long)]
        overrides: Option<PathBuf>,
        /// Skip rendering QC figures
        #[arg(long)]
        no_qc_plots: bool,
    },
    /// Process a single recording/event pair
    ProcessDyad {
        #[arg(long)]
        ecg: PathBuf,
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        reports_dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        overrides: Option<PathBuf>,
        #[arg(long)]
        no_qc_plots: bool,
    },
    /// Print the effective configuration for a dyad after overrides
    ResolveConfig {
        #[arg(long)]
        dyad_id: u32,
        /// Member to resolve ECG parameters for; omit for the dyad-level
        /// segmentation view
        #[arg(long)]
        role: Option<CliRole>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
    /// Flag and impute outliers on an exported metric table
    CleanMetrics {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Metric column to clean
        #[arg(long, default_value = "rmssd")]
        metric: String,
        #[arg(long, default_value_t = 1.96)]
        z_threshold: f64,
        #[arg(long, default_value = "mean")]
        method: ImputeMethod,
        #[arg(long, default_value_t = 0.75)]
        cv_threshold: f64,
        /// Segments with fewer finite windows than this are flagged whole
        #[arg(long, default_value_t = 4)]
        min_windows: usize,
        /// Plausibility bounds applied before outlier detection
        #[arg(long, num_args = 2, value_names = ["LO", "HI"])]
        plausible: Option<Vec<f64>>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Process {
            raw_dir,
            out_dir,
            reports_dir,
            config,
            overrides,
            no_qc_plots,
        } => cmd_process(
            &raw_dir,
            &out_dir,
            &reports_dir,
            config.as_deref(),
            overrides.as_deref(),
            no_qc_plots,
        ),
        Commands::ProcessDyad {
            ecg,
            events,
            out_dir,
            reports_dir,
            config,
            overrides,
            no_qc_plots,
        } => {
            let (base, table) = load_configs(config.as_deref(), overrides.as_deref())?;
            let pair = pair_from_paths(&ecg, &events)?;
            process_dyad(&pair, &base, &table, &out_dir, &reports_dir, no_qc_plots)
        }
        Commands::ResolveConfig {
            dyad_id,
            role,
            config,
            overrides,
        } => cmd_resolve_config(dyad_id, role, config.as_deref(), overrides.as_deref()),
        Commands::CleanMetrics {
            input,
            output,
            metric,
            z_threshold,
            method,
            cv_threshold,
            min_windows,
            plausible,
        } => cmd_clean_metrics(
            &input,
            &output,
            &metric,
            z_threshold,
            method,
            cv_threshold,
            min_windows,
            plausible.as_deref(),
        ),
    }
}

fn load_configs(
    config: Option<&Path>,
    overrides: Option<&Path>,
) -> Result<(PipelineConfig, OverrideTable)> {
    let base = match config {
        Some(path) => read_config(path)?,
        None => PipelineConfig::default(),
    };
    let table = match overrides {
        Some(path) => read_overrides(path)?,
        None => OverrideTable::default(),
    };
    Ok((base, table))
}

fn cmd_process(
    raw_dir: &Path,
    out_dir: &Path,
    reports_dir: &Path,
    config: Option<&Path>,
    overrides: Option<&Path>,
    no_qc_plots: bool,
) -> Result<()> {
    let (base, table) = load_configs(config, overrides)?;
    let pairs = naming::discover_pairs(raw_dir)?;
    if pairs.is_empty() {
        bail!("no recording/event pairs found in {}", raw_dir.display());
    }
    log::info!(
        "processing {} dyad(s) from {}",
        pairs.len(),
        raw_dir.display()
    );
    let mut failures = 0usize;
    for (index, pair) in pairs.iter().enumerate() {
        log::info!(
            "recording {}/{}: dyad {} condition {} wave {}",
            index + 1,
            pairs.len(),
            pair.id.dyad,
            pair.id.condition,
            pair.id.wave
        );
        if let Err(err) = process_dyad(pair, &base, &table, out_dir, reports_dir, no_qc_plots) {
            // A bad dyad never stops the batch; it is logged and skipped.
            log::error!("failed to process {}: {err:#}", pair.id);
            failures += 1;
        }
    }
    log::info!("done: {} ok, {} failed", pairs.len() - failures, failures);
    Ok(())
}

fn pair_from_paths(ecg: &Path, events: &Path) -> Result<DyadFiles> {
    let (signal_id, signal_kind) = parse_path(ecg)?;
    let (event_id, event_kind) = parse_path(events)?;
    if signal_kind != RecordingKind::Signal {
        bail!("{} is not a signal (*_mc.txt) file", ecg.display());
    }
    if event_kind != RecordingKind::Event {
        bail!("{} is not an event (*_event.txt) file", events.display());
    }
    if signal_id != event_id {
        bail!(
            "recording identities do not match: {} vs {}",
            signal_id,
            event_id
        );
    }
    Ok(DyadFiles {
        id: signal_id,
        signal_path: ecg.to_path_buf(),
        event_path: events.to_path_buf(),
    })
}

fn parse_path(path: &Path) -> Result<(RecordingId, RecordingKind)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("{} has no parsable file name", path.display()))?;
    naming::parse_stem(stem)
}

fn process_dyad(
    pair: &DyadFiles,
    base: &PipelineConfig,
    overrides: &OverrideTable,
    out_dir: &Path,
    reports_dir: &Path,
    no_qc_plots: bool,
) -> Result<()> {
    let recording = recording_io::read_dyad_recording(&pair.signal_path)?;
    let markers = event_io::read_event_markers(&pair.event_path)?;

    // Segmentation is shared across the dyad; preprocessing resolves per
    // member on top of it.
    let seg_cfg = resolve_segmentation(pair.id.dyad, base, overrides);
    let child_cfg = resolve_ecg(pair.id.dyad, Role::Child, &seg_cfg, overrides);
    let mother_cfg = resolve_ecg(pair.id.dyad, Role::Mother, &seg_cfg, overrides);

    if let Some(observed) = estimate_fs(&recording.seconds) {
        let nominal = seg_cfg.general.sampling_frequency;
        if (observed - nominal).abs() / nominal > 0.01 {
            log::warn!(
                "{}: timestamps suggest {observed:.1} Hz but config says {nominal:.1} Hz",
                pair.id
            );
        }
    }

    let dyad_out = out_dir.join(pair.id.folder_name());
    fs::create_dir_all(&dyad_out).with_context(|| format!("creating {}", dyad_out.display()))?;
    let dyad_reports = reports_dir.join(pair.id.folder_name());
    fs::create_dir_all(&dyad_reports)
        .with_context(|| format!("creating {}", dyad_reports.display()))?;

    for (role, raw, cfg) in [
        (Role::Child, &recording.child, &child_cfg),
        (Role::Mother, &recording.mother, &mother_cfg),
    ] {
        let table = preprocess_channel(&recording.seconds, raw, &markers, cfg);
        let analysis = analyze_subject(&table, cfg)
            .with_context(|| format!("segmenting the {} channel", role.as_str()))?;
        export_subject(&pair.id, role, cfg, &analysis, &dyad_out)?;
        if !no_qc_plots {
            render_qc_plots(&analysis, role, &dyad_reports)?;
        }
    }
    Ok(())
}

fn export_subject(
    id: &RecordingId,
    role: Role,
    cfg: &PipelineConfig,
    analysis: &SubjectAnalysis,
    dyad_out: &Path,
) -> Result<()> {
    let prefix = id.file_prefix();
    let meta = SubjectMeta { role, id };
    export::write_metrics_csv(
        &dyad_out.join(format!("{prefix}_{}_hrv.csv", role.as_str())),
        &analysis.metrics,
        meta,
    )?;
    export::write_segment_signals_csv(
        &dyad_out.join(format!("{prefix}_{}_signal.csv", role.as_str())),
        &analysis.segments,
        meta,
    )?;
    export::write_config_toml(&dyad_out.join(format!("{}_params.toml", role.as_str())), cfg)?;
    Ok(())
}

fn render_qc_plots(analysis: &SubjectAnalysis, role: Role, dyad_reports: &Path) -> Result<()> {
    let role_dir = dyad_reports.join(role.as_str());
    fs::create_dir_all(&role_dir).with_context(|| format!("creating {}", role_dir.display()))?;
    for segment in &analysis.segments {
        let fig = figure_from_segment(segment, 4096);
        let path = role_dir.join(format!("{}.png", segment.name));
        draw_figure(&path, &fig)
            .with_context(|| format!("rendering QC figure {}", path.display()))?;
    }
    Ok(())
}

fn draw_figure(path: &Path, fig: &Figure) -> Result<()> {
    let root = BitMapBackend::new(path, (1200, 480)).into_drawing_area();
    root.fill(&WHITE)?;
    let points = fig.series.iter().flat_map(|series| match series {
        Series::Line(line) => line.points.iter(),
        Series::Markers(markers) => markers.points.iter(),
    });
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for p in points {
        x_min = x_min.min(p[0]);
        x_max = x_max.max(p[0]);
        y_min = y_min.min(p[1]);
        y_max = y_max.max(p[1]);
    }
    if !x_min.is_finite() || x_min == x_max {
        x_min = if x_min.is_finite() { x_min } else { 0.0 };
        x_max = x_min + 1.0;
    }
    if !y_min.is_finite() || y_min == y_max {
        y_min = if y_min.is_finite() { y_min } else { 0.0 };
        y_max = y_min + 1.0;
    }
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Segment".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart.configure_mesh().draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let color = rgb(line.style.color.0);
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    &color,
                ))?;
            }
            Series::Markers(markers) => {
                let color = rgb(markers.style.color.0);
                let radius = markers.style.width.round() as i32;
                chart.draw_series(
                    markers
                        .points
                        .iter()
                        .map(|p| Circle::new((p[0], p[1]), radius, color.filled())),
                )?;
            }
        }
    }
    root.present()?;
    Ok(())
}

fn rgb(packed: u32) -> RGBColor {
    RGBColor(
        ((packed >> 16) & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        (packed & 0xFF) as u8,
    )
}

fn cmd_resolve_config(
    dyad_id: u32,
    role: Option<CliRole>,
    config: Option<&Path>,
    overrides: Option<&Path>,
) -> Result<()> {
    let (base, table) = load_configs(config, overrides)?;
    let seg_cfg = resolve_segmentation(dyad_id, &base, &table);
    let effective = match role {
        Some(role) => resolve_ecg(dyad_id, role.into(), &seg_cfg, &table),
        None => seg_cfg,
    };
    print!("{}", config::config_to_toml(&effective)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_clean_metrics(
    input: &Path,
    output: &Path,
    metric: &str,
    z_threshold: f64,
    method: ImputeMethod,
    cv_threshold: f64,
    min_windows: usize,
    plausible: Option<&[f64]>,
) -> Result<()> {
    let mut table = MetricsTable::read(input)?;
    let segment_idx = table.column_index("segment_name")?;
    let metric_idx = table.column_index(metric)?;
    let segments = table.string_column(segment_idx);
    let mut values = table.numeric_column(metric_idx);

    if let Some(&[lo, hi]) = plausible {
        values = plausible_to_nan(&values, lo, hi);
        table.push_numeric_column(&format!("{metric}_plausible"), &values);
    }

    let flags = zscore_outliers_by_segment(&segments, &values, z_threshold);
    let imputed = impute_by_segment(&segments, &values, &flags, method);
    let segment_flags = unstable_segments(&segments, &values, cv_threshold, min_windows);

    let flagged = flags.iter().filter(|&&f| f).count();
    log::info!(
        "{}: flagged {flagged}/{} windows on '{metric}'",
        input.display(),
        flags.len()
    );

    table.push_flag_column(&format!("{metric}_outlier"), &flags);
    table.push_numeric_column(&format!("{metric}_imputed"), &imputed);
    table.push_flag_column("segment_outlier", &segment_flags);
    table.write(output)?;
    Ok(())
}
