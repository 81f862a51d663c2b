use std::path::Path;

use console::Style;
use ismphot_core::identity::{FrameIdentity, ResolutionFailure};
use ismphot_core::photref::PhotorefCandidateSet;
use ismphot_core::quality::FrameQuality;
use ismphot_core::reference::{AstrometricReference, CombinedPhotometricReference};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn fmt_metric(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.3}")
    } else {
        "-".into()
    }
}

fn active_label(s: &Styles, active: bool) -> String {
    if active {
        s.method.apply_to("active").to_string()
    } else {
        s.disabled.apply_to("inactive").to_string()
    }
}

pub fn print_identity(frame: &Path, identity: &Result<FrameIdentity, ResolutionFailure>) {
    let s = Styles::new();
    match identity {
        Ok(id) => println!(
            "  {:<28}{}  {}",
            name_of(frame),
            s.value.apply_to(id.key()),
            s.label.apply_to(format!("station {} frame {}", id.station_id, id.frame_number))
        ),
        Err(e) => println!("  {:<28}{}", name_of(frame), s.disabled.apply_to(e)),
    }
}

pub fn print_astromref(reference: &AstrometricReference) {
    let s = Styles::new();

    println!();
    println!(
        "  {}  {}",
        s.title.apply_to(format!("Astrometric reference {}", reference.key())),
        active_label(&s, reference.is_active)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frame"),
        s.path.apply_to(reference.frame_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Quick-look"),
        s.path.apply_to(reference.jpeg_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Created"),
        s.value.apply_to(reference.created_at.format("%Y-%m-%d %H:%M:%S UTC"))
    );
    println!(
        "  {:<14}S {}  D {}  bg {}  n {}",
        s.label.apply_to("Metrics"),
        s.value.apply_to(fmt_metric(reference.s_val)),
        s.value.apply_to(fmt_metric(reference.d_val)),
        s.value.apply_to(fmt_metric(reference.bg_val)),
        s.value.apply_to(reference.detection_count)
    );
    if !reference.comment.is_empty() {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Comment"),
            reference.comment
        );
    }
}

pub fn print_combined_ref(reference: &CombinedPhotometricReference) {
    let s = Styles::new();

    println!();
    println!(
        "  {}  {}",
        s.title.apply_to(format!(
            "Photometric reference {} ({})",
            reference.key(),
            reference.reference_type
        )),
        active_label(&s, reference.is_active)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frame"),
        s.path.apply_to(reference.frame_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Photometry"),
        s.path.apply_to(reference.calibration_photometry_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Registration"),
        s.path.apply_to(reference.registration_file_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Created"),
        s.value.apply_to(reference.created_at.format("%Y-%m-%d %H:%M:%S UTC"))
    );

    println!("  {}", s.header.apply_to("Build"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Combine"),
        s.method.apply_to(&reference.build.combine_method)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Kernel"),
        s.value.apply_to(&reference.build.kernel_spec)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Photometry"),
        s.method.apply_to(&reference.build.photometry_mode)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(reference.build.combined_frames.len())
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Selection"),
        s.value.apply_to(&reference.build.candidate_set_key)
    );
}

pub fn print_candidate_set(label: &str, set: &PhotorefCandidateSet) {
    let s = Styles::new();
    let counts = &set.diagnostics.counts;

    println!();
    println!("  {}", s.title.apply_to(format!("Candidates {label}")));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Cache key"),
        s.value.apply_to(&set.cache_key)
    );
    println!(
        "  {:<14}{} in, {} conditions, {} top S, {} background, {} selected",
        s.label.apply_to("Stages"),
        counts.input,
        counts.passed_conditions,
        counts.top_by_s,
        counts.passed_background,
        counts.selected
    );

    match &set.master_frame {
        Some(master) => println!(
            "  {:<14}{}",
            s.label.apply_to("Master"),
            s.path.apply_to(master.display())
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("Master"),
            s.disabled.apply_to(set.diagnostics.failure.as_deref().unwrap_or("none"))
        ),
    }
    for frame in &set.candidate_frames {
        println!("    {}", name_of(frame));
    }
    if !set.builds.is_empty() {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Builds"),
            s.value.apply_to(set.builds.len())
        );
    }
}

pub fn print_metrics_table(metrics: &[FrameQuality]) {
    let s = Styles::new();
    println!(
        "  {}",
        s.header.apply_to(format!(
            "{:<28}{:>9}{:>9}{:>10}{:>9}{:>8}{:>7}",
            "Frame", "S", "D", "Bkg", "BkgStd", "Z", "N"
        ))
    );
    for q in metrics {
        let m = &q.metrics;
        println!(
            "  {:<28}{:>9}{:>9}{:>10}{:>9}{:>8}{:>7}",
            name_of(&q.frame),
            fmt_metric(m.median_s),
            fmt_metric(m.median_d),
            fmt_metric(m.median_background),
            fmt_metric(m.stdev_background),
            fmt_metric(m.zenith_distance),
            m.detection_count.map_or_else(|| "-".to_string(), |n| n.to_string())
        );
    }
}
