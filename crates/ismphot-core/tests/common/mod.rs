use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::Array2;

use ismphot_core::config::IsmConfig;
use ismphot_core::context::Context;
use ismphot_core::error::{IsmError, Result};
use ismphot_core::frame::Frame;
use ismphot_core::io::fistar::read_source_list;
use ismphot_core::io::fits::{write_frame, FitsHeader, HeaderValue};
use ismphot_core::tools::{ToolInvocation, ToolRunner, Tools};

pub const FIELD: &str = "G1234+5678_abc";
pub const PROJECT: u32 = 42;

/// Observing conditions written into a test frame's header.
#[derive(Clone, Copy, Debug)]
pub struct Conditions {
    pub zenith_distance: f64,
    pub hour_angle: f64,
    pub moon_phase: f64,
    pub moon_elevation: f64,
    pub jd: f64,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            zenith_distance: 10.0,
            hour_angle: 0.5,
            moon_phase: 5.0,
            moon_elevation: -20.0,
            jd: 2_455_000.5,
        }
    }
}

pub fn frame_header(field: &str, project: u32, c: &Conditions) -> FitsHeader {
    let mut header = FitsHeader::new();
    header.set("OBJECT", HeaderValue::Str(field.into()));
    header.set("PROJID", HeaderValue::Int(project as i64));
    header.set("Z", HeaderValue::Float(c.zenith_distance));
    header.set("HA", HeaderValue::Float(c.hour_angle));
    header.set("MOONPH", HeaderValue::Float(c.moon_phase));
    header.set("MOONELEV", HeaderValue::Float(c.moon_elevation));
    header.set("MOONDIST", HeaderValue::Float(90.0));
    header.set("JD", HeaderValue::Float(c.jd));
    header
}

/// `{station}-{number:06}_{ccd}.fits`
pub fn frame_name(station: u8, number: u32, ccd: u8) -> String {
    format!("{station}-{number:06}_{ccd}.fits")
}

pub fn write_frame_file(path: &Path, data: Array2<f32>, header: FitsHeader) {
    write_frame(&Frame::new(data, header), path).unwrap();
}

/// A flat frame of the default field and project.
pub fn write_flat_frame(path: &Path, size: usize, value: f32, c: &Conditions) {
    write_frame_file(
        path,
        Array2::from_elem((size, size), value),
        frame_header(FIELD, PROJECT, c),
    );
}

#[derive(Clone, Copy, Debug)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub bg: f64,
    pub s: f64,
    pub d: f64,
    pub flux: f64,
}

/// `n` sources on a diagonal, all with the same shape and background.
pub fn uniform_sources(n: usize, bg: f64, s: f64, d: f64) -> Vec<Source> {
    (0..n)
        .map(|i| Source {
            x: 10.0 * (i + 1) as f64,
            y: 10.0 * (i + 1) as f64,
            bg,
            s,
            d,
            flux: 5000.0,
        })
        .collect()
}

/// Columns: id x y bg amp s d k flux s/n
pub fn write_fistar(path: &Path, sources: &[Source]) {
    let mut text = String::from("# id x y bg amp s d k flux s/n\n");
    for (i, src) in sources.iter().enumerate() {
        writeln!(
            text,
            "{} {:.3} {:.3} {:.3} 500.0 {:.4} {:.4} 0.0 {:.1} 50.0",
            i + 1,
            src.x,
            src.y,
            src.bg,
            src.s,
            src.d,
            src.flux
        )
        .unwrap();
    }
    fs::write(path, text).unwrap();
}

/// A frame plus its `.fistar` sidecar in `dir`. Returns the frame path.
pub fn write_observed_frame(
    dir: &Path,
    number: u32,
    ccd: u8,
    conditions: &Conditions,
    sources: &[Source],
) -> PathBuf {
    let frame = dir.join(frame_name(1, number, ccd));
    write_flat_frame(&frame, 32, 100.0, conditions);
    write_fistar(&frame.with_extension("fistar"), sources);
    frame
}

#[derive(Clone, Debug)]
pub struct PhotRow {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub mag: f64,
    pub err: f64,
    pub good: bool,
}

/// Text photometry: id x y, nine filler columns, mag err flag.
pub fn write_text_phot(path: &Path, rows: &[PhotRow]) {
    let mut text = String::from("# id x y ... mag err flag\n");
    for r in rows {
        writeln!(
            text,
            "{} {:.3} {:.3} 0 0 0 0 0 0 0 0 0 {:.4} {:.4} {}",
            r.id,
            r.x,
            r.y,
            r.mag,
            r.err,
            if r.good { "G" } else { "C" }
        )
        .unwrap();
    }
    fs::write(path, text).unwrap();
}

/// Binary photometry: `#` header with the marker, then count and fixed-size records.
pub fn write_binary_phot(path: &Path, rows: &[(u64, f64, f64, f64, f64, u8)]) {
    let mut out = fs::File::create(path).unwrap();
    writeln!(out, "# fiphot --binary-output").unwrap();
    writeln!(out, "# end-of-header").unwrap();
    out.write_u32::<LittleEndian>(rows.len() as u32).unwrap();
    for &(index, x, y, mag, err, flag) in rows {
        out.write_u64::<LittleEndian>(index).unwrap();
        out.write_f64::<LittleEndian>(x).unwrap();
        out.write_f64::<LittleEndian>(y).unwrap();
        out.write_f64::<LittleEndian>(mag).unwrap();
        out.write_f64::<LittleEndian>(err).unwrap();
        out.write_u8(flag).unwrap();
    }
}

pub fn catalog_ids() -> Vec<String> {
    (1..=3).map(|i| format!("HAT-123-{i:07}")).collect()
}

/// Field catalog with three objects near the positions [`FakeRunner`]'s
/// extraction reports.
pub fn write_catalog(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut text = String::from("# id x y\n");
    for (i, id) in catalog_ids().iter().enumerate() {
        let p = 10.0 * (i + 1) as f64;
        writeln!(text, "{id} {:.2} {:.2}", p + 0.4, p - 0.3).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// Configuration rooted in a scratch directory, two workers, warp check off.
pub fn test_config(root: &Path) -> IsmConfig {
    let mut config = IsmConfig::default();
    config.paths.reference_dir = root.join("reference-frames");
    config.paths.cache_dir = root.join("cache");
    config.paths.registry_path = root.join("reference-frames").join("refinfo.sqlite");
    config.paths.catalog_dir = root.join("catalogs");
    config.pool.workers = 2;
    config.pool.max_tasks_per_worker = Some(4);
    config.astromref.warp_check = None;
    config
}

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Stands in for the fitsh tools: writes every declared output with
/// plausible content and records the tool names it was asked to run.
#[derive(Clone, Default)]
pub struct FakeRunner {
    pub calls: CallLog,
    pub failing: Vec<&'static str>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(tool: &'static str) -> Self {
        Self {
            failing: vec![tool],
            ..Self::default()
        }
    }

    fn produce(&self, inv: &ToolInvocation) -> Result<()> {
        match inv.tool {
            "fitrans" => {
                fs::copy(&inv.inputs[0], &inv.outputs[0])?;
            }
            "ficonv" => {
                fs::write(&inv.outputs[0], "# kernel\n")?;
                fs::copy(&inv.inputs[1], &inv.outputs[1])?;
            }
            "fistar" => write_fistar(&inv.outputs[0], &uniform_sources(3, 100.0, 3.0, 0.01)),
            // Differential photometry reads subtracted frame, raw photometry and kernel.
            "fiphot" if inv.inputs.len() == 3 => {
                let rows: Vec<PhotRow> = catalog_ids()
                    .into_iter()
                    .enumerate()
                    .map(|(i, id)| PhotRow {
                        id,
                        x: 10.0 * (i + 1) as f64,
                        y: 10.0 * (i + 1) as f64,
                        mag: 0.01,
                        err: 0.002,
                        good: true,
                    })
                    .collect();
                write_text_phot(&inv.outputs[0], &rows);
            }
            "fiphot" => {
                let rows: Vec<PhotRow> = read_source_list(&inv.inputs[1])?
                    .into_iter()
                    .map(|s| PhotRow {
                        id: s.id,
                        x: s.x,
                        y: s.y,
                        mag: 12.0,
                        err: 0.01,
                        good: true,
                    })
                    .collect();
                write_text_phot(&inv.outputs[0], &rows);
            }
            tool => {
                for out in &inv.outputs {
                    fs::write(out, format!("# {tool}\n"))?;
                }
            }
        }
        Ok(())
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<()> {
        self.calls.lock().unwrap().push(inv.tool.to_string());
        if self.failing.contains(&inv.tool) {
            inv.remove_outputs();
            return Err(IsmError::ExternalTool {
                tool: inv.tool.into(),
                reason: "simulated failure".into(),
            });
        }
        self.produce(inv)
    }
}

/// Context whose tools are served by `runner`.
pub fn fake_context(config: IsmConfig, runner: FakeRunner) -> Context {
    let tools = Tools::with_runner(config.tools.clone(), runner);
    Context::with_tools(config, tools).unwrap()
}
