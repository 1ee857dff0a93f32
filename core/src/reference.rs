//! Menlo text exports: loading standard references and saving averaged pulses.

use crate::math::fft::SpectrumAnalyzer;
use crate::prelude::{CoreError, CoreResult, PulseWaveform, Spectrum};
use crate::processing::compare::{ComparisonParams, ReferenceBand};
use crate::telemetry::log::LogManager;
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const PROGRAM_VERSION: &str = "1.05";

/// Parses a two-column `time amplitude` export. Lines starting with `#` and blank
/// lines are skipped; columns may be separated by tabs or spaces.
pub fn parse_menlo(text: &str) -> CoreResult<PulseWaveform> {
    let mut time_ps = Vec::new();
    let mut amplitude = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut columns = line.split_whitespace().map(str::parse::<f64>);
        match (columns.next(), columns.next()) {
            (Some(Ok(t)), Some(Ok(a))) => {
                time_ps.push(t);
                amplitude.push(a);
            }
            _ => {
                return Err(CoreError::InvalidInput(format!(
                    "line {}: expected two numeric columns, got {line:?}",
                    number + 1
                )))
            }
        }
    }
    if time_ps.is_empty() {
        return Err(CoreError::InvalidInput("file holds no samples".into()));
    }
    PulseWaveform::new(time_ps, amplitude)
}

pub fn read_waveform(path: &Path) -> CoreResult<PulseWaveform> {
    let text = fs::read_to_string(path)?;
    parse_menlo(&text).map_err(|err| match err {
        CoreError::InvalidInput(detail) => {
            CoreError::InvalidInput(format!("{}: {detail}", path.display()))
        }
        other => other,
    })
}

/// One loaded TDS file with its spectrum.
#[derive(Debug, Clone)]
pub struct TdsRecord {
    pub path: PathBuf,
    pub time: Vec<f64>,
    pub amp: Vec<f64>,
    pub freq: Vec<f64>,
    pub fft: Vec<f64>,
}

pub fn load_tds(paths: &[PathBuf], analyzer: &SpectrumAnalyzer) -> CoreResult<Vec<TdsRecord>> {
    paths
        .iter()
        .map(|path| {
            let waveform = read_waveform(path)?;
            let spectrum = analyzer.compute(&waveform)?;
            Ok(TdsRecord {
                path: path.clone(),
                time: waveform.time_ps,
                amp: waveform.amplitude,
                freq: spectrum.freq_thz,
                fft: spectrum.magnitude,
            })
        })
        .collect()
}

/// Averaged "known good" waveform and its spectrum. Immutable for the life of a session.
#[derive(Debug, Clone)]
pub struct StandardReference {
    pub source: PathBuf,
    pub waveform: PulseWaveform,
    pub spectrum: Spectrum,
}

impl StandardReference {
    pub fn load(path: &Path, window_ps: f64, analyzer: &SpectrumAnalyzer) -> CoreResult<Self> {
        let waveform = read_waveform(path)?.windowed(window_ps);
        let reference = Self::from_waveform(path.to_path_buf(), waveform, analyzer)?;
        LogManager::new("reference").record(&format!(
            "standard reference {} loaded ({} samples)",
            path.display(),
            reference.waveform.len()
        ));
        Ok(reference)
    }

    pub fn from_waveform(
        source: PathBuf,
        waveform: PulseWaveform,
        analyzer: &SpectrumAnalyzer,
    ) -> CoreResult<Self> {
        let spectrum = analyzer.compute(&waveform)?;
        Ok(Self {
            source,
            waveform,
            spectrum,
        })
    }

    pub fn band(&self, params: ComparisonParams) -> CoreResult<ReferenceBand> {
        ReferenceBand::new(&self.spectrum, params)
    }
}

/// Provenance lines written above the data columns of every export.
#[derive(Debug, Clone)]
pub struct ExportHeader {
    pub title: String,
    pub averages: u32,
    pub begin_ps: f64,
    pub timestamp: DateTime<Local>,
}

impl ExportHeader {
    pub fn qc(averages: u32, begin_ps: f64, timestamp: DateTime<Local>) -> Self {
        Self {
            title: "THEA QC - RAM Group GmbH, powered by Menlo Systems".to_string(),
            averages,
            begin_ps,
            timestamp,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            self.title.clone(),
            format!("Program Version {PROGRAM_VERSION}"),
            format!(
                "Average over {} waveforms. Start: {} ps, Timestamp: {}",
                self.averages,
                self.begin_ps,
                self.timestamp.format("%Y-%m-%dT%H:%M:%S")
            ),
            format!("    User time axis shift: {}", -self.begin_ps),
            "    Time [ps]              THz Signal [mV]".to_string(),
        ]
    }
}

/// Writes `#`-prefixed header lines followed by tab separated samples.
pub fn save_waveform(path: &Path, waveform: &PulseWaveform, header: &ExportHeader) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for line in header.lines() {
        writeln!(file, "# {line}")?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file);
    for (t, a) in waveform.time_ps.iter().zip(&waveform.amplitude) {
        writer.write_record([format!("{t:.18e}"), format!("{a:.18e}")])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn reference_file_name(timestamp: &DateTime<Local>, wafer_id: &str, sensor_id: u32) -> String {
    format!(
        "{}_WID_{wafer_id}_SN_{sensor_id}_STANDARD_Reference.txt",
        timestamp.format("%d%m%yT%H%M%S")
    )
}

/// Saves a freshly measured reference under `reference_dir` and returns its path.
pub fn save_reference(
    reference_dir: &Path,
    waveform: &PulseWaveform,
    header: &ExportHeader,
    wafer_id: &str,
    sensor_id: u32,
) -> CoreResult<PathBuf> {
    let path = reference_dir.join(reference_file_name(&header.timestamp, wafer_id, sensor_id));
    save_waveform(&path, waveform, header)?;
    Ok(path)
}

/// Saves an averaged pulse as `<save_dir>/<YYYY-mm-dd>/<base>_<NNNN>.<ext>`, taking the
/// first unused counter. The time axis is shifted to start at 0 ps.
pub fn export_averaged(
    save_dir: &Path,
    filename: &str,
    waveform: &PulseWaveform,
    header: &ExportHeader,
) -> CoreResult<PathBuf> {
    let folder = save_dir.join(header.timestamp.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&folder)?;

    let (base, ext) = match filename.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (filename, "txt"),
    };
    let mut counter = 1u32;
    let path = loop {
        let candidate = folder.join(format!("{base}_{counter:04}.{ext}"));
        if !candidate.exists() {
            break candidate;
        }
        counter += 1;
    };

    let origin = waveform.time_ps.first().copied().unwrap_or(0.0);
    let shifted = PulseWaveform {
        time_ps: waveform.time_ps.iter().map(|t| t - origin).collect(),
        amplitude: waveform.amplitude.clone(),
    };
    save_waveform(&path, &shifted, header)?;
    LogManager::new("export").record(&format!("averaged pulse saved to {}", path.display()));
    Ok(path)
}
